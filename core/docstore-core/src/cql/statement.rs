//! Statements of the wide-column dialect.
//!
//! A [`Statement`] carries the CQL-like text a wire driver would send and a
//! structured [`StatementPlan`] an embedded store can execute directly,
//! along with the number of positional `?` placeholders.

use crate::error::{DocError, DocResult};
use crate::key::{ScalarType, SortOrder};
use serde::{Deserialize, Serialize};

/// Column type of a wide-row table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    Scalar(ScalarType),
    Blob,
    Boolean,
}

impl ColumnType {
    pub fn cql_name(&self) -> &'static str {
        match self {
            ColumnType::Scalar(ty) => ty.cql_name(),
            ColumnType::Blob => "blob",
            ColumnType::Boolean => "boolean",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub column_type: ColumnType,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusteringColumn {
    pub name: String,
    pub scalar_type: ScalarType,
    pub order: SortOrder,
}

/// Physical shape of a wide-row table, as created by `CREATE TABLE`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableLayout {
    pub partition: Vec<ColumnSpec>,
    pub clustering: Vec<ClusteringColumn>,
    pub regular: Vec<ColumnSpec>,
    /// Seconds; `None` or zero keeps rows forever.
    pub default_ttl: Option<u32>,
}

impl TableLayout {
    pub fn primary_key_len(&self) -> usize {
        self.partition.len() + self.clustering.len()
    }

    /// Primary key column names in key order.
    pub fn key_names(&self) -> Vec<&str> {
        self.partition
            .iter()
            .map(|c| c.name.as_str())
            .chain(self.clustering.iter().map(|c| c.name.as_str()))
            .collect()
    }

    /// Type of the named key column, if it is one.
    pub fn key_type(&self, name: &str) -> Option<ScalarType> {
        self.partition
            .iter()
            .find(|c| c.name == name)
            .and_then(|c| match c.column_type {
                ColumnType::Scalar(ty) => Some(ty),
                _ => None,
            })
            .or_else(|| {
                self.clustering
                    .iter()
                    .find(|c| c.name == name)
                    .map(|c| c.scalar_type)
            })
    }

    pub fn column_type(&self, name: &str) -> Option<ColumnType> {
        self.key_type(name).map(ColumnType::Scalar).or_else(|| {
            self.regular
                .iter()
                .find(|c| c.name == name)
                .map(|c| c.column_type)
        })
    }
}

/// Structured form of a statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatementPlan {
    /// Always `IF NOT EXISTS`; `applied` reports whether the table was created.
    CreateTable { table: String, layout: TableLayout },
    /// Always `IF EXISTS`.
    DropTable { table: String },
    /// Binds `columns` in order.
    Insert {
        table: String,
        columns: Vec<String>,
        if_not_exists: bool,
    },
    /// Binds `set` then `key`.
    Update {
        table: String,
        set: Vec<String>,
        key: Vec<String>,
        if_exists: bool,
    },
    /// Binds the full primary key.
    Delete { table: String, key: Vec<String> },
    /// Binds `key`, a prefix of the primary key covering at least the
    /// partition.
    Select {
        table: String,
        columns: Vec<String>,
        key: Vec<String>,
        limit: Option<u32>,
    },
}

impl StatementPlan {
    pub fn table(&self) -> &str {
        match self {
            StatementPlan::CreateTable { table, .. }
            | StatementPlan::DropTable { table }
            | StatementPlan::Insert { table, .. }
            | StatementPlan::Update { table, .. }
            | StatementPlan::Delete { table, .. }
            | StatementPlan::Select { table, .. } => table,
        }
    }

    pub fn is_ddl(&self) -> bool {
        matches!(
            self,
            StatementPlan::CreateTable { .. } | StatementPlan::DropTable { .. }
        )
    }

    pub fn param_count(&self) -> usize {
        match self {
            StatementPlan::CreateTable { .. } | StatementPlan::DropTable { .. } => 0,
            StatementPlan::Insert { columns, .. } => columns.len(),
            StatementPlan::Update { set, key, .. } => set.len() + key.len(),
            StatementPlan::Delete { key, .. } => key.len(),
            StatementPlan::Select { key, .. } => key.len(),
        }
    }
}

/// Statement text plus plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    /// CQL text (for drivers and debugging)
    pub cql: String,

    /// Structured plan
    pub plan: StatementPlan,

    /// Number of parameters (placeholders) in the statement
    pub param_count: usize,
}

impl Statement {
    pub fn new(cql: String, plan: StatementPlan) -> Self {
        let param_count = plan.param_count();
        Self {
            cql,
            plan,
            param_count,
        }
    }

    /// Validate that the correct number of parameters are provided
    pub fn validate_params(&self, count: usize) -> DocResult<()> {
        if count != self.param_count {
            return Err(DocError::Statement {
                message: format!("expected {} parameters, got {}", self.param_count, count),
                cql: self.cql.clone(),
            });
        }
        Ok(())
    }
}
