//! Statement compiler: (operation, row layout) → statement text + plan.
//!
//! Pure and deterministic. The binder order of every statement is the
//! order of the column lists in its plan: key components in key order,
//! then regular columns in layout order.

use crate::cql::statement::{
    ClusteringColumn, ColumnSpec, ColumnType, Statement, StatementPlan, TableLayout,
};
use crate::key::{KeyDefinition, ScalarType};
use std::sync::Arc;

/// Regular column holding the encoded payload.
pub const OBJECT_COLUMN: &str = "object";
pub const CREATED_AT_COLUMN: &str = "created_at";
pub const UPDATED_AT_COLUMN: &str = "updated_at";

/// Statement kinds a repository prepares. Also the prepared-statement cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    CreateTable,
    DropTable,
    /// Conditional insert (`IF NOT EXISTS`)
    Insert,
    /// Unconditional insert
    Upsert,
    /// Conditional update of the layout's update columns (`IF EXISTS`)
    Update,
    Delete,
    /// Point lookup by the full identity
    Select,
    /// Scan restricted by the first `components` key components
    SelectPrefix {
        components: usize,
        limit: Option<u32>,
    },
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::CreateTable => "create_table",
            Operation::DropTable => "drop_table",
            Operation::Insert => "insert",
            Operation::Upsert => "upsert",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::Select => "select",
            Operation::SelectPrefix { .. } => "select_prefix",
        }
    }
}

/// Key definition plus the regular columns a repository stores next to it.
#[derive(Debug, Clone)]
pub struct RowLayout {
    pub key: Arc<KeyDefinition>,
    pub columns: Vec<ColumnSpec>,
    /// Columns written by [`Operation::Update`], in binder order.
    pub update_columns: Vec<String>,
    /// Table default TTL in seconds.
    pub default_ttl: Option<u32>,
}

impl RowLayout {
    /// Document table: key, `object blob`, `created_at`, `updated_at`.
    pub fn document(key: Arc<KeyDefinition>) -> Self {
        Self {
            key,
            columns: vec![
                ColumnSpec::new(OBJECT_COLUMN, ColumnType::Blob),
                ColumnSpec::new(CREATED_AT_COLUMN, ColumnType::Scalar(ScalarType::Timestamp)),
                ColumnSpec::new(UPDATED_AT_COLUMN, ColumnType::Scalar(ScalarType::Timestamp)),
            ],
            update_columns: vec![OBJECT_COLUMN.to_string(), UPDATED_AT_COLUMN.to_string()],
            default_ttl: None,
        }
    }

    /// Add a regular column after the existing ones.
    pub fn with_column(mut self, column: ColumnSpec) -> Self {
        self.columns.push(column);
        self
    }

    pub fn with_ttl(mut self, ttl: Option<u32>) -> Self {
        self.default_ttl = ttl.filter(|t| *t > 0);
        self
    }

    /// Key columns then regular columns.
    pub fn all_columns(&self) -> Vec<String> {
        self.key
            .property_names()
            .into_iter()
            .map(str::to_string)
            .chain(self.columns.iter().map(|c| c.name.clone()))
            .collect()
    }

    fn key_columns(&self, n: usize) -> Vec<String> {
        self.key
            .property_names()
            .into_iter()
            .take(n)
            .map(str::to_string)
            .collect()
    }

    /// Physical layout for `CREATE TABLE`.
    pub fn table_layout(&self) -> TableLayout {
        TableLayout {
            partition: self
                .key
                .partition_components()
                .iter()
                .map(|c| ColumnSpec::new(c.name.clone(), ColumnType::Scalar(c.scalar_type)))
                .collect(),
            clustering: self
                .key
                .clustering_components()
                .iter()
                .map(|c| ClusteringColumn {
                    name: c.name().to_string(),
                    scalar_type: c.component.scalar_type,
                    order: c.order,
                })
                .collect(),
            regular: self.columns.clone(),
            default_ttl: self.default_ttl,
        }
    }
}

/// Compile one operation against `keyspace.table`.
pub fn compile(operation: Operation, layout: &RowLayout, keyspace: &str, table: &str) -> Statement {
    let qualified = format!("{keyspace}.{table}");
    let key = &layout.key;
    let all = layout.all_columns();
    let full_key = layout.key_columns(key.len());

    match operation {
        Operation::CreateTable => {
            let mut definitions = vec![key.column_definitions().to_string()];
            definitions.extend(
                layout
                    .columns
                    .iter()
                    .map(|c| format!("{} {}", c.name, c.column_type.cql_name())),
            );
            definitions.push(key.primary_key_clause().to_string());

            let mut options = Vec::new();
            if let Some(order) = key.clustering_order_clause() {
                options.push(order.to_string());
            }
            if let Some(ttl) = layout.default_ttl {
                options.push(format!("default_time_to_live = {ttl}"));
            }
            let mut cql = format!(
                "CREATE TABLE IF NOT EXISTS {qualified} ({})",
                definitions.join(", ")
            );
            if !options.is_empty() {
                cql.push_str(" WITH ");
                cql.push_str(&options.join(" AND "));
            }
            Statement::new(
                cql,
                StatementPlan::CreateTable {
                    table: qualified,
                    layout: layout.table_layout(),
                },
            )
        }
        Operation::DropTable => drop_table_statement(keyspace, table),
        Operation::Insert | Operation::Upsert => {
            let if_not_exists = operation == Operation::Insert;
            let cql = format!(
                "INSERT INTO {qualified} ({}) VALUES ({}){}",
                all.join(", "),
                vec!["?"; all.len()].join(", "),
                if if_not_exists { " IF NOT EXISTS" } else { "" }
            );
            Statement::new(
                cql,
                StatementPlan::Insert {
                    table: qualified,
                    columns: all,
                    if_not_exists,
                },
            )
        }
        Operation::Update => {
            let set = layout
                .update_columns
                .iter()
                .map(|c| format!("{c} = ?"))
                .collect::<Vec<_>>()
                .join(", ");
            let cql = format!(
                "UPDATE {qualified} SET {set} WHERE {} IF EXISTS",
                key.identity_clause()
            );
            Statement::new(
                cql,
                StatementPlan::Update {
                    table: qualified,
                    set: layout.update_columns.clone(),
                    key: full_key,
                    if_exists: true,
                },
            )
        }
        Operation::Delete => Statement::new(
            format!("DELETE FROM {qualified} WHERE {}", key.identity_clause()),
            StatementPlan::Delete {
                table: qualified,
                key: full_key,
            },
        ),
        Operation::Select => select(qualified, all, full_key, key.identity_clause(), None),
        Operation::SelectPrefix { components, limit } => {
            let n = components.min(key.len());
            select(qualified, all, layout.key_columns(n), &key.prefix_clause(n), limit)
        }
    }
}

/// `DROP TABLE IF EXISTS`; needs no layout.
pub fn drop_table_statement(keyspace: &str, table: &str) -> Statement {
    let qualified = format!("{keyspace}.{table}");
    Statement::new(
        format!("DROP TABLE IF EXISTS {qualified}"),
        StatementPlan::DropTable { table: qualified },
    )
}

fn select(
    table: String,
    columns: Vec<String>,
    key: Vec<String>,
    clause: &str,
    limit: Option<u32>,
) -> Statement {
    let mut cql = format!("SELECT {} FROM {table}", columns.join(", "));
    if !clause.is_empty() {
        cql.push_str(" WHERE ");
        cql.push_str(clause);
    }
    if let Some(limit) = limit {
        cql.push_str(&format!(" LIMIT {limit}"));
    }
    Statement::new(
        cql,
        StatementPlan::Select {
            table,
            columns,
            key,
            limit,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(dsl: &str) -> RowLayout {
        RowLayout::document(Arc::new(KeyDefinition::parse(dsl).unwrap()))
    }

    #[test]
    fn test_create_table_single_key() {
        let stmt = compile(Operation::CreateTable, &layout("id:uuid"), "ks", "acme__users");
        assert_eq!(
            stmt.cql,
            "CREATE TABLE IF NOT EXISTS ks.acme__users (id uuid, object blob, \
             created_at timestamp, updated_at timestamp, PRIMARY KEY (id))"
        );
        assert_eq!(stmt.param_count, 0);
        assert!(stmt.plan.is_ddl());
    }

    #[test]
    fn test_create_table_with_order_and_ttl() {
        let layout = layout("(day:int,hour:int),-minute:int").with_ttl(Some(3600));
        let stmt = compile(Operation::CreateTable, &layout, "ks", "t");
        assert_eq!(
            stmt.cql,
            "CREATE TABLE IF NOT EXISTS ks.t (day int, hour int, minute int, object blob, \
             created_at timestamp, updated_at timestamp, PRIMARY KEY ((day, hour), minute)) \
             WITH CLUSTERING ORDER BY (minute DESC) AND default_time_to_live = 3600"
        );
        match stmt.plan {
            StatementPlan::CreateTable { layout, .. } => {
                assert_eq!(layout.partition.len(), 2);
                assert_eq!(layout.default_ttl, Some(3600));
            }
            other => panic!("unexpected plan {other:?}"),
        }
    }

    #[test]
    fn test_zero_ttl_means_none() {
        assert_eq!(layout("id:uuid").with_ttl(Some(0)).default_ttl, None);
    }

    #[test]
    fn test_insert_and_upsert() {
        let l = layout("id:uuid");
        let insert = compile(Operation::Insert, &l, "ks", "t");
        assert_eq!(
            insert.cql,
            "INSERT INTO ks.t (id, object, created_at, updated_at) VALUES (?, ?, ?, ?) IF NOT EXISTS"
        );
        assert_eq!(insert.param_count, 4);

        let upsert = compile(Operation::Upsert, &l, "ks", "t");
        assert_eq!(
            upsert.cql,
            "INSERT INTO ks.t (id, object, created_at, updated_at) VALUES (?, ?, ?, ?)"
        );
    }

    #[test]
    fn test_update_binds_set_then_key() {
        let stmt = compile(Operation::Update, &layout("(a:text),b:int"), "ks", "t");
        assert_eq!(
            stmt.cql,
            "UPDATE ks.t SET object = ?, updated_at = ? WHERE a = ? AND b = ? IF EXISTS"
        );
        assert_eq!(stmt.param_count, 4);
    }

    #[test]
    fn test_delete_and_selects() {
        let l = layout("(a:text),b:int");
        assert_eq!(
            compile(Operation::Delete, &l, "ks", "t").cql,
            "DELETE FROM ks.t WHERE a = ? AND b = ?"
        );
        assert_eq!(
            compile(Operation::Select, &l, "ks", "t").cql,
            "SELECT a, b, object, created_at, updated_at FROM ks.t WHERE a = ? AND b = ?"
        );
        let prefix = compile(
            Operation::SelectPrefix {
                components: 1,
                limit: Some(1),
            },
            &l,
            "ks",
            "t",
        );
        assert_eq!(
            prefix.cql,
            "SELECT a, b, object, created_at, updated_at FROM ks.t WHERE a = ? LIMIT 1"
        );
        assert_eq!(prefix.param_count, 1);
        assert_eq!(
            compile(Operation::DropTable, &l, "ks", "t").cql,
            "DROP TABLE IF EXISTS ks.t"
        );
    }
}
