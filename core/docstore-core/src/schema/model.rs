//! Schema metadata records: Table, View and Index.
//!
//! Records are stored as encoded payloads in the system tables; each one
//! owns the lifecycle of a physical wide-row table named after it.

use crate::error::{DocError, DocResult};
use crate::key::parser::{is_property_name, split_sign};
use crate::key::{Identifier, KeyDefinition, ScalarType, ScalarValue, SortOrder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ════════════════════════════════════════════
// Names
// ════════════════════════════════════════════

/// `[A-Za-z][A-Za-z0-9_]*` without `__` (reserved as the physical-name separator).
pub fn validate_name(kind: &str, name: &str) -> DocResult<()> {
    let mut chars = name.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.contains("__");
    if valid {
        Ok(())
    } else {
        Err(DocError::Validation(format!("invalid {kind} name '{name}'")))
    }
}

/// (database, table), the cache key of the document service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableId {
    pub database: String,
    pub table: String,
}

impl TableId {
    pub fn new(database: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            table: table.into(),
        }
    }

    pub fn validate(&self) -> DocResult<()> {
        validate_name("database", &self.database)?;
        validate_name("table", &self.table)
    }

    /// `{database}__{table}`
    pub fn physical_name(&self) -> String {
        format!("{}__{}", self.database, self.table)
    }

    /// `{database}__{table}__v_{view}`
    pub fn view_table_name(&self, view: &str) -> String {
        format!("{}__v_{view}", self.physical_name())
    }

    /// `{database}__{table}__i_{index}`
    pub fn index_table_name(&self, index: &str) -> String {
        format!("{}__i_{index}", self.physical_name())
    }

    /// Partition identifier of this table's rows in `sys_views`/`sys_indexes`.
    pub fn identifier(&self) -> Identifier {
        Identifier::new([
            ScalarValue::from(self.database.as_str()),
            ScalarValue::from(self.table.as_str()),
        ])
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.table)
    }
}

// ════════════════════════════════════════════
// Table
// ════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub database: String,
    pub name: String,
    /// Key definition DSL
    pub keys: String,
    /// Informational type names of the identifier and the stored element.
    pub id_type: Option<String>,
    pub element_type: Option<String>,
    /// Default TTL in seconds
    pub ttl: Option<u32>,
}

impl Table {
    pub fn new(database: impl Into<String>, name: impl Into<String>, keys: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            name: name.into(),
            keys: keys.into(),
            id_type: None,
            element_type: None,
            ttl: None,
        }
    }

    pub fn with_ttl(mut self, ttl: u32) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_types(mut self, id_type: impl Into<String>, element_type: impl Into<String>) -> Self {
        self.id_type = Some(id_type.into());
        self.element_type = Some(element_type.into());
        self
    }

    pub fn id(&self) -> TableId {
        TableId::new(self.database.clone(), self.name.clone())
    }

    pub fn key_definition(&self) -> DocResult<KeyDefinition> {
        KeyDefinition::parse(&self.keys)
    }

    /// Names and key DSL; raises before any storage call.
    pub fn validate(&self) -> DocResult<()> {
        self.id().validate()?;
        self.key_definition().map(|_| ())
    }

    /// Row identifier in `sys_tables`: `(database), name`.
    pub fn identifier(&self) -> Identifier {
        Identifier::new([
            ScalarValue::from(self.database.as_str()),
            ScalarValue::from(self.name.as_str()),
        ])
    }
}

// ════════════════════════════════════════════
// View
// ════════════════════════════════════════════

/// Secondary projection of a table's documents under another key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct View {
    pub database: String,
    pub table: String,
    pub name: String,
    pub keys: String,
    pub ttl: Option<u32>,
}

impl View {
    pub fn new(
        database: impl Into<String>,
        table: impl Into<String>,
        name: impl Into<String>,
        keys: impl Into<String>,
    ) -> Self {
        Self {
            database: database.into(),
            table: table.into(),
            name: name.into(),
            keys: keys.into(),
            ttl: None,
        }
    }

    pub fn with_ttl(mut self, ttl: u32) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn table_id(&self) -> TableId {
        TableId::new(self.database.clone(), self.table.clone())
    }

    pub fn physical_name(&self) -> String {
        self.table_id().view_table_name(&self.name)
    }

    pub fn key_definition(&self) -> DocResult<KeyDefinition> {
        KeyDefinition::parse(&self.keys)
    }

    pub fn validate(&self) -> DocResult<()> {
        self.table_id().validate()?;
        validate_name("view", &self.name)?;
        self.key_definition().map(|_| ())
    }

    /// Row identifier in `sys_views`: `(database, table), name`.
    pub fn identifier(&self) -> Identifier {
        self.table_id()
            .identifier()
            .with(ScalarValue::from(self.name.as_str()))
    }
}

// ════════════════════════════════════════════
// Index
// ════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexEngine {
    /// Bucketed wide-row table maintained by this store.
    BucketedView,
    Lucene,
    Solr,
    ElasticSearch,
}

impl IndexEngine {
    /// External engines are metadata only; no storage table is provisioned.
    pub fn is_external(&self) -> bool {
        !matches!(self, IndexEngine::BucketedView)
    }
}

/// One indexed field: `"[+|-]path:type"` or `"path:type[:asc|desc]"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexField {
    /// Dotted payload path
    pub path: String,
    pub scalar_type: ScalarType,
    pub order: SortOrder,
}

impl IndexField {
    pub fn parse(text: &str) -> DocResult<Self> {
        let (signed_order, body) = split_sign(text.trim());
        let mut parts = body.split(':').map(str::trim);
        let path = parts.next().unwrap_or_default();
        let ty = parts
            .next()
            .ok_or_else(|| DocError::key_definition("index field is not of the form name:type", text))?;
        let order = match parts.next() {
            None => signed_order,
            Some(direction) => {
                if text.trim_start().starts_with(['-', '+']) {
                    return Err(DocError::key_definition(
                        "index field has both a sign and a direction",
                        text,
                    ));
                }
                match direction.to_ascii_lowercase().as_str() {
                    "asc" => SortOrder::Ascending,
                    "desc" => SortOrder::Descending,
                    other => {
                        return Err(DocError::key_definition(
                            format!("unknown direction '{other}'"),
                            text,
                        ));
                    }
                }
            }
        };
        if parts.next().is_some() {
            return Err(DocError::key_definition("too many ':' in index field", text));
        }
        if path.is_empty() || !path.split('.').all(is_property_name) {
            return Err(DocError::key_definition(
                format!("invalid index field path '{path}'"),
                text,
            ));
        }
        let scalar_type = ScalarType::parse(ty)
            .ok_or_else(|| DocError::key_definition(format!("unsupported type '{ty}'"), text))?;
        Ok(Self {
            path: path.to_string(),
            scalar_type,
            order,
        })
    }

    /// Column name of this field in the index table.
    pub fn column_name(&self) -> String {
        self.path.replace('.', "_")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    pub database: String,
    pub table: String,
    pub name: String,
    /// Field specs, see [`IndexField::parse`]
    pub fields: Vec<String>,
    pub unique: bool,
    pub case_sensitive: bool,
    pub engine: IndexEngine,
    /// Engine-specific settings, passed through untouched.
    pub options: BTreeMap<String, String>,
}

impl Index {
    /// Non-unique, case-sensitive bucketed index.
    pub fn new(
        database: impl Into<String>,
        table: impl Into<String>,
        name: impl Into<String>,
        fields: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            database: database.into(),
            table: table.into(),
            name: name.into(),
            fields: fields.into_iter().map(Into::into).collect(),
            unique: false,
            case_sensitive: true,
            engine: IndexEngine::BucketedView,
            options: BTreeMap::new(),
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn case_insensitive(mut self) -> Self {
        self.case_sensitive = false;
        self
    }

    pub fn with_engine(mut self, engine: IndexEngine) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn table_id(&self) -> TableId {
        TableId::new(self.database.clone(), self.table.clone())
    }

    pub fn physical_name(&self) -> String {
        self.table_id().index_table_name(&self.name)
    }

    pub fn parsed_fields(&self) -> DocResult<Vec<IndexField>> {
        self.fields.iter().map(|f| IndexField::parse(f)).collect()
    }

    pub fn validate(&self) -> DocResult<()> {
        self.table_id().validate()?;
        validate_name("index", &self.name)?;
        if self.fields.is_empty() && !self.engine.is_external() {
            return Err(DocError::Validation(format!(
                "index '{}' declares no fields",
                self.name
            )));
        }
        self.parsed_fields().map(|_| ())
    }

    /// Row identifier in `sys_indexes`: `(database, table), name`.
    pub fn identifier(&self) -> Identifier {
        self.table_id()
            .identifier()
            .with(ScalarValue::from(self.name.as_str()))
    }
}
