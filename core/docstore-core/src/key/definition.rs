//! KeyDefinition: partition and clustering key components of a wide row.
//!
//! A key definition is parsed once per repository from its DSL string and is
//! immutable afterwards. The statement fragments derived from it (column
//! definitions, primary-key clause, equality clauses, placeholders) are
//! rendered lazily and cached for the lifetime of the definition.

use crate::error::{DocError, DocResult};
use crate::key::identifier::Identifier;
use crate::key::types::{ScalarType, ScalarValue};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::OnceLock;

/// Clustering direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

impl SortOrder {
    pub fn cql_name(&self) -> &'static str {
        match self {
            SortOrder::Ascending => "ASC",
            SortOrder::Descending => "DESC",
        }
    }
}

/// (property name, scalar type)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyComponent {
    pub name: String,
    pub scalar_type: ScalarType,
}

impl KeyComponent {
    pub fn new(name: impl Into<String>, scalar_type: ScalarType) -> Self {
        Self {
            name: name.into(),
            scalar_type,
        }
    }
}

/// Key component with a sort direction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClusteringKeyComponent {
    pub component: KeyComponent,
    pub order: SortOrder,
}

impl ClusteringKeyComponent {
    pub fn new(name: impl Into<String>, scalar_type: ScalarType, order: SortOrder) -> Self {
        Self {
            component: KeyComponent::new(name, scalar_type),
            order,
        }
    }

    pub fn name(&self) -> &str {
        &self.component.name
    }
}

/// A field value handed to [`KeyDefinition::extract`].
#[derive(Debug, Clone, Copy)]
pub enum FieldValue<'a> {
    Json(&'a Value),
    Scalar(&'a ScalarValue),
}

impl FieldValue<'_> {
    /// Coerce to `ty`; `None` for null or an unrepresentable value.
    pub fn to_scalar(&self, ty: ScalarType) -> Option<ScalarValue> {
        match self {
            FieldValue::Json(json) => ScalarValue::from_json(ty, json),
            FieldValue::Scalar(scalar) => scalar.coerce_to(ty),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Json(Value::Null))
    }
}

/// Anything key components can be looked up in by property name.
pub trait FieldSource {
    fn field(&self, name: &str) -> Option<FieldValue<'_>>;
}

#[derive(Debug, Clone)]
struct Fragments {
    column_definitions: String,
    primary_key: String,
    clustering_order: Option<String>,
    identity_clause: String,
    partition_clause: String,
    property_list: String,
    placeholders: String,
}

/// Ordered partition-key components plus ordered clustering-key components.
#[derive(Debug, Clone)]
pub struct KeyDefinition {
    partition: Vec<KeyComponent>,
    clustering: Vec<ClusteringKeyComponent>,
    fragments: OnceLock<Fragments>,
}

impl KeyDefinition {
    /// Build a definition; at least one partition component, unique names.
    pub fn new(
        partition: Vec<KeyComponent>,
        clustering: Vec<ClusteringKeyComponent>,
    ) -> DocResult<Self> {
        let definition = Self {
            partition,
            clustering,
            fragments: OnceLock::new(),
        };
        if definition.partition.is_empty() {
            return Err(DocError::key_definition(
                "at least one partition key component is required",
                &definition.to_dsl(),
            ));
        }
        let names = definition.property_names();
        for (i, name) in names.iter().enumerate() {
            if names[..i].contains(name) {
                return Err(DocError::key_definition(
                    format!("duplicate key component '{name}'"),
                    &definition.to_dsl(),
                ));
            }
        }
        Ok(definition)
    }

    /// Parse the key DSL, see [`KeyDefinitionParser`](crate::key::KeyDefinitionParser).
    pub fn parse(dsl: &str) -> DocResult<Self> {
        crate::key::parser::KeyDefinitionParser::parse(dsl)
    }

    /// Copy of this definition with one more clustering component appended.
    pub fn with_clustering(&self, component: ClusteringKeyComponent) -> DocResult<Self> {
        let mut clustering = self.clustering.clone();
        clustering.push(component);
        Self::new(self.partition.clone(), clustering)
    }

    pub fn partition_components(&self) -> &[KeyComponent] {
        &self.partition
    }

    pub fn clustering_components(&self) -> &[ClusteringKeyComponent] {
        &self.clustering
    }

    /// All components in key order.
    pub fn components(&self) -> impl Iterator<Item = &KeyComponent> {
        self.partition
            .iter()
            .chain(self.clustering.iter().map(|c| &c.component))
    }

    pub fn len(&self) -> usize {
        self.partition.len() + self.clustering.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn property_names(&self) -> Vec<&str> {
        self.components().map(|c| c.name.as_str()).collect()
    }

    fn fragments(&self) -> &Fragments {
        self.fragments.get_or_init(|| self.render())
    }

    fn render(&self) -> Fragments {
        let names = self.property_names();
        let column_definitions = self
            .components()
            .map(|c| format!("{} {}", c.name, c.scalar_type.cql_name()))
            .collect::<Vec<_>>()
            .join(", ");

        let partition_names: Vec<&str> = self.partition.iter().map(|c| c.name.as_str()).collect();
        let primary_key = if self.clustering.is_empty() {
            if partition_names.len() == 1 {
                format!("PRIMARY KEY ({})", partition_names[0])
            } else {
                format!("PRIMARY KEY (({}))", partition_names.join(", "))
            }
        } else {
            let clustering_names: Vec<&str> = self.clustering.iter().map(|c| c.name()).collect();
            format!(
                "PRIMARY KEY (({}), {})",
                partition_names.join(", "),
                clustering_names.join(", ")
            )
        };

        let clustering_order = self
            .clustering
            .iter()
            .any(|c| c.order == SortOrder::Descending)
            .then(|| {
                let parts: Vec<String> = self
                    .clustering
                    .iter()
                    .map(|c| format!("{} {}", c.name(), c.order.cql_name()))
                    .collect();
                format!("CLUSTERING ORDER BY ({})", parts.join(", "))
            });

        Fragments {
            column_definitions,
            primary_key,
            clustering_order,
            identity_clause: equality_clause(&names),
            partition_clause: equality_clause(&partition_names),
            property_list: names.join(", "),
            placeholders: vec!["?"; names.len()].join(", "),
        }
    }

    /// `"day int, hour int, minute int"`
    pub fn column_definitions(&self) -> &str {
        &self.fragments().column_definitions
    }

    /// `"PRIMARY KEY ((day, hour), minute)"`
    pub fn primary_key_clause(&self) -> &str {
        &self.fragments().primary_key
    }

    /// Only present when some clustering component is descending.
    pub fn clustering_order_clause(&self) -> Option<&str> {
        self.fragments().clustering_order.as_deref()
    }

    /// Equality binding every component: `"day = ? AND hour = ? AND minute = ?"`
    pub fn identity_clause(&self) -> &str {
        &self.fragments().identity_clause
    }

    /// Equality binding the partition components only.
    pub fn partition_clause(&self) -> &str {
        &self.fragments().partition_clause
    }

    /// Equality binding the first `n` components.
    pub fn prefix_clause(&self, n: usize) -> String {
        let names = self.property_names();
        equality_clause(&names[..n.min(names.len())])
    }

    /// `"day, hour, minute"`
    pub fn property_list(&self) -> &str {
        &self.fragments().property_list
    }

    /// `"?, ?, ?"`
    pub fn placeholders(&self) -> &str {
        &self.fragments().placeholders
    }

    /// Check an identifier's arity and component types against this key.
    pub fn validate(&self, identifier: &Identifier) -> DocResult<()> {
        self.validate_prefix(identifier, self.len())
    }

    /// Check that an identifier carries exactly the partition components.
    pub fn validate_partition(&self, identifier: &Identifier) -> DocResult<()> {
        self.validate_prefix(identifier, self.partition.len())
    }

    /// Check that an identifier carries exactly the first `n` components.
    pub fn validate_prefix(&self, identifier: &Identifier, n: usize) -> DocResult<()> {
        let expected: Vec<&KeyComponent> = self.components().take(n).collect();
        let matches = identifier.len() == expected.len()
            && expected
                .iter()
                .zip(identifier.values())
                .all(|(c, v)| c.scalar_type == v.scalar_type());
        if matches {
            return Ok(());
        }
        let expected_text = expected
            .iter()
            .map(|c| format!("{} {}", c.name, c.scalar_type))
            .collect::<Vec<_>>()
            .join(", ");
        let actual_text = identifier
            .scalar_types()
            .iter()
            .map(ScalarType::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        Err(DocError::InvalidIdentifier {
            expected: format!("({expected_text})"),
            actual: format!("({actual_text})"),
        })
    }

    /// Build an identifier from raw values, coercing each to its component's
    /// type (e.g. `Int` → `BigInt`, UUID text → `Uuid`).
    pub fn identifier_from_values(
        &self,
        values: impl IntoIterator<Item = ScalarValue>,
    ) -> DocResult<Identifier> {
        let raw: Vec<ScalarValue> = values.into_iter().collect();
        let coerced: Option<Vec<ScalarValue>> = (raw.len() == self.len())
            .then(|| {
                self.components()
                    .zip(&raw)
                    .map(|(c, v)| v.coerce_to(c.scalar_type))
                    .collect()
            })
            .flatten();
        match coerced {
            Some(values) => Ok(Identifier::new(values)),
            None => {
                let raw = Identifier::new(raw);
                self.validate(&raw)?;
                Ok(raw)
            }
        }
    }

    /// Partition part of a full identifier.
    pub fn partition_of(&self, identifier: &Identifier) -> Identifier {
        identifier.prefix(self.partition.len())
    }

    /// Build an identifier for this key from fields of a document.
    ///
    /// Returns `Ok(None)` when any component's field is absent or null, and a
    /// validation fault when a present field cannot be coerced to the
    /// component's type.
    pub fn extract(&self, source: &dyn FieldSource) -> DocResult<Option<Identifier>> {
        let mut values = Vec::with_capacity(self.len());
        for component in self.components() {
            let field = match source.field(&component.name) {
                Some(field) if !field.is_null() => field,
                _ => return Ok(None),
            };
            match field.to_scalar(component.scalar_type) {
                Some(value) => values.push(value),
                None => {
                    return Err(DocError::Validation(format!(
                        "field '{}' cannot be read as {}",
                        component.name, component.scalar_type
                    )));
                }
            }
        }
        Ok(Some(Identifier::new(values)))
    }

    /// Render back to the key DSL; `parse(to_dsl())` yields an equal definition.
    pub fn to_dsl(&self) -> String {
        let partition = self
            .partition
            .iter()
            .map(|c| format!("{}:{}", c.name, c.scalar_type))
            .collect::<Vec<_>>()
            .join(", ");
        let mut dsl = format!("({partition})");
        for c in &self.clustering {
            let sign = if c.order == SortOrder::Descending { "-" } else { "" };
            dsl.push_str(&format!(", {sign}{}:{}", c.name(), c.component.scalar_type));
        }
        dsl
    }
}

fn equality_clause(names: &[&str]) -> String {
    names
        .iter()
        .map(|n| format!("{n} = ?"))
        .collect::<Vec<_>>()
        .join(" AND ")
}

impl PartialEq for KeyDefinition {
    fn eq(&self, other: &Self) -> bool {
        self.partition == other.partition && self.clustering == other.clustering
    }
}

impl Eq for KeyDefinition {}

impl fmt::Display for KeyDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_dsl())
    }
}
