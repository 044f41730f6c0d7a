//! BucketedViewIndex: secondary index stored in a bucketed wide-row table.
//!
//! Index table key: partition `(bucket_id bigint)`, then the indexed fields
//! as clustering columns in their declared direction. Non-unique indexes
//! append the owning document's identifier components (`doc_<name>`) so
//! entries for equal field values do not collide. Each entry carries the
//! owning identifier and the payload, so lookups need no join.

use crate::cql::{ColumnSpec, ColumnType, CqlValue, Operation, Row, RowLayout, UPDATED_AT_COLUMN};
use crate::document::codec::DocumentFields;
use crate::document::entity::{Document, now_millis};
use crate::document::repository::{
    Capabilities, DocumentRepository, document_columns, key_values,
};
use crate::error::{DocError, DocResult};
use crate::index::bucket::BucketPartitioner;
use crate::key::{
    ClusteringKeyComponent, FieldSource, Identifier, KeyComponent, KeyDefinition, ScalarType,
    ScalarValue, SortOrder,
};
use crate::schema::model::{Index, IndexField};
use crate::session::Session;
use std::sync::Arc;
use tracing::{debug, instrument};

pub const BUCKET_COLUMN: &str = "bucket_id";
pub const SOURCE_ID_COLUMN: &str = "source_id";
const SOURCE_PREFIX: &str = "doc_";

pub struct BucketedViewIndex {
    name: String,
    repository: DocumentRepository,
    fields: Vec<IndexField>,
    source_key: Arc<KeyDefinition>,
    partitioner: Arc<BucketPartitioner>,
    unique: bool,
    case_sensitive: bool,
}

impl BucketedViewIndex {
    /// Index over documents keyed by `source_key`.
    pub fn new(
        session: Arc<dyn Session>,
        keyspace: impl Into<String>,
        index: &Index,
        source_key: Arc<KeyDefinition>,
        partitioner: Arc<BucketPartitioner>,
    ) -> DocResult<Self> {
        let fields = index.parsed_fields()?;
        if fields.is_empty() {
            return Err(DocError::Validation(format!(
                "index '{}' declares no fields",
                index.name
            )));
        }

        let mut clustering: Vec<ClusteringKeyComponent> = fields
            .iter()
            .map(|f| ClusteringKeyComponent::new(f.column_name(), f.scalar_type, f.order))
            .collect();
        if !index.unique {
            clustering.extend(source_key.components().map(|c| {
                ClusteringKeyComponent::new(
                    format!("{SOURCE_PREFIX}{}", c.name),
                    c.scalar_type,
                    SortOrder::Ascending,
                )
            }));
        }
        let key = KeyDefinition::new(
            vec![KeyComponent::new(BUCKET_COLUMN, ScalarType::BigInt)],
            clustering,
        )?;
        let layout = RowLayout::document(Arc::new(key))
            .with_column(ColumnSpec::new(SOURCE_ID_COLUMN, ColumnType::Blob));

        Ok(Self {
            name: index.name.clone(),
            repository: DocumentRepository::with_layout(
                session,
                keyspace,
                index.physical_name(),
                layout,
                Capabilities::VIEW,
            ),
            fields,
            source_key,
            partitioner,
            unique: index.unique,
            case_sensitive: index.case_sensitive,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &str {
        self.repository.table()
    }

    pub fn is_unique(&self) -> bool {
        self.unique
    }

    pub fn fields(&self) -> &[IndexField] {
        &self.fields
    }

    pub async fn create_table(&self) -> DocResult<bool> {
        self.repository.create_table().await
    }

    pub async fn drop_table(&self) -> DocResult<bool> {
        self.repository.drop_table().await
    }

    fn normalize(&self, value: ScalarValue) -> ScalarValue {
        if self.case_sensitive {
            value
        } else {
            value.case_folded()
        }
    }

    /// Index-table identifier of a document's entry; `None` when an indexed
    /// field is absent or null.
    pub fn entry_key(&self, document: &Document) -> DocResult<Option<Identifier>> {
        let fields = DocumentFields::new(document, &self.source_key)?;
        let mut values = Vec::with_capacity(self.fields.len() + 1);
        for field in &self.fields {
            let value = match fields.field(&field.path) {
                Some(value) if !value.is_null() => value,
                _ => return Ok(None),
            };
            let scalar = value.to_scalar(field.scalar_type).ok_or_else(|| {
                DocError::Validation(format!(
                    "index '{}': field '{}' cannot be read as {}",
                    self.name, field.path, field.scalar_type
                ))
            })?;
            values.push(self.normalize(scalar));
        }
        Ok(Some(self.entry_identifier(values, &document.identifier)))
    }

    fn entry_identifier(&self, values: Vec<ScalarValue>, source: &Identifier) -> Identifier {
        let bucket = self.partitioner.bucket_for(&values[0]);
        let mut components = vec![ScalarValue::BigInt(bucket)];
        components.extend(values);
        if !self.unique {
            components.extend(source.values().iter().cloned());
        }
        Identifier::new(components)
    }

    /// Write the entry for a newly stored document.
    ///
    /// Returns the entry identifier, or `None` when the document does not
    /// carry every indexed field. A unique index raises `DuplicateItem` when
    /// the entry belongs to another document.
    #[instrument(skip(self, document), fields(index = %self.name, id = %document.identifier))]
    pub async fn insert(&self, document: &Document) -> DocResult<Option<Identifier>> {
        let Some(entry) = self.entry_key(document)? else {
            return Ok(None);
        };
        self.write_entry(&entry, document).await?;
        Ok(Some(entry))
    }

    /// Move the entry from `previous` content to `current` content.
    ///
    /// The old entry is deleted when its key changed; the new entry is then
    /// written (re-written when unchanged, to refresh the carried payload).
    #[instrument(skip(self, previous, current), fields(index = %self.name, id = %current.identifier))]
    pub async fn update(
        &self,
        previous: Option<&Document>,
        current: &Document,
    ) -> DocResult<Option<Identifier>> {
        let old_entry = match previous {
            Some(previous) => self.entry_key(previous)?,
            None => None,
        };
        let new_entry = self.entry_key(current)?;
        if let Some(old) = &old_entry
            && Some(old) != new_entry.as_ref()
        {
            debug!(index = %self.name, "index key changed");
            self.delete_entry(old, &current.identifier).await?;
        }
        if let Some(entry) = &new_entry {
            self.write_entry(entry, current).await?;
        }
        Ok(new_entry)
    }

    /// Remove a deleted document's entry.
    #[instrument(skip(self, document), fields(index = %self.name, id = %document.identifier))]
    pub async fn remove(&self, document: &Document) -> DocResult<Option<Identifier>> {
        let Some(entry) = self.entry_key(document)? else {
            return Ok(None);
        };
        self.delete_entry(&entry, &document.identifier).await?;
        Ok(Some(entry))
    }

    /// Documents whose leading indexed fields equal `values`, carried
    /// payloads included. At least the first field must be given.
    pub async fn lookup(&self, values: &[ScalarValue]) -> DocResult<Vec<Document>> {
        if values.is_empty() || values.len() > self.fields.len() {
            return Err(DocError::Validation(format!(
                "index '{}' lookup takes 1..={} values, got {}",
                self.name,
                self.fields.len(),
                values.len()
            )));
        }
        let mut coerced = Vec::with_capacity(values.len());
        for (field, value) in self.fields.iter().zip(values) {
            let scalar = value.coerce_to(field.scalar_type).ok_or_else(|| {
                DocError::Validation(format!(
                    "index '{}': value {value} cannot be read as {}",
                    self.name, field.scalar_type
                ))
            })?;
            coerced.push(self.normalize(scalar));
        }
        let bucket = self.partitioner.bucket_for(&coerced[0]);
        let prefix = Identifier::new(std::iter::once(ScalarValue::BigInt(bucket)).chain(coerced));
        let rows = self.repository.select_prefix(&prefix, None).await?;
        rows.iter().map(|row| self.source_document(row)).collect()
    }

    async fn write_entry(&self, entry: &Identifier, document: &Document) -> DocResult<()> {
        let now = now_millis();
        let mut columns = document_columns(document);
        columns.insert(
            UPDATED_AT_COLUMN,
            CqlValue::timestamp(Some(document.updated_at.unwrap_or(now))),
        );
        columns.insert(SOURCE_ID_COLUMN, CqlValue::Blob(document.identifier.to_bytes()?));
        let values = self.repository.bind_row(entry, columns);

        if !self.unique {
            self.repository.execute(Operation::Upsert, values).await?;
            return Ok(());
        }

        let result = self.repository.execute(Operation::Insert, values.clone()).await?;
        if result.applied {
            return Ok(());
        }
        let owner = match result.first() {
            Some(row) => Some(self.owner_of(row)?),
            None => None,
        };
        if owner.as_ref() == Some(&document.identifier) {
            // Same document: refresh the carried payload.
            self.repository.execute(Operation::Upsert, values).await?;
            return Ok(());
        }
        Err(DocError::DuplicateItem {
            table: self.repository.table().to_string(),
            identifier: entry.to_string(),
        })
    }

    async fn delete_entry(&self, entry: &Identifier, source: &Identifier) -> DocResult<()> {
        if self.unique {
            // Only the owner may remove a unique entry.
            let Some(row) = self
                .repository
                .execute(Operation::Select, key_values(entry))
                .await?
                .rows
                .into_iter()
                .next()
            else {
                return Ok(());
            };
            if &self.owner_of(&row)? != source {
                return Ok(());
            }
        }
        self.repository
            .execute(Operation::Delete, key_values(entry))
            .await?;
        Ok(())
    }

    fn owner_of(&self, row: &Row) -> DocResult<Identifier> {
        source_owner(row, self.table())
    }

    fn source_document(&self, row: &Row) -> DocResult<Document> {
        let entry = self.repository.to_document(row)?;
        Ok(entry.with_identifier(self.owner_of(row)?))
    }
}

/// Identifier of the source document a derived row was written for.
pub(crate) fn source_owner(row: &Row, table: &str) -> DocResult<Identifier> {
    let bytes = row
        .blob(SOURCE_ID_COLUMN)?
        .ok_or_else(|| DocError::Storage(format!("derived row in '{table}' has no source id")))?;
    Identifier::from_bytes(bytes)
}
