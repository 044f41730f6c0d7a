//! Schema lifecycle: Table, View and Index metadata and the physical
//! tables they own.
//!
//! Creating a record provisions its physical table first and persists the
//! record second. If the second step fails, a physical table created by the
//! same call is dropped again; one that already existed is left alone.

pub mod indexes;
pub mod model;
pub mod tables;
pub mod views;

pub use indexes::{IndexRepository, SYS_INDEXES};
pub use model::{Index, IndexEngine, IndexField, Table, TableId, View, validate_name};
pub use tables::{SYS_TABLES, TableRepository};
pub use views::{SYS_VIEWS, ViewRepository};

use crate::document::entity::Document;
use crate::error::{DocError, DocResult};
use crate::index::BucketPartitioner;
use crate::key::Identifier;
use crate::session::Session;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{info, instrument, warn};

pub(crate) fn encode_record<T: Serialize>(identifier: Identifier, record: &T) -> DocResult<Document> {
    Document::from_json(identifier, &serde_json::to_value(record)?)
}

pub(crate) fn decode_record<T: DeserializeOwned>(document: &Document) -> DocResult<T> {
    let content = document.content()?.ok_or_else(|| {
        DocError::Storage(format!(
            "metadata record {} has no payload",
            document.identifier
        ))
    })?;
    Ok(serde_json::from_value(content)?)
}

/// Log the outcome of a compensating drop; the original error is what the
/// caller sees.
pub(crate) fn compensate(result: DocResult<bool>, table: &str) {
    match result {
        Ok(_) => warn!(table, "metadata write failed, dropped newly created table"),
        Err(e) => warn!(table, error = %e, "metadata write failed and compensating drop failed"),
    }
}

/// The three metadata repositories, with the cross-record rules.
pub struct SchemaCatalog {
    tables: TableRepository,
    views: ViewRepository,
    indexes: IndexRepository,
}

impl SchemaCatalog {
    pub fn new(
        session: Arc<dyn Session>,
        keyspace: &str,
        partitioner: Arc<BucketPartitioner>,
    ) -> DocResult<Self> {
        Ok(Self {
            tables: TableRepository::new(Arc::clone(&session), keyspace)?,
            views: ViewRepository::new(Arc::clone(&session), keyspace)?,
            indexes: IndexRepository::new(session, keyspace, partitioner)?,
        })
    }

    pub fn with_system_ttl(self, ttl: Option<u32>) -> Self {
        Self {
            tables: self.tables.with_record_ttl(ttl),
            views: self.views.with_record_ttl(ttl),
            indexes: self.indexes.with_record_ttl(ttl),
        }
    }

    /// Create the system tables if missing.
    pub async fn bootstrap(&self) -> DocResult<()> {
        let created = [
            self.tables.create_system_table().await?,
            self.views.create_system_table().await?,
            self.indexes.create_system_table().await?,
        ];
        info!(
            created = created.iter().filter(|c| **c).count(),
            "system tables ready"
        );
        Ok(())
    }

    pub fn tables(&self) -> &TableRepository {
        &self.tables
    }

    pub fn views(&self) -> &ViewRepository {
        &self.views
    }

    pub fn indexes(&self) -> &IndexRepository {
        &self.indexes
    }

    pub async fn create_table(&self, table: &Table) -> DocResult<Table> {
        self.tables.create(table).await
    }

    /// Delete a table together with its views and indexes.
    #[instrument(skip(self), fields(table = %id))]
    pub async fn delete_table(&self, id: &TableId) -> DocResult<bool> {
        if self.tables.find(id).await?.is_none() {
            return Ok(false);
        }
        for view in self.views.list(id).await? {
            self.views.delete(id, &view.name).await?;
        }
        for index in self.indexes.list(id).await? {
            self.indexes.delete(id, &index.name).await?;
        }
        self.tables.delete(id).await
    }

    /// Requires the table to exist.
    pub async fn create_view(&self, view: &View) -> DocResult<View> {
        view.validate()?;
        self.tables.read(&view.table_id()).await?;
        self.views.create(view).await
    }

    pub async fn delete_view(&self, table: &TableId, name: &str) -> DocResult<bool> {
        self.views.delete(table, name).await
    }

    /// Requires the table to exist.
    pub async fn create_index(&self, index: &Index) -> DocResult<Index> {
        index.validate()?;
        let table = self.tables.read(&index.table_id()).await?;
        self.indexes.create(index, &table).await
    }

    pub async fn delete_index(&self, table: &TableId, name: &str) -> DocResult<bool> {
        self.indexes.delete(table, name).await
    }
}
