//! View metadata repository (`sys_views`).

use crate::cql::{ColumnSpec, ColumnType, RowLayout, drop_table_statement};
use crate::document::repository::{Capabilities, DocumentRepository};
use crate::error::{DocError, DocResult};
use crate::index::bucketed::SOURCE_ID_COLUMN;
use crate::key::ScalarValue;
use crate::schema::model::{TableId, View};
use crate::schema::{compensate, decode_record, encode_record};
use crate::session::Session;
use std::sync::Arc;
use tracing::{info, instrument};

pub const SYS_VIEWS: &str = "sys_views";
const SYS_VIEWS_KEY: &str = "(database:text, table:text), name:text";

pub struct ViewRepository {
    session: Arc<dyn Session>,
    keyspace: String,
    records: DocumentRepository,
}

impl ViewRepository {
    pub fn new(session: Arc<dyn Session>, keyspace: impl Into<String>) -> DocResult<Self> {
        let keyspace = keyspace.into();
        let records =
            DocumentRepository::from_dsl(Arc::clone(&session), keyspace.clone(), SYS_VIEWS, SYS_VIEWS_KEY)?;
        Ok(Self {
            session,
            keyspace,
            records,
        })
    }

    /// Default TTL of the metadata rows, applied when the system table is
    /// created.
    pub fn with_record_ttl(mut self, ttl: Option<u32>) -> Self {
        self.records = self.records.with_ttl(ttl);
        self
    }

    pub async fn create_system_table(&self) -> DocResult<bool> {
        self.records.create_table().await
    }

    /// Repository over the view's projection table; written by upserts only.
    ///
    /// Each row also records the identifier of the source document that
    /// last wrote it (`source_id`).
    pub fn storage(&self, view: &View) -> DocResult<DocumentRepository> {
        let layout = RowLayout::document(Arc::new(view.key_definition()?))
            .with_column(ColumnSpec::new(SOURCE_ID_COLUMN, ColumnType::Blob));
        Ok(DocumentRepository::with_layout(
            Arc::clone(&self.session),
            self.keyspace.clone(),
            view.physical_name(),
            layout,
            Capabilities::VIEW,
        )
        .with_ttl(view.ttl))
    }

    /// Provision the projection table, then persist the record; a table
    /// created by this call is dropped again if the record cannot be stored.
    #[instrument(skip(self, view), fields(table = %view.table_id(), view = %view.name))]
    pub async fn create(&self, view: &View) -> DocResult<View> {
        view.validate()?;
        let storage = self.storage(view)?;
        let created = storage.create_table().await?;
        if let Err(e) = self
            .records
            .create(&encode_record(view.identifier(), view)?)
            .await
        {
            if created {
                compensate(storage.drop_table().await, storage.table());
            }
            return Err(e);
        }
        info!(physical = storage.table(), created, "view registered");
        Ok(view.clone())
    }

    pub async fn find(&self, table: &TableId, name: &str) -> DocResult<Option<View>> {
        let key = table.identifier().with(ScalarValue::from(name));
        self.records
            .find(&key)
            .await?
            .map(|doc| decode_record(&doc))
            .transpose()
    }

    pub async fn read(&self, table: &TableId, name: &str) -> DocResult<View> {
        self.find(table, name).await?.ok_or_else(|| DocError::ItemNotFound {
            table: SYS_VIEWS.to_string(),
            identifier: format!("{table}.{name}"),
        })
    }

    /// Every view of a table.
    pub async fn list(&self, table: &TableId) -> DocResult<Vec<View>> {
        self.records
            .read_all(&table.identifier())
            .await?
            .iter()
            .map(decode_record)
            .collect()
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, table: &TableId, name: &str) -> DocResult<bool> {
        let Some(view) = self.find(table, name).await? else {
            return Ok(false);
        };
        self.session
            .execute_statement(
                &drop_table_statement(&self.keyspace, &view.physical_name()),
                Vec::new(),
            )
            .await?;
        self.records.delete(&view.identifier()).await?;
        info!(view = name, "view deleted");
        Ok(true)
    }
}
