//! Table metadata repository (`sys_tables`).

use crate::document::repository::DocumentRepository;
use crate::error::{DocError, DocResult};
use crate::key::Identifier;
use crate::schema::model::{Table, TableId};
use crate::schema::{compensate, decode_record, encode_record};
use crate::session::Session;
use std::sync::Arc;
use tracing::{info, instrument};

pub const SYS_TABLES: &str = "sys_tables";
const SYS_TABLES_KEY: &str = "(database:text), name:text";

pub struct TableRepository {
    session: Arc<dyn Session>,
    keyspace: String,
    records: DocumentRepository,
}

impl TableRepository {
    pub fn new(session: Arc<dyn Session>, keyspace: impl Into<String>) -> DocResult<Self> {
        let keyspace = keyspace.into();
        let records =
            DocumentRepository::from_dsl(Arc::clone(&session), keyspace.clone(), SYS_TABLES, SYS_TABLES_KEY)?;
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

    /// Repository over the table's documents.
    pub fn storage(&self, table: &Table) -> DocResult<DocumentRepository> {
        Ok(DocumentRepository::new(
            Arc::clone(&self.session),
            self.keyspace.clone(),
            table.id().physical_name(),
            Arc::new(table.key_definition()?),
        )
        .with_ttl(table.ttl))
    }

    /// Provision the document table, then persist the record.
    ///
    /// When the record cannot be persisted, a document table created by
    /// this call is dropped again.
    #[instrument(skip(self, table), fields(table = %table.id()))]
    pub async fn create(&self, table: &Table) -> DocResult<Table> {
        table.validate()?;
        let storage = self.storage(table)?;
        let created = storage.create_table().await?;
        if let Err(e) = self
            .records
            .create(&encode_record(table.identifier(), table)?)
            .await
        {
            if created {
                compensate(storage.drop_table().await, storage.table());
            }
            return Err(e);
        }
        info!(physical = storage.table(), created, "table registered");
        Ok(table.clone())
    }

    pub async fn find(&self, id: &TableId) -> DocResult<Option<Table>> {
        id.validate()?;
        self.records
            .find(&id.identifier())
            .await?
            .map(|doc| decode_record(&doc))
            .transpose()
    }

    pub async fn read(&self, id: &TableId) -> DocResult<Table> {
        self.find(id).await?.ok_or_else(|| DocError::ItemNotFound {
            table: SYS_TABLES.to_string(),
            identifier: id.to_string(),
        })
    }

    /// Every table of a database.
    pub async fn list(&self, database: &str) -> DocResult<Vec<Table>> {
        self.records
            .read_all(&Identifier::of(database))
            .await?
            .iter()
            .map(decode_record)
            .collect()
    }

    /// Drop the document table and remove the record; `false` when no
    /// record exists.
    #[instrument(skip(self), fields(table = %id))]
    pub async fn delete(&self, id: &TableId) -> DocResult<bool> {
        let Some(table) = self.find(id).await? else {
            return Ok(false);
        };
        self.storage(&table)?.drop_table().await?;
        self.records.delete(&table.identifier()).await?;
        info!("table deleted");
        Ok(true)
    }
}
