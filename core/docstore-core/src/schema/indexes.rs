//! Index metadata repository (`sys_indexes`).

use crate::cql::drop_table_statement;
use crate::document::repository::DocumentRepository;
use crate::error::{DocError, DocResult};
use crate::index::{BucketPartitioner, BucketedViewIndex};
use crate::key::{KeyDefinition, ScalarValue};
use crate::schema::model::{Index, Table, TableId};
use crate::schema::{compensate, decode_record, encode_record};
use crate::session::Session;
use std::sync::Arc;
use tracing::{info, instrument};

pub const SYS_INDEXES: &str = "sys_indexes";
const SYS_INDEXES_KEY: &str = "(database:text, table:text), name:text";

pub struct IndexRepository {
    session: Arc<dyn Session>,
    keyspace: String,
    records: DocumentRepository,
    partitioner: Arc<BucketPartitioner>,
}

impl IndexRepository {
    pub fn new(
        session: Arc<dyn Session>,
        keyspace: impl Into<String>,
        partitioner: Arc<BucketPartitioner>,
    ) -> DocResult<Self> {
        let keyspace = keyspace.into();
        let records = DocumentRepository::from_dsl(
            Arc::clone(&session),
            keyspace.clone(),
            SYS_INDEXES,
            SYS_INDEXES_KEY,
        )?;
        Ok(Self {
            session,
            keyspace,
            records,
            partitioner,
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

    pub fn partitioner(&self) -> &Arc<BucketPartitioner> {
        &self.partitioner
    }

    /// Bucketed index over documents keyed by `source_key`.
    pub fn bucketed(
        &self,
        index: &Index,
        source_key: Arc<KeyDefinition>,
    ) -> DocResult<BucketedViewIndex> {
        BucketedViewIndex::new(
            Arc::clone(&self.session),
            self.keyspace.clone(),
            index,
            source_key,
            Arc::clone(&self.partitioner),
        )
    }

    /// Provision the bucket table (none for external engines), then persist
    /// the record. A bucket table created by this call is dropped again if
    /// the record cannot be stored.
    ///
    /// At most one index per external engine may exist on a table.
    #[instrument(skip(self, index, table), fields(table = %index.table_id(), index = %index.name))]
    pub async fn create(&self, index: &Index, table: &Table) -> DocResult<Index> {
        index.validate()?;
        if index.engine.is_external() {
            let existing = self.list(&index.table_id()).await?;
            if let Some(other) = existing
                .iter()
                .find(|i| i.engine == index.engine && i.name != index.name)
            {
                return Err(DocError::ConstraintViolation(format!(
                    "table {} already has a {:?} index '{}'",
                    index.table_id(),
                    index.engine,
                    other.name
                )));
            }
        }

        let storage = if index.engine.is_external() {
            None
        } else {
            Some(self.bucketed(index, Arc::new(table.key_definition()?))?)
        };
        let created = match &storage {
            Some(bucketed) => bucketed.create_table().await?,
            None => false,
        };

        if let Err(e) = self
            .records
            .create(&encode_record(index.identifier(), index)?)
            .await
        {
            if let Some(bucketed) = storage.as_ref().filter(|_| created) {
                compensate(bucketed.drop_table().await, bucketed.table());
            }
            return Err(e);
        }
        info!(engine = ?index.engine, created, "index registered");
        Ok(index.clone())
    }

    pub async fn find(&self, table: &TableId, name: &str) -> DocResult<Option<Index>> {
        let key = table.identifier().with(ScalarValue::from(name));
        self.records
            .find(&key)
            .await?
            .map(|doc| decode_record(&doc))
            .transpose()
    }

    pub async fn read(&self, table: &TableId, name: &str) -> DocResult<Index> {
        self.find(table, name).await?.ok_or_else(|| DocError::ItemNotFound {
            table: SYS_INDEXES.to_string(),
            identifier: format!("{table}.{name}"),
        })
    }

    /// Every index of a table (a full partition scan of `sys_indexes`).
    pub async fn list(&self, table: &TableId) -> DocResult<Vec<Index>> {
        self.records
            .read_all(&table.identifier())
            .await?
            .iter()
            .map(decode_record)
            .collect()
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, table: &TableId, name: &str) -> DocResult<bool> {
        let Some(index) = self.find(table, name).await? else {
            return Ok(false);
        };
        if !index.engine.is_external() {
            self.session
                .execute_statement(
                    &drop_table_statement(&self.keyspace, &index.physical_name()),
                    Vec::new(),
                )
                .await?;
        }
        self.records.delete(&index.identifier()).await?;
        info!(index = name, "index deleted");
        Ok(true)
    }
}
