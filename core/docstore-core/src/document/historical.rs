//! Append-only document repository.
//!
//! Every write appends a new row under an extra descending `written_at`
//! timeuuid clustering component, so the newest version of an identifier is
//! the first row of its key prefix. Deletes append a tombstone version;
//! rows are never updated or removed in place.

use crate::cql::{ColumnSpec, ColumnType, CqlValue, Operation, Row, RowLayout};
use crate::document::entity::{Document, HistoricalDocument, now_millis};
use crate::document::repository::{Capabilities, DocumentRepository, document_columns};
use crate::error::{DocError, DocResult};
use crate::key::{
    ClusteringKeyComponent, Identifier, KeyDefinition, ScalarType, ScalarValue, SortOrder,
    TimeUuidGenerator,
};
use crate::session::Session;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::instrument;

pub const WRITTEN_AT_COLUMN: &str = "written_at";
pub const DELETED_COLUMN: &str = "deleted";
pub const DELETED_AT_COLUMN: &str = "deleted_at";

pub struct HistoricalRepository {
    inner: DocumentRepository,
    key: Arc<KeyDefinition>,
}

impl HistoricalRepository {
    /// `key` is the caller-facing key; the stored key appends `-written_at:timeuuid`.
    pub fn new(
        session: Arc<dyn Session>,
        keyspace: impl Into<String>,
        table: impl Into<String>,
        key: Arc<KeyDefinition>,
    ) -> DocResult<Self> {
        let stored = key.with_clustering(ClusteringKeyComponent::new(
            WRITTEN_AT_COLUMN,
            ScalarType::TimeUuid,
            SortOrder::Descending,
        ))?;
        let layout = RowLayout::document(Arc::new(stored))
            .with_column(ColumnSpec::new(DELETED_COLUMN, ColumnType::Boolean))
            .with_column(ColumnSpec::new(
                DELETED_AT_COLUMN,
                ColumnType::Scalar(ScalarType::Timestamp),
            ));
        Ok(Self {
            inner: DocumentRepository::with_layout(
                session,
                keyspace,
                table,
                layout,
                Capabilities::HISTORICAL,
            ),
            key,
        })
    }

    pub fn from_dsl(
        session: Arc<dyn Session>,
        keyspace: impl Into<String>,
        table: impl Into<String>,
        dsl: &str,
    ) -> DocResult<Self> {
        Self::new(session, keyspace, table, Arc::new(KeyDefinition::parse(dsl)?))
    }

    pub fn with_ttl(mut self, ttl: Option<u32>) -> Self {
        self.inner = self.inner.with_ttl(ttl);
        self
    }

    pub fn key(&self) -> &Arc<KeyDefinition> {
        &self.key
    }

    pub fn table(&self) -> &str {
        self.inner.table()
    }

    pub fn capabilities(&self) -> Capabilities {
        self.inner.capabilities()
    }

    pub async fn create_table(&self) -> DocResult<bool> {
        self.inner.create_table().await
    }

    pub async fn drop_table(&self) -> DocResult<bool> {
        self.inner.drop_table().await
    }

    /// Not available on an append-only table.
    pub async fn create(&self, _document: &Document) -> DocResult<Document> {
        Err(self.unsupported("create"))
    }

    /// Not available on an append-only table.
    pub async fn update(&self, _document: &Document) -> DocResult<Document> {
        Err(self.unsupported("update"))
    }

    /// Append a new version.
    #[instrument(skip(self, document), fields(table = %self.table(), id = %document.identifier))]
    pub async fn upsert(&self, document: &Document) -> DocResult<HistoricalDocument> {
        self.key.validate(&document.identifier)?;
        let now = now_millis();
        let written = Document {
            created_at: Some(document.created_at.unwrap_or(now)),
            updated_at: Some(now),
            ..document.clone()
        };
        self.append(written, false, None).await
    }

    /// Append a tombstone; `false` when there is no live version to delete.
    #[instrument(skip(self), fields(table = %self.table()))]
    pub async fn delete(&self, identifier: &Identifier) -> DocResult<bool> {
        self.key.validate(identifier)?;
        let Some(latest) = self.latest(identifier).await? else {
            return Ok(false);
        };
        if latest.deleted {
            return Ok(false);
        }
        let now = now_millis();
        let tombstone = Document {
            identifier: identifier.clone(),
            payload: None,
            created_at: latest.document.created_at,
            updated_at: Some(now),
        };
        self.append(tombstone, true, Some(now)).await?;
        Ok(true)
    }

    /// Newest live version; `ItemNotFound` when absent or deleted.
    pub async fn read(&self, identifier: &Identifier) -> DocResult<Document> {
        self.key.validate(identifier)?;
        match self.latest(identifier).await? {
            Some(version) if !version.deleted => Ok(version.document),
            _ => Err(DocError::ItemNotFound {
                table: self.table().to_string(),
                identifier: identifier.to_string(),
            }),
        }
    }

    pub async fn exists(&self, identifier: &Identifier) -> DocResult<bool> {
        match self.read(identifier).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Every version, newest first, tombstones included.
    pub async fn read_history(&self, identifier: &Identifier) -> DocResult<Vec<HistoricalDocument>> {
        self.key.validate(identifier)?;
        let rows = self.inner.select_prefix(identifier, None).await?;
        rows.iter().map(|row| self.to_version(row)).collect()
    }

    /// Newest live version of every identifier in one partition.
    pub async fn read_all(&self, partition: &Identifier) -> DocResult<Vec<Document>> {
        self.key.validate_partition(partition)?;
        let rows = self.inner.select_prefix(partition, None).await?;
        let mut seen = HashSet::new();
        let mut documents = Vec::new();
        for row in &rows {
            let version = self.to_version(row)?;
            if !seen.insert(version.document.identifier.clone()) {
                continue;
            }
            if !version.deleted {
                documents.push(version.document);
            }
        }
        Ok(documents)
    }

    async fn latest(&self, identifier: &Identifier) -> DocResult<Option<HistoricalDocument>> {
        let rows = self.inner.select_prefix(identifier, Some(1)).await?;
        rows.first().map(|row| self.to_version(row)).transpose()
    }

    async fn append(
        &self,
        document: Document,
        deleted: bool,
        deleted_at: Option<chrono::DateTime<chrono::Utc>>,
    ) -> DocResult<HistoricalDocument> {
        let written_at = TimeUuidGenerator::global().next();
        let stored_id = document
            .identifier
            .with(ScalarValue::TimeUuid(written_at));
        let mut columns = document_columns(&document);
        columns.insert(DELETED_COLUMN, CqlValue::Boolean(deleted));
        columns.insert(DELETED_AT_COLUMN, CqlValue::timestamp(deleted_at));
        let values = self.inner.bind_row(&stored_id, columns);
        self.inner.execute(Operation::Upsert, values).await?;
        Ok(HistoricalDocument {
            document,
            written_at,
            deleted,
            deleted_at,
        })
    }

    fn to_version(&self, row: &Row) -> DocResult<HistoricalDocument> {
        let stored = self.inner.to_document(row)?;
        let written_at = match stored.identifier.values().last() {
            Some(ScalarValue::TimeUuid(uuid)) => *uuid,
            other => {
                return Err(DocError::Storage(format!(
                    "expected a timeuuid version component, got {other:?}"
                )));
            }
        };
        Ok(HistoricalDocument {
            document: stored.with_identifier(stored.identifier.prefix(self.key.len())),
            written_at,
            deleted: row.boolean(DELETED_COLUMN)?,
            deleted_at: row.timestamp(DELETED_AT_COLUMN)?,
        })
    }

    fn unsupported(&self, operation: &str) -> DocError {
        DocError::Unsupported {
            operation: operation.to_string(),
            table: self.table().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::WideColumnStore;
    use serde_json::json;

    async fn repository() -> HistoricalRepository {
        let session: Arc<dyn Session> = Arc::new(WideColumnStore::open_temporary().unwrap());
        let repo = HistoricalRepository::from_dsl(session, "ks", "audit", "(account:text), seq:int")
            .unwrap();
        repo.create_table().await.unwrap();
        repo
    }

    fn id(account: &str, seq: i32) -> Identifier {
        Identifier::new([ScalarValue::from(account), ScalarValue::Int(seq)])
    }

    #[tokio::test]
    async fn test_create_and_update_are_unsupported() {
        let repo = repository().await;
        let doc = Document::new(id("a", 1), None);
        assert!(matches!(
            repo.create(&doc).await,
            Err(DocError::Unsupported { .. })
        ));
        assert!(matches!(
            repo.update(&doc).await,
            Err(DocError::Unsupported { .. })
        ));
        assert!(repo.capabilities().append_only);
    }

    #[tokio::test]
    async fn test_versions_accumulate_newest_first() {
        let repo = repository().await;
        for v in 1..=3 {
            repo.upsert(&Document::from_json(id("a", 1), &json!({"v": v})).unwrap())
                .await
                .unwrap();
        }
        let latest = repo.read(&id("a", 1)).await.unwrap();
        assert_eq!(latest.content().unwrap(), Some(json!({"v": 3})));

        let history = repo.read_history(&id("a", 1)).await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[2].document.content().unwrap(), Some(json!({"v": 1})));
        assert!(history[0].written_at != history[1].written_at);
        assert_eq!(history[0].document.identifier, id("a", 1));
    }

    #[tokio::test]
    async fn test_delete_appends_tombstone() {
        let repo = repository().await;
        repo.upsert(&Document::new(id("a", 1), None)).await.unwrap();
        assert!(repo.delete(&id("a", 1)).await.unwrap());
        assert!(!repo.delete(&id("a", 1)).await.unwrap());
        assert!(!repo.exists(&id("a", 1)).await.unwrap());

        let history = repo.read_history(&id("a", 1)).await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[0].deleted);
        assert!(history[0].deleted_at.is_some());
        assert!(!history[1].deleted);

        repo.upsert(&Document::new(id("a", 1), None)).await.unwrap();
        assert!(repo.exists(&id("a", 1)).await.unwrap());
    }

    #[tokio::test]
    async fn test_read_all_keeps_latest_live_versions() {
        let repo = repository().await;
        repo.upsert(&Document::from_json(id("a", 1), &json!({"v": 1})).unwrap())
            .await
            .unwrap();
        repo.upsert(&Document::from_json(id("a", 1), &json!({"v": 2})).unwrap())
            .await
            .unwrap();
        repo.upsert(&Document::new(id("a", 2), None)).await.unwrap();
        repo.upsert(&Document::new(id("a", 3), None)).await.unwrap();
        repo.delete(&id("a", 3)).await.unwrap();

        let all = repo.read_all(&Identifier::of("a")).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].identifier, id("a", 1));
        assert_eq!(all[0].content().unwrap(), Some(json!({"v": 2})));
        assert_eq!(all[1].identifier, id("a", 2));
    }
}
