//! DocumentRepository: key-definition-driven CRUD against one wide-row table.
//!
//! One generic repository serves document tables, view tables, index tables
//! and (wrapped) append-only tables. What differs between them is the row
//! layout and a small capability set.

use crate::cql::{
    CREATED_AT_COLUMN, CqlValue, OBJECT_COLUMN, Operation, ResultSet, Row, RowLayout,
    UPDATED_AT_COLUMN, compile,
};
use crate::document::entity::{Document, now_millis};
use crate::error::{DocError, DocResult};
use crate::key::{Identifier, KeyDefinition};
use crate::session::{PreparedStatement, Session, StatementCache};
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Write operations a repository accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub supports_create: bool,
    pub supports_update: bool,
    /// Every write appends a new version; see `HistoricalRepository`.
    pub append_only: bool,
}

impl Capabilities {
    pub const DOCUMENT: Capabilities = Capabilities {
        supports_create: true,
        supports_update: true,
        append_only: false,
    };

    /// View and index tables are written by fan-out upserts only.
    pub const VIEW: Capabilities = Capabilities {
        supports_create: false,
        supports_update: false,
        append_only: false,
    };

    pub const HISTORICAL: Capabilities = Capabilities {
        supports_create: false,
        supports_update: false,
        append_only: true,
    };
}

pub struct DocumentRepository {
    session: Arc<dyn Session>,
    keyspace: String,
    table: String,
    layout: RowLayout,
    capabilities: Capabilities,
    statements: StatementCache,
}

impl DocumentRepository {
    /// Repository over a document table (`object`, `created_at`, `updated_at`).
    pub fn new(
        session: Arc<dyn Session>,
        keyspace: impl Into<String>,
        table: impl Into<String>,
        key: Arc<KeyDefinition>,
    ) -> Self {
        Self::with_layout(
            session,
            keyspace,
            table,
            RowLayout::document(key),
            Capabilities::DOCUMENT,
        )
    }

    /// Parse the key DSL and build a document repository.
    pub fn from_dsl(
        session: Arc<dyn Session>,
        keyspace: impl Into<String>,
        table: impl Into<String>,
        dsl: &str,
    ) -> DocResult<Self> {
        let key = Arc::new(KeyDefinition::parse(dsl)?);
        Ok(Self::new(session, keyspace, table, key))
    }

    pub fn with_layout(
        session: Arc<dyn Session>,
        keyspace: impl Into<String>,
        table: impl Into<String>,
        layout: RowLayout,
        capabilities: Capabilities,
    ) -> Self {
        Self {
            session,
            keyspace: keyspace.into(),
            table: table.into(),
            layout,
            capabilities,
            statements: StatementCache::new(),
        }
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Default TTL applied when this repository creates its table.
    pub fn with_ttl(mut self, ttl: Option<u32>) -> Self {
        self.layout = self.layout.with_ttl(ttl);
        self
    }

    pub fn key(&self) -> &Arc<KeyDefinition> {
        &self.layout.key
    }

    pub fn layout(&self) -> &RowLayout {
        &self.layout
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn keyspace(&self) -> &str {
        &self.keyspace
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.keyspace, self.table)
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Number of statements prepared by this repository so far.
    pub fn prepared_statements(&self) -> usize {
        self.statements.len()
    }

    // ════════════════════════════════════════════
    // Schema
    // ════════════════════════════════════════════

    /// `CREATE TABLE IF NOT EXISTS`; `true` when this call created the table.
    #[instrument(skip(self), fields(table = %self.table))]
    pub async fn create_table(&self) -> DocResult<bool> {
        let statement = compile(Operation::CreateTable, &self.layout, &self.keyspace, &self.table);
        let result = self.session.execute_statement(&statement, Vec::new()).await?;
        Ok(result.applied)
    }

    /// `DROP TABLE IF EXISTS`; `true` when this call dropped the table.
    #[instrument(skip(self), fields(table = %self.table))]
    pub async fn drop_table(&self) -> DocResult<bool> {
        let statement = compile(Operation::DropTable, &self.layout, &self.keyspace, &self.table);
        let result = self.session.execute_statement(&statement, Vec::new()).await?;
        self.statements.clear();
        Ok(result.applied)
    }

    // ════════════════════════════════════════════
    // CRUD
    // ════════════════════════════════════════════

    /// Conditional insert. Sets both timestamps to now.
    #[instrument(skip(self, document), fields(table = %self.table, id = %document.identifier))]
    pub async fn create(&self, document: &Document) -> DocResult<Document> {
        self.require(self.capabilities.supports_create, "create")?;
        self.layout.key.validate(&document.identifier)?;

        let now = now_millis();
        let written = Document {
            created_at: Some(now),
            updated_at: Some(now),
            ..document.clone()
        };
        let result = self
            .execute(Operation::Insert, self.bind_document(&written))
            .await?;
        if !result.applied {
            return Err(DocError::DuplicateItem {
                table: self.table.clone(),
                identifier: document.identifier.to_string(),
            });
        }
        Ok(written)
    }

    /// Unconditional insert. Keeps a caller-supplied `created_at`.
    #[instrument(skip(self, document), fields(table = %self.table, id = %document.identifier))]
    pub async fn upsert(&self, document: &Document) -> DocResult<Document> {
        self.require(!self.capabilities.append_only, "upsert")?;
        self.layout.key.validate(&document.identifier)?;

        let now = now_millis();
        let written = Document {
            created_at: Some(document.created_at.unwrap_or(now)),
            updated_at: Some(now),
            ..document.clone()
        };
        self.execute(Operation::Upsert, self.bind_document(&written))
            .await?;
        Ok(written)
    }

    /// Conditional update of the payload and `updated_at`.
    ///
    /// The returned document carries the stored `created_at`.
    #[instrument(skip(self, document), fields(table = %self.table, id = %document.identifier))]
    pub async fn update(&self, document: &Document) -> DocResult<Document> {
        self.require(self.capabilities.supports_update, "update")?;
        self.layout.key.validate(&document.identifier)?;

        let now = now_millis();
        let mut values = vec![
            CqlValue::blob(document.payload.clone()),
            CqlValue::timestamp(Some(now)),
        ];
        values.extend(key_values(&document.identifier));
        let result = self.execute(Operation::Update, values).await?;
        if !result.applied {
            return Err(DocError::ItemNotFound {
                table: self.table.clone(),
                identifier: document.identifier.to_string(),
            });
        }
        let created_at = self
            .find(&document.identifier)
            .await?
            .and_then(|stored| stored.created_at);
        Ok(Document {
            created_at,
            updated_at: Some(now),
            ..document.clone()
        })
    }

    /// Unconditional delete.
    ///
    /// The store's delete is idempotent, so the returned flag is `true`
    /// whether or not a row existed; call [`exists`](Self::exists) first when
    /// the distinction matters.
    #[instrument(skip(self), fields(table = %self.table))]
    pub async fn delete(&self, identifier: &Identifier) -> DocResult<bool> {
        self.require(!self.capabilities.append_only, "delete")?;
        self.layout.key.validate(identifier)?;
        let result = self
            .execute(Operation::Delete, key_values(identifier))
            .await?;
        Ok(result.applied)
    }

    /// Point lookup; `ItemNotFound` when no row exists.
    pub async fn read(&self, identifier: &Identifier) -> DocResult<Document> {
        self.find(identifier)
            .await?
            .ok_or_else(|| DocError::ItemNotFound {
                table: self.table.clone(),
                identifier: identifier.to_string(),
            })
    }

    /// Point lookup returning `None` when no row exists.
    pub async fn find(&self, identifier: &Identifier) -> DocResult<Option<Document>> {
        self.layout.key.validate(identifier)?;
        let result = self
            .execute(Operation::Select, key_values(identifier))
            .await?;
        result.first().map(|row| self.to_document(row)).transpose()
    }

    /// Batched point lookups, issued concurrently. Missing rows are skipped;
    /// the result keeps the order of `identifiers`.
    pub async fn read_in(&self, identifiers: &[Identifier]) -> DocResult<Vec<Document>> {
        for identifier in identifiers {
            self.layout.key.validate(identifier)?;
        }
        let results = join_all(identifiers.iter().map(|id| self.find(id))).await;
        let mut documents = Vec::with_capacity(results.len());
        for result in results {
            if let Some(document) = result? {
                documents.push(document);
            }
        }
        Ok(documents)
    }

    /// Every row of one partition, in clustering order.
    pub async fn read_all(&self, partition: &Identifier) -> DocResult<Vec<Document>> {
        self.layout.key.validate_partition(partition)?;
        let rows = self
            .select_prefix(partition, None)
            .await?;
        rows.iter().map(|row| self.to_document(row)).collect()
    }

    pub async fn exists(&self, identifier: &Identifier) -> DocResult<bool> {
        Ok(self.find(identifier).await?.is_some())
    }

    // ════════════════════════════════════════════
    // Crate-internal plumbing
    // ════════════════════════════════════════════

    fn require(&self, supported: bool, operation: &str) -> DocResult<()> {
        if supported {
            Ok(())
        } else {
            Err(DocError::Unsupported {
                operation: operation.to_string(),
                table: self.table.clone(),
            })
        }
    }

    async fn prepared(&self, operation: Operation) -> DocResult<Arc<PreparedStatement>> {
        self.statements
            .get_or_prepare(self.session.as_ref(), operation, || {
                compile(operation, &self.layout, &self.keyspace, &self.table)
            })
            .await
    }

    pub(crate) async fn execute(
        &self,
        operation: Operation,
        values: Vec<CqlValue>,
    ) -> DocResult<ResultSet> {
        let prepared = self.prepared(operation).await?;
        debug!(operation = operation.name(), table = %self.table, "execute");
        self.session.execute(&prepared, values).await
    }

    /// Rows whose key starts with `prefix`, which must cover at least the
    /// partition.
    pub(crate) async fn select_prefix(
        &self,
        prefix: &Identifier,
        limit: Option<u32>,
    ) -> DocResult<Vec<Row>> {
        self.layout.key.validate_prefix(prefix, prefix.len())?;
        let result = self
            .execute(
                Operation::SelectPrefix {
                    components: prefix.len(),
                    limit,
                },
                key_values(prefix),
            )
            .await?;
        Ok(result.rows)
    }

    /// Positional values for an insert: key, then every regular column of
    /// the layout (missing ones bound as null).
    pub(crate) fn bind_row(
        &self,
        identifier: &Identifier,
        mut regular: BTreeMap<&str, CqlValue>,
    ) -> Vec<CqlValue> {
        let mut values = key_values(identifier);
        values.extend(
            self.layout
                .columns
                .iter()
                .map(|c| regular.remove(c.name.as_str()).unwrap_or(CqlValue::Null)),
        );
        values
    }

    pub(crate) fn bind_document(&self, document: &Document) -> Vec<CqlValue> {
        self.bind_row(&document.identifier, document_columns(document))
    }

    /// Identifier reconstructed by walking the key components in order.
    pub(crate) fn identifier_of(&self, row: &Row) -> DocResult<Identifier> {
        self.layout
            .key
            .components()
            .map(|c| row.scalar(&c.name).cloned())
            .collect()
    }

    pub(crate) fn to_document(&self, row: &Row) -> DocResult<Document> {
        Ok(Document {
            identifier: self.identifier_of(row)?,
            payload: row.blob(OBJECT_COLUMN)?.map(<[u8]>::to_vec),
            created_at: row.timestamp(CREATED_AT_COLUMN)?,
            updated_at: row.timestamp(UPDATED_AT_COLUMN)?,
        })
    }
}

pub(crate) fn key_values(identifier: &Identifier) -> Vec<CqlValue> {
    identifier
        .values()
        .iter()
        .cloned()
        .map(CqlValue::Scalar)
        .collect()
}

pub(crate) fn document_columns(document: &Document) -> BTreeMap<&'static str, CqlValue> {
    BTreeMap::from([
        (OBJECT_COLUMN, CqlValue::blob(document.payload.clone())),
        (CREATED_AT_COLUMN, CqlValue::timestamp(document.created_at)),
        (UPDATED_AT_COLUMN, CqlValue::timestamp(document.updated_at)),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::ScalarValue;
    use crate::session::WideColumnStore;
    use serde_json::json;
    use uuid::Uuid;

    async fn repository(dsl: &str) -> DocumentRepository {
        let session: Arc<dyn Session> = Arc::new(WideColumnStore::open_temporary().unwrap());
        let repo = DocumentRepository::from_dsl(session, "ks", "docs", dsl).unwrap();
        assert!(repo.create_table().await.unwrap());
        repo
    }

    #[tokio::test]
    async fn test_create_then_read() {
        let repo = repository("id:uuid").await;
        let id = Identifier::of(Uuid::new_v4());
        let doc = Document::from_json(id.clone(), &json!({"a": 1})).unwrap();

        let created = repo.create(&doc).await.unwrap();
        assert!(created.created_at.is_some());
        assert_eq!(created.created_at, created.updated_at);

        let read = repo.read(&id).await.unwrap();
        assert_eq!(read, created);
        assert_eq!(read.content().unwrap(), Some(json!({"a": 1})));
        assert!(repo.exists(&id).await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_create() {
        let repo = repository("id:int").await;
        let doc = Document::new(Identifier::of(1), None);
        repo.create(&doc).await.unwrap();
        let err = repo.create(&doc).await.unwrap_err();
        assert!(err.is_duplicate());
    }

    #[tokio::test]
    async fn test_update_requires_existing_row() {
        let repo = repository("id:int").await;
        let doc = Document::from_json(Identifier::of(1), &json!({"v": 1})).unwrap();
        assert!(repo.update(&doc).await.unwrap_err().is_not_found());

        let created = repo.create(&doc).await.unwrap();
        let changed = Document::from_json(Identifier::of(1), &json!({"v": 2})).unwrap();
        assert!(changed.created_at.is_none());
        let updated = repo.update(&changed).await.unwrap();
        assert_eq!(updated.created_at, created.created_at);

        let read = repo.read(&Identifier::of(1)).await.unwrap();
        assert_eq!(read.content().unwrap(), Some(json!({"v": 2})));
        assert_eq!(read.created_at, created.created_at);
        assert!(read.updated_at >= created.updated_at);
    }

    #[tokio::test]
    async fn test_upsert_keeps_supplied_created_at() {
        let repo = repository("id:int").await;
        let mut doc = Document::new(Identifier::of(2), None);
        let earlier = now_millis() - chrono::Duration::days(1);
        doc.created_at = Some(earlier);
        let written = repo.upsert(&doc).await.unwrap();
        assert_eq!(written.created_at, Some(earlier));
        assert_eq!(repo.read(&Identifier::of(2)).await.unwrap().created_at, Some(earlier));
    }

    #[tokio::test]
    async fn test_delete_and_missing_read() {
        let repo = repository("id:int").await;
        repo.create(&Document::new(Identifier::of(3), None)).await.unwrap();
        assert!(repo.delete(&Identifier::of(3)).await.unwrap());
        assert!(!repo.exists(&Identifier::of(3)).await.unwrap());
        assert!(repo.read(&Identifier::of(3)).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_invalid_identifier_is_rejected_before_storage() {
        let repo = repository("id:timestamp").await;
        let doc = Document::new(Identifier::of(Uuid::new_v4()), None);
        let err = repo.create(&doc).await.unwrap_err();
        assert!(matches!(err, DocError::InvalidIdentifier { .. }));
        assert_eq!(repo.prepared_statements(), 0);
    }

    #[tokio::test]
    async fn test_read_in_and_read_all() {
        let repo = repository("(tenant:text), -seq:bigint").await;
        for seq in 1..=3i64 {
            let id = Identifier::new([ScalarValue::from("acme"), ScalarValue::BigInt(seq)]);
            repo.create(&Document::new(id, None)).await.unwrap();
        }
        repo.create(&Document::new(
            Identifier::new([ScalarValue::from("other"), ScalarValue::BigInt(1)]),
            None,
        ))
        .await
        .unwrap();

        let all = repo.read_all(&Identifier::of("acme")).await.unwrap();
        let seqs: Vec<&ScalarValue> = all.iter().map(|d| &d.identifier.values()[1]).collect();
        assert_eq!(
            seqs,
            vec![
                &ScalarValue::BigInt(3),
                &ScalarValue::BigInt(2),
                &ScalarValue::BigInt(1)
            ]
        );

        let wanted = [
            Identifier::new([ScalarValue::from("acme"), ScalarValue::BigInt(2)]),
            Identifier::new([ScalarValue::from("acme"), ScalarValue::BigInt(9)]),
            Identifier::new([ScalarValue::from("other"), ScalarValue::BigInt(1)]),
        ];
        let found = repo.read_in(&wanted).await.unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[1].identifier, wanted[2]);

        assert!(matches!(
            repo.read_all(&Identifier::of(1)).await,
            Err(DocError::InvalidIdentifier { .. })
        ));
    }

    #[tokio::test]
    async fn test_view_capabilities_reject_create() {
        let repo = repository("id:int")
            .await
            .with_capabilities(Capabilities::VIEW);
        let err = repo
            .create(&Document::new(Identifier::of(1), None))
            .await
            .unwrap_err();
        assert!(matches!(err, DocError::Unsupported { .. }));
        repo.upsert(&Document::new(Identifier::of(1), None)).await.unwrap();
    }
}
