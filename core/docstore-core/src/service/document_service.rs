//! DocumentService: table-addressed CRUD with view and index fan-out.
//!
//! A write resolves the table's repository, views and bucketed indexes
//! (cached), validates the document, executes the primary write and then
//! issues the derived writes concurrently. Derived writes are best-effort:
//! their failures are reported per target in the outcome and never undo the
//! primary write.

use crate::config::StoreConfig;
use crate::cql::{CqlValue, Operation};
use crate::document::codec::{DocumentFields, PayloadValidator, Validator};
use crate::document::entity::Document;
use crate::document::repository::{DocumentRepository, document_columns, key_values};
use crate::error::{DocError, DocResult};
use crate::index::bucketed::{SOURCE_ID_COLUMN, source_owner};
use crate::index::{BucketPartitioner, BucketedViewIndex};
use crate::key::{Identifier, KeyDefinition, ScalarValue};
use crate::schema::{Index, SYS_INDEXES, SYS_VIEWS, SchemaCatalog, Table, TableId, View};
use crate::service::cache::{Indexes, ServiceCache, ViewBinding, Views};
use crate::session::{Session, WideColumnStore};
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

// ════════════════════════════════════════════
// Outcomes
// ════════════════════════════════════════════

/// Result of one derived write.
#[derive(Debug)]
pub enum FanoutStatus {
    /// Row written under this identifier.
    Written(Identifier),
    /// Row removed from this identifier.
    Removed(Identifier),
    /// Nothing to do: the document does not carry every field of the target
    /// key, or the view row it would remove belongs to another document.
    Skipped,
    Failed(DocError),
}

impl FanoutStatus {
    pub fn is_failed(&self) -> bool {
        matches!(self, FanoutStatus::Failed(_))
    }
}

#[derive(Debug)]
pub struct FanoutWrite {
    /// View or index name
    pub name: String,
    pub status: FanoutStatus,
}

impl FanoutWrite {
    fn new(name: &str, status: FanoutStatus) -> Self {
        Self {
            name: name.to_string(),
            status,
        }
    }
}

/// A successful primary write and what happened to each derived row.
#[derive(Debug)]
pub struct WriteOutcome {
    pub document: Document,
    pub views: Vec<FanoutWrite>,
    pub indexes: Vec<FanoutWrite>,
}

impl WriteOutcome {
    /// True when no derived write failed.
    pub fn is_complete(&self) -> bool {
        self.failures().next().is_none()
    }

    pub fn failures(&self) -> impl Iterator<Item = &FanoutWrite> {
        self.views
            .iter()
            .chain(self.indexes.iter())
            .filter(|w| w.status.is_failed())
    }
}

#[derive(Debug)]
pub struct DeleteOutcome {
    /// A row existed before the delete.
    pub existed: bool,
    pub views: Vec<FanoutWrite>,
    pub indexes: Vec<FanoutWrite>,
}

impl DeleteOutcome {
    pub fn is_complete(&self) -> bool {
        !self
            .views
            .iter()
            .chain(self.indexes.iter())
            .any(|w| w.status.is_failed())
    }
}

#[derive(Default)]
struct Fanout {
    views: Vec<FanoutWrite>,
    indexes: Vec<FanoutWrite>,
}

impl Fanout {
    fn logged(self, identifier: &Identifier) -> Self {
        for write in self.views.iter().chain(self.indexes.iter()) {
            if let FanoutStatus::Failed(e) = &write.status {
                warn!(target_name = %write.name, id = %identifier, error = %e, "derived write failed");
            }
        }
        self
    }

    fn into_outcome(self, document: Document) -> WriteOutcome {
        WriteOutcome {
            document,
            views: self.views,
            indexes: self.indexes,
        }
    }
}

fn status_of(result: DocResult<Option<Identifier>>, written: bool) -> FanoutStatus {
    match result {
        Ok(Some(id)) if written => FanoutStatus::Written(id),
        Ok(Some(id)) => FanoutStatus::Removed(id),
        Ok(None) => FanoutStatus::Skipped,
        Err(e) => FanoutStatus::Failed(e),
    }
}

/// Key of `document` under a view, read from the payload and then from the
/// source identifier.
fn view_key(
    binding: &ViewBinding,
    source_key: &KeyDefinition,
    document: &Document,
) -> DocResult<Option<Identifier>> {
    binding
        .repository
        .key()
        .extract(&DocumentFields::new(document, source_key)?)
}

/// Write `current` under its view key, tagged with its source identifier.
///
/// When the view key changed, the row under the old key is removed only if
/// `current` still owns it. Documents sharing a view key take the row over
/// on write.
async fn write_view(
    binding: &ViewBinding,
    source_key: &KeyDefinition,
    previous: Option<&Document>,
    current: &Document,
) -> DocResult<Option<Identifier>> {
    let new_key = view_key(binding, source_key, current)?;
    if let Some(previous) = previous
        && let Some(old_key) = view_key(binding, source_key, previous)?
        && Some(&old_key) != new_key.as_ref()
    {
        delete_owned_row(binding, &old_key, &current.identifier).await?;
    }
    let Some(identifier) = new_key else {
        return Ok(None);
    };
    let mut columns = document_columns(current);
    columns.insert(SOURCE_ID_COLUMN, CqlValue::Blob(current.identifier.to_bytes()?));
    let values = binding.repository.bind_row(&identifier, columns);
    binding.repository.execute(Operation::Upsert, values).await?;
    Ok(Some(identifier))
}

/// Remove a deleted document's view row; `None` when there is none or it
/// belongs to another document.
async fn remove_view(
    binding: &ViewBinding,
    source_key: &KeyDefinition,
    document: &Document,
) -> DocResult<Option<Identifier>> {
    let Some(identifier) = view_key(binding, source_key, document)? else {
        return Ok(None);
    };
    if delete_owned_row(binding, &identifier, &document.identifier).await? {
        Ok(Some(identifier))
    } else {
        Ok(None)
    }
}

async fn delete_owned_row(
    binding: &ViewBinding,
    row_key: &Identifier,
    owner: &Identifier,
) -> DocResult<bool> {
    let repository = &binding.repository;
    let Some(row) = repository
        .execute(Operation::Select, key_values(row_key))
        .await?
        .rows
        .into_iter()
        .next()
    else {
        return Ok(false);
    };
    if &source_owner(&row, repository.table())? != owner {
        debug!(view = binding.name(), key = %row_key, "view row owned by another document");
        return Ok(false);
    }
    repository
        .execute(Operation::Delete, key_values(row_key))
        .await?;
    Ok(true)
}

// ════════════════════════════════════════════
// Service
// ════════════════════════════════════════════

pub struct DocumentService {
    session: Arc<dyn Session>,
    catalog: SchemaCatalog,
    cache: ServiceCache,
    validator: Arc<dyn Validator>,
}

impl DocumentService {
    pub fn new(
        session: Arc<dyn Session>,
        keyspace: &str,
        partitioner: Arc<BucketPartitioner>,
    ) -> DocResult<Self> {
        Ok(Self {
            catalog: SchemaCatalog::new(Arc::clone(&session), keyspace, partitioner)?,
            session,
            cache: ServiceCache::new(),
            validator: Arc::new(PayloadValidator),
        })
    }

    /// Open the embedded store described by `config` and create the system
    /// tables.
    pub async fn open(config: &StoreConfig) -> DocResult<Self> {
        config.validate()?;
        let store = match &config.data_dir {
            Some(dir) => WideColumnStore::open(dir)?,
            None => WideColumnStore::open_temporary()?,
        };
        let partitioner = Arc::new(BucketPartitioner::new(config.bucket_count)?);
        let service = Self::new(Arc::new(store), &config.keyspace, partitioner)?
            .with_system_ttl(config.system_ttl);
        service.bootstrap().await?;
        info!(
            keyspace = %config.keyspace,
            bucket_count = config.bucket_count,
            persistent = config.data_dir.is_some(),
            "document service ready"
        );
        Ok(service)
    }

    pub fn with_validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_system_ttl(mut self, ttl: Option<u32>) -> Self {
        self.catalog = self.catalog.with_system_ttl(ttl);
        self
    }

    pub async fn bootstrap(&self) -> DocResult<()> {
        self.catalog.bootstrap().await
    }

    pub fn session(&self) -> &Arc<dyn Session> {
        &self.session
    }

    pub fn catalog(&self) -> &SchemaCatalog {
        &self.catalog
    }

    pub fn cache(&self) -> &ServiceCache {
        &self.cache
    }

    pub fn clear_caches(&self) {
        self.cache.clear();
    }

    // ════════════════════════════════════════════
    // Cached resolution
    // ════════════════════════════════════════════

    async fn repository(&self, table: &TableId) -> DocResult<Arc<DocumentRepository>> {
        if let Some(repository) = self.cache.document(table) {
            return Ok(repository);
        }
        let seen = self.cache.generation(table);
        let record = self.catalog.tables().read(table).await?;
        let repository = self.catalog.tables().storage(&record)?;
        debug!(table = %table, physical = repository.table(), "repository cached");
        Ok(self.cache.insert_document(table, seen, repository))
    }

    async fn views(&self, table: &TableId) -> DocResult<Views> {
        if let Some(views) = self.cache.views(table) {
            return Ok(views);
        }
        let seen = self.cache.generation(table);
        let mut bindings = Vec::new();
        for view in self.catalog.views().list(table).await? {
            let repository = self.catalog.views().storage(&view)?;
            bindings.push(ViewBinding { view, repository });
        }
        debug!(table = %table, views = bindings.len(), "views cached");
        Ok(self.cache.insert_views(table, seen, bindings))
    }

    async fn indexes(&self, table: &TableId, source_key: &Arc<KeyDefinition>) -> DocResult<Indexes> {
        if let Some(indexes) = self.cache.indexes(table) {
            return Ok(indexes);
        }
        let seen = self.cache.generation(table);
        let mut indexes = Vec::new();
        for index in self.catalog.indexes().list(table).await? {
            // external engines maintain their own entries
            if index.engine.is_external() {
                continue;
            }
            indexes.push(self.catalog.indexes().bucketed(&index, Arc::clone(source_key))?);
        }
        debug!(table = %table, indexes = indexes.len(), "indexes cached");
        Ok(self.cache.insert_indexes(table, seen, indexes))
    }

    /// Repository, views and indexes of a table, resolved before any write.
    async fn targets(
        &self,
        table: &TableId,
    ) -> DocResult<(Arc<DocumentRepository>, Views, Indexes)> {
        let repository = self.repository(table).await?;
        let views = self.views(table).await?;
        let indexes = self.indexes(table, repository.key()).await?;
        Ok((repository, views, indexes))
    }

    async fn propagate(
        views: &[ViewBinding],
        indexes: &[BucketedViewIndex],
        source_key: &KeyDefinition,
        previous: Option<&Document>,
        current: &Document,
    ) -> Fanout {
        let view_writes = join_all(views.iter().map(|binding| async move {
            let result = write_view(binding, source_key, previous, current).await;
            FanoutWrite::new(binding.name(), status_of(result, true))
        }));
        let index_writes = join_all(indexes.iter().map(|index| async move {
            let result = index.update(previous, current).await;
            FanoutWrite::new(index.name(), status_of(result, true))
        }));
        let (views, indexes) = futures::join!(view_writes, index_writes);
        Fanout { views, indexes }.logged(&current.identifier)
    }

    async fn retract(
        views: &[ViewBinding],
        indexes: &[BucketedViewIndex],
        source_key: &KeyDefinition,
        document: &Document,
    ) -> Fanout {
        let view_removals = join_all(views.iter().map(|binding| async move {
            let result = remove_view(binding, source_key, document).await;
            FanoutWrite::new(binding.name(), status_of(result, false))
        }));
        let index_removals = join_all(indexes.iter().map(|index| async move {
            let result = index.remove(document).await;
            FanoutWrite::new(index.name(), status_of(result, false))
        }));
        let (views, indexes) = futures::join!(view_removals, index_removals);
        Fanout { views, indexes }.logged(&document.identifier)
    }

    // ════════════════════════════════════════════
    // Writes
    // ════════════════════════════════════════════

    /// Conditional create; `DuplicateItem` when the identifier is taken.
    #[instrument(skip(self, document), fields(table = %table, id = %document.identifier))]
    pub async fn create(&self, table: &TableId, document: &Document) -> DocResult<WriteOutcome> {
        let (repository, views, indexes) = self.targets(table).await?;
        self.validator.validate(repository.table(), document)?;
        let written = repository.create(document).await?;
        let fanout = Self::propagate(&views, &indexes, repository.key(), None, &written).await;
        Ok(fanout.into_outcome(written))
    }

    /// Conditional update; `ItemNotFound` when no row exists.
    ///
    /// View rows and index entries whose key changed are moved.
    #[instrument(skip(self, document), fields(table = %table, id = %document.identifier))]
    pub async fn update(&self, table: &TableId, document: &Document) -> DocResult<WriteOutcome> {
        let (repository, views, indexes) = self.targets(table).await?;
        self.validator.validate(repository.table(), document)?;
        let previous = self
            .previous(&repository, &views, &indexes, &document.identifier)
            .await?;
        let written = repository.update(document).await?;
        let fanout = Self::propagate(
            &views,
            &indexes,
            repository.key(),
            previous.as_ref(),
            &written,
        )
        .await;
        Ok(fanout.into_outcome(written))
    }

    /// Unconditional write.
    #[instrument(skip(self, document), fields(table = %table, id = %document.identifier))]
    pub async fn upsert(&self, table: &TableId, document: &Document) -> DocResult<WriteOutcome> {
        let (repository, views, indexes) = self.targets(table).await?;
        self.validator.validate(repository.table(), document)?;
        let previous = self
            .previous(&repository, &views, &indexes, &document.identifier)
            .await?;
        let written = repository.upsert(document).await?;
        let fanout = Self::propagate(
            &views,
            &indexes,
            repository.key(),
            previous.as_ref(),
            &written,
        )
        .await;
        Ok(fanout.into_outcome(written))
    }

    /// Delete a document and the view rows and index entries derived from
    /// its stored content.
    #[instrument(skip(self), fields(table = %table))]
    pub async fn delete(&self, table: &TableId, identifier: &Identifier) -> DocResult<DeleteOutcome> {
        let (repository, views, indexes) = self.targets(table).await?;
        let previous = repository.find(identifier).await?;
        repository.delete(identifier).await?;
        let fanout = match &previous {
            Some(document) => Self::retract(&views, &indexes, repository.key(), document).await,
            None => Fanout::default(),
        };
        Ok(DeleteOutcome {
            existed: previous.is_some(),
            views: fanout.views,
            indexes: fanout.indexes,
        })
    }

    /// Stored content before a write, needed only when something derives
    /// from it.
    async fn previous(
        &self,
        repository: &DocumentRepository,
        views: &[ViewBinding],
        indexes: &[BucketedViewIndex],
        identifier: &Identifier,
    ) -> DocResult<Option<Document>> {
        if views.is_empty() && indexes.is_empty() {
            return Ok(None);
        }
        repository.find(identifier).await
    }

    // ════════════════════════════════════════════
    // Reads
    // ════════════════════════════════════════════

    pub async fn read(&self, table: &TableId, identifier: &Identifier) -> DocResult<Document> {
        self.repository(table).await?.read(identifier).await
    }

    pub async fn find(&self, table: &TableId, identifier: &Identifier) -> DocResult<Option<Document>> {
        self.repository(table).await?.find(identifier).await
    }

    pub async fn read_in(&self, table: &TableId, identifiers: &[Identifier]) -> DocResult<Vec<Document>> {
        self.repository(table).await?.read_in(identifiers).await
    }

    pub async fn read_all(&self, table: &TableId, partition: &Identifier) -> DocResult<Vec<Document>> {
        self.repository(table).await?.read_all(partition).await
    }

    pub async fn exists(&self, table: &TableId, identifier: &Identifier) -> DocResult<bool> {
        self.repository(table).await?.exists(identifier).await
    }

    async fn view(&self, table: &TableId, name: &str) -> DocResult<(Views, usize)> {
        let views = self.views(table).await?;
        let position = views
            .iter()
            .position(|b| b.name() == name)
            .ok_or_else(|| DocError::ItemNotFound {
                table: SYS_VIEWS.to_string(),
                identifier: format!("{table}.{name}"),
            })?;
        Ok((views, position))
    }

    /// Point lookup in a view by its own key.
    pub async fn read_view(
        &self,
        table: &TableId,
        view: &str,
        identifier: &Identifier,
    ) -> DocResult<Document> {
        let (views, position) = self.view(table, view).await?;
        views[position].repository.read(identifier).await
    }

    /// One partition of a view, in the view's clustering order.
    pub async fn read_view_all(
        &self,
        table: &TableId,
        view: &str,
        partition: &Identifier,
    ) -> DocResult<Vec<Document>> {
        let (views, position) = self.view(table, view).await?;
        views[position].repository.read_all(partition).await
    }

    /// Documents whose leading indexed fields equal `values`.
    ///
    /// External-engine indexes are not queryable here.
    pub async fn find_by_index(
        &self,
        table: &TableId,
        index: &str,
        values: &[ScalarValue],
    ) -> DocResult<Vec<Document>> {
        let repository = self.repository(table).await?;
        let indexes = self.indexes(table, repository.key()).await?;
        if let Some(bucketed) = indexes.iter().find(|i| i.name() == index) {
            return bucketed.lookup(values).await;
        }
        match self.catalog.indexes().find(table, index).await? {
            Some(record) => Err(DocError::Unsupported {
                operation: format!("lookup on {:?} index", record.engine),
                table: record.physical_name(),
            }),
            None => Err(DocError::ItemNotFound {
                table: SYS_INDEXES.to_string(),
                identifier: format!("{table}.{index}"),
            }),
        }
    }

    // ════════════════════════════════════════════
    // Schema
    // ════════════════════════════════════════════

    pub async fn create_table(&self, table: &Table) -> DocResult<Table> {
        let result = self.catalog.create_table(table).await;
        self.cache.invalidate(&table.id());
        result
    }

    pub async fn delete_table(&self, table: &TableId) -> DocResult<bool> {
        let result = self.catalog.delete_table(table).await;
        self.cache.invalidate(table);
        result
    }

    pub async fn create_view(&self, view: &View) -> DocResult<View> {
        let result = self.catalog.create_view(view).await;
        self.cache.invalidate(&view.table_id());
        result
    }

    pub async fn delete_view(&self, table: &TableId, name: &str) -> DocResult<bool> {
        let result = self.catalog.delete_view(table, name).await;
        self.cache.invalidate(table);
        result
    }

    pub async fn create_index(&self, index: &Index) -> DocResult<Index> {
        let result = self.catalog.create_index(index).await;
        self.cache.invalidate(&index.table_id());
        result
    }

    pub async fn delete_index(&self, table: &TableId, name: &str) -> DocResult<bool> {
        let result = self.catalog.delete_index(table, name).await;
        self.cache.invalidate(table);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::IndexEngine;
    use serde_json::json;
    use uuid::Uuid;

    async fn service() -> DocumentService {
        DocumentService::open(&StoreConfig::default()).await.unwrap()
    }

    fn doc(id: i32, content: serde_json::Value) -> Document {
        Document::from_json(Identifier::of(id), &content).unwrap()
    }

    async fn users(service: &DocumentService) -> TableId {
        let table = Table::new("acme", "users", "id:int");
        service.create_table(&table).await.unwrap();
        table.id()
    }

    #[tokio::test]
    async fn test_unknown_table() {
        let service = service().await;
        let err = service
            .create(&TableId::new("acme", "ghost"), &doc(1, json!({})))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_view_row_moves_on_update() {
        let service = service().await;
        let table = users(&service).await;
        service
            .create_view(&View::new("acme", "users", "by_email", "email:text"))
            .await
            .unwrap();

        let outcome = service
            .create(&table, &doc(1, json!({"email": "a@x.io"})))
            .await
            .unwrap();
        assert!(outcome.is_complete());
        assert!(matches!(outcome.views[0].status, FanoutStatus::Written(_)));

        service
            .update(&table, &doc(1, json!({"email": "b@x.io"})))
            .await
            .unwrap();
        let old = service
            .read_view(&table, "by_email", &Identifier::of("a@x.io"))
            .await;
        assert!(old.unwrap_err().is_not_found());
        let moved = service
            .read_view(&table, "by_email", &Identifier::of("b@x.io"))
            .await
            .unwrap();
        assert_eq!(moved.content().unwrap(), Some(json!({"email": "b@x.io"})));
        assert!(moved.created_at.is_some());
    }

    async fn email_view(service: &DocumentService) {
        service
            .create_view(&View::new("acme", "users", "by_email", "email:text"))
            .await
            .unwrap();
    }

    async fn view_content(
        service: &DocumentService,
        table: &TableId,
        email: &str,
    ) -> DocResult<Option<serde_json::Value>> {
        service
            .read_view(table, "by_email", &Identifier::of(email))
            .await?
            .content()
    }

    #[tokio::test]
    async fn test_delete_keeps_shared_view_row_of_other_owner() {
        let service = service().await;
        let table = users(&service).await;
        email_view(&service).await;
        service
            .create(&table, &doc(1, json!({"email": "a", "n": 1})))
            .await
            .unwrap();
        service
            .create(&table, &doc(2, json!({"email": "a", "n": 2})))
            .await
            .unwrap();
        assert_eq!(
            view_content(&service, &table, "a").await.unwrap(),
            Some(json!({"email": "a", "n": 2}))
        );

        let outcome = service.delete(&table, &Identifier::of(1)).await.unwrap();
        assert!(matches!(outcome.views[0].status, FanoutStatus::Skipped));
        assert_eq!(
            view_content(&service, &table, "a").await.unwrap(),
            Some(json!({"email": "a", "n": 2}))
        );

        let outcome = service.delete(&table, &Identifier::of(2)).await.unwrap();
        assert!(matches!(outcome.views[0].status, FanoutStatus::Removed(_)));
        assert!(
            view_content(&service, &table, "a")
                .await
                .unwrap_err()
                .is_not_found()
        );
    }

    #[tokio::test]
    async fn test_key_change_keeps_shared_view_row_of_other_owner() {
        let service = service().await;
        let table = users(&service).await;
        email_view(&service).await;
        service
            .create(&table, &doc(1, json!({"email": "a", "n": 1})))
            .await
            .unwrap();
        service
            .create(&table, &doc(2, json!({"email": "a", "n": 2})))
            .await
            .unwrap();

        // doc 1 no longer owns "a", so moving it away leaves doc 2's row
        service
            .update(&table, &doc(1, json!({"email": "b", "n": 1})))
            .await
            .unwrap();
        assert_eq!(
            view_content(&service, &table, "a").await.unwrap(),
            Some(json!({"email": "a", "n": 2}))
        );
        assert_eq!(
            view_content(&service, &table, "b").await.unwrap(),
            Some(json!({"email": "b", "n": 1}))
        );

        // doc 2 owns "a" and takes it along
        service
            .upsert(&table, &doc(2, json!({"email": "c", "n": 2})))
            .await
            .unwrap();
        assert!(
            view_content(&service, &table, "a")
                .await
                .unwrap_err()
                .is_not_found()
        );
        assert!(view_content(&service, &table, "c").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_missing_view_field_is_skipped() {
        let service = service().await;
        let table = users(&service).await;
        service
            .create_view(&View::new("acme", "users", "by_email", "email:text"))
            .await
            .unwrap();
        let outcome = service
            .create(&table, &doc(1, json!({"name": "no email"})))
            .await
            .unwrap();
        assert!(matches!(outcome.views[0].status, FanoutStatus::Skipped));
        assert!(outcome.is_complete());
    }

    #[tokio::test]
    async fn test_view_created_after_first_write_is_picked_up() {
        let service = service().await;
        let table = users(&service).await;
        service
            .create(&table, &doc(1, json!({"email": "a@x.io"})))
            .await
            .unwrap();
        service
            .create_view(&View::new("acme", "users", "by_email", "email:text"))
            .await
            .unwrap();
        let outcome = service
            .upsert(&table, &doc(2, json!({"email": "c@x.io"})))
            .await
            .unwrap();
        assert_eq!(outcome.views.len(), 1);
        assert!(
            service
                .read_view(&table, "by_email", &Identifier::of("c@x.io"))
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_delete_removes_derived_rows() {
        let service = service().await;
        let table = users(&service).await;
        service
            .create_view(&View::new("acme", "users", "by_email", "email:text"))
            .await
            .unwrap();
        service
            .create_index(&Index::new("acme", "users", "by_city", ["city:text"]))
            .await
            .unwrap();
        service
            .create(&table, &doc(1, json!({"email": "a@x.io", "city": "Busan"})))
            .await
            .unwrap();

        let outcome = service.delete(&table, &Identifier::of(1)).await.unwrap();
        assert!(outcome.existed);
        assert!(outcome.is_complete());
        assert!(matches!(outcome.views[0].status, FanoutStatus::Removed(_)));
        assert!(matches!(outcome.indexes[0].status, FanoutStatus::Removed(_)));
        assert!(
            service
                .find_by_index(&table, "by_city", &[ScalarValue::from("Busan")])
                .await
                .unwrap()
                .is_empty()
        );
        assert!(!service.exists(&table, &Identifier::of(1)).await.unwrap());

        let again = service.delete(&table, &Identifier::of(1)).await.unwrap();
        assert!(!again.existed);
        assert!(again.views.is_empty());
    }

    #[tokio::test]
    async fn test_index_follows_updates() {
        let service = service().await;
        let table = users(&service).await;
        service
            .create_index(&Index::new("acme", "users", "by_city", ["city:text"]))
            .await
            .unwrap();
        service
            .create(&table, &doc(1, json!({"city": "Seoul"})))
            .await
            .unwrap();
        service
            .create(&table, &doc(2, json!({"city": "Seoul"})))
            .await
            .unwrap();
        service
            .update(&table, &doc(2, json!({"city": "Incheon"})))
            .await
            .unwrap();

        let seoul = service
            .find_by_index(&table, "by_city", &[ScalarValue::from("Seoul")])
            .await
            .unwrap();
        assert_eq!(seoul.len(), 1);
        assert_eq!(seoul[0].identifier, Identifier::of(1));
        let incheon = service
            .find_by_index(&table, "by_city", &[ScalarValue::from("Incheon")])
            .await
            .unwrap();
        assert_eq!(incheon[0].identifier, Identifier::of(2));
    }

    #[tokio::test]
    async fn test_unique_index_conflict_is_reported_not_rolled_back() {
        let service = service().await;
        let table = users(&service).await;
        service
            .create_index(&Index::new("acme", "users", "by_email", ["email:text"]).unique())
            .await
            .unwrap();
        service
            .create(&table, &doc(1, json!({"email": "a@x.io"})))
            .await
            .unwrap();
        let outcome = service
            .create(&table, &doc(2, json!({"email": "a@x.io"})))
            .await
            .unwrap();
        assert!(!outcome.is_complete());
        assert!(matches!(
            &outcome.indexes[0].status,
            FanoutStatus::Failed(e) if e.is_duplicate()
        ));
        // the primary write stands
        assert!(service.exists(&table, &Identifier::of(2)).await.unwrap());
    }

    #[tokio::test]
    async fn test_external_index_lookup_is_unsupported() {
        let service = service().await;
        let table = users(&service).await;
        let empty: [&str; 0] = [];
        service
            .create_index(&Index::new("acme", "users", "fts", empty).with_engine(IndexEngine::Solr))
            .await
            .unwrap();
        let outcome = service
            .create(&table, &doc(1, json!({"bio": "x"})))
            .await
            .unwrap();
        assert!(outcome.indexes.is_empty());
        assert!(matches!(
            service.find_by_index(&table, "fts", &[ScalarValue::from("x")]).await,
            Err(DocError::Unsupported { .. })
        ));
        assert!(
            service
                .find_by_index(&table, "nope", &[ScalarValue::from("x")])
                .await
                .unwrap_err()
                .is_not_found()
        );
    }

    #[tokio::test]
    async fn test_validation_runs_before_storage() {
        let service = service().await;
        let table = users(&service).await;
        let scalar = Document::from_json(Identifier::of(1), &json!(42)).unwrap();
        let err = service.create(&table, &scalar).await.unwrap_err();
        assert!(matches!(err, DocError::Validation(_)));
        assert!(!service.exists(&table, &Identifier::of(1)).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_table_invalidates_cache() {
        let service = service().await;
        let table = users(&service).await;
        service
            .create(&table, &doc(1, json!({})))
            .await
            .unwrap();
        assert!(service.cache().document(&table).is_some());
        assert!(service.delete_table(&table).await.unwrap());
        assert!(service.cache().document(&table).is_none());
        assert!(
            service
                .read(&table, &Identifier::of(1))
                .await
                .unwrap_err()
                .is_not_found()
        );
    }

    #[tokio::test]
    async fn test_view_list_read_before_create_view_is_not_cached() {
        let service = service().await;
        let table = users(&service).await;

        // a writer resolves the (empty) view list, then create_view lands
        let seen = service.cache().generation(&table);
        let stale = service.catalog().views().list(&table).await.unwrap();
        email_view(&service).await;
        service.cache().insert_views(&table, seen, Vec::new());
        assert!(stale.is_empty());
        assert!(service.cache().views(&table).is_none());

        let outcome = service
            .create(&table, &doc(1, json!({"email": "a"})))
            .await
            .unwrap();
        assert_eq!(outcome.views.len(), 1);
        assert!(view_content(&service, &table, "a").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_uuid_keyed_reads() {
        let service = service().await;
        let table = Table::new("acme", "events", "(day:text), at:timestamp, id:uuid");
        service.create_table(&table).await.unwrap();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        for (millis, id) in [(2_000, second), (1_000, first)] {
            let identifier = Identifier::new([
                ScalarValue::from("2026-01-01"),
                ScalarValue::timestamp_millis(millis).unwrap(),
                ScalarValue::from(id),
            ]);
            service
                .create(&table.id(), &Document::from_json(identifier, &json!({})).unwrap())
                .await
                .unwrap();
        }
        let day = service
            .read_all(&table.id(), &Identifier::of("2026-01-01"))
            .await
            .unwrap();
        assert_eq!(day.len(), 2);
        assert_eq!(day[0].identifier.get(2), Some(&ScalarValue::from(first)));
    }
}
