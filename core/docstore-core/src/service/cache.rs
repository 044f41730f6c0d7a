//! Repository caches owned by the document service.
//!
//! Entries are built lazily from the schema catalog. Two callers missing the
//! same entry may both build it; the first insert wins and the other copy is
//! dropped.
//!
//! Every `invalidate` bumps a per-table generation (`clear` bumps all of
//! them). A caller takes the generation before reading the catalog and hands
//! it back on insert; an entry built from a read that raced an invalidation
//! is returned to that caller but not kept.

use crate::document::repository::DocumentRepository;
use crate::index::BucketedViewIndex;
use crate::schema::model::{TableId, View};
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// A view record together with the repository over its projection table.
pub struct ViewBinding {
    pub view: View,
    pub repository: DocumentRepository,
}

impl ViewBinding {
    pub fn name(&self) -> &str {
        &self.view.name
    }
}

pub type Views = Arc<Vec<ViewBinding>>;
pub type Indexes = Arc<Vec<BucketedViewIndex>>;

#[derive(Default)]
pub struct ServiceCache {
    documents: DashMap<TableId, Arc<DocumentRepository>>,
    views: DashMap<TableId, Views>,
    indexes: DashMap<TableId, Indexes>,
    generations: DashMap<TableId, u64>,
    epoch: AtomicU64,
}

impl ServiceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current generation of a table's entries.
    pub fn generation(&self, table: &TableId) -> u64 {
        self.epoch.load(Ordering::SeqCst) + self.generations.get(table).map_or(0, |g| *g)
    }

    pub fn document(&self, table: &TableId) -> Option<Arc<DocumentRepository>> {
        self.documents.get(table).map(|e| Arc::clone(e.value()))
    }

    pub fn insert_document(
        &self,
        table: &TableId,
        seen: u64,
        repository: DocumentRepository,
    ) -> Arc<DocumentRepository> {
        self.insert_current(&self.documents, table, seen, repository)
    }

    pub fn views(&self, table: &TableId) -> Option<Views> {
        self.views.get(table).map(|e| Arc::clone(e.value()))
    }

    pub fn insert_views(&self, table: &TableId, seen: u64, views: Vec<ViewBinding>) -> Views {
        self.insert_current(&self.views, table, seen, views)
    }

    pub fn indexes(&self, table: &TableId) -> Option<Indexes> {
        self.indexes.get(table).map(|e| Arc::clone(e.value()))
    }

    pub fn insert_indexes(
        &self,
        table: &TableId,
        seen: u64,
        indexes: Vec<BucketedViewIndex>,
    ) -> Indexes {
        self.insert_current(&self.indexes, table, seen, indexes)
    }

    /// Insert unless present, then drop the entry again if the table was
    /// invalidated after `seen` was taken.
    fn insert_current<T>(
        &self,
        map: &DashMap<TableId, Arc<T>>,
        table: &TableId,
        seen: u64,
        value: T,
    ) -> Arc<T> {
        let cached = Arc::clone(
            map.entry(table.clone())
                .or_insert_with(|| Arc::new(value))
                .value(),
        );
        if self.generation(table) != seen {
            map.remove_if(table, |_, v| Arc::ptr_eq(v, &cached));
        }
        cached
    }

    /// Forget everything cached for one table.
    pub fn invalidate(&self, table: &TableId) {
        *self.generations.entry(table.clone()).or_insert(0) += 1;
        self.documents.remove(table);
        self.views.remove(table);
        self.indexes.remove(table);
    }

    pub fn clear(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.documents.clear();
        self.views.clear();
        self.indexes.clear();
    }
}
