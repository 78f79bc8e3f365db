//! In-memory document store.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use super::{CollectionPath, Document, DocumentPath, DocumentStore, Fields, StoreError, StoreResult};

/// Process-local document store keyed by full document path.
///
/// Cloning shares the underlying data.
#[derive(Debug, Clone)]
pub struct InMemoryStore {
    documents: Arc<RwLock<BTreeMap<DocumentPath, Fields>>>,
    writes: Arc<AtomicU64>,
    count_supported: bool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            documents: Arc::new(RwLock::new(BTreeMap::new())),
            writes: Arc::new(AtomicU64::new(0)),
            count_supported: true,
        }
    }

    /// A store that refuses count queries, like a backend with no
    /// server-side aggregation.
    pub fn without_count_support() -> Self {
        Self {
            count_supported: false,
            ..Self::new()
        }
    }

    /// Seed a document without going through the async write path.
    pub fn insert(&self, path: DocumentPath, fields: Fields) {
        self.documents.write().insert(path, fields);
    }

    /// Number of `set` calls served so far.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Ids of every document directly inside `collection`, sorted.
    pub fn document_ids(&self, collection: &CollectionPath) -> Vec<String> {
        self.documents
            .read()
            .keys()
            .filter(|path| &path.parent() == collection)
            .map(|path| path.id().to_string())
            .collect()
    }

    /// Total number of stored documents.
    pub fn len(&self) -> usize {
        self.documents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.read().is_empty()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn count(&self, collection: &CollectionPath) -> StoreResult<u64> {
        if !self.count_supported {
            return Err(StoreError::Unsupported("count"));
        }
        let count = self
            .documents
            .read()
            .keys()
            .filter(|path| &path.parent() == collection)
            .count();
        Ok(count as u64)
    }

    async fn list_documents(&self, collection: &CollectionPath) -> StoreResult<Vec<Document>> {
        let documents = self
            .documents
            .read()
            .iter()
            .filter(|(path, _)| &path.parent() == collection)
            .map(|(path, fields)| Document::new(path.id(), fields.clone()))
            .collect();
        Ok(documents)
    }

    async fn get(&self, path: &DocumentPath) -> StoreResult<Option<Document>> {
        Ok(self
            .documents
            .read()
            .get(path)
            .map(|fields| Document::new(path.id(), fields.clone())))
    }

    async fn set(&self, path: &DocumentPath, fields: Fields) -> StoreResult<()> {
        debug!(path = %path, fields = fields.len(), "memory store write");
        self.documents.write().insert(path.clone(), fields);
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
