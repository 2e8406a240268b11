//! # In-Memory Document Store
//!
//! This crate provides an in-memory implementation of the `DocumentStore` trait from `memory-core`.
//!
//! ## InMemoryDocumentStore
//!
//! Simple in-memory storage for testing and development.
//!
//! **Advantages**:
//! - Fastest performance (no I/O)
//! - Simple to set up and use
//! - Cloning shares the underlying map, so a test can "restart" an engine over the same data
//!
//! **Limitations**:
//! - Data is lost on process exit
//! - Similarity search is a linear scan
//!
//! ## Thread Safety
//!
//! The store uses `Arc<RwLock<>>`; every operation takes the lock once, so a batch is applied
//! atomically with respect to readers.

use async_trait::async_trait;
use memory_core::{rank_by_distance, Document, DocumentStore, ScoredDocument};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// In-memory document store ordered by ID.
#[derive(Debug, Clone)]
pub struct InMemoryDocumentStore {
    collection: String,
    documents: Arc<RwLock<BTreeMap<u64, Document>>>,
}

impl InMemoryDocumentStore {
    /// Creates a new empty store for the named collection.
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            documents: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    /// Returns the number of documents in the store.
    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    /// Returns true if the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Highest stored ID, if any.
    pub async fn max_id(&self) -> Option<u64> {
        self.documents.read().await.keys().next_back().copied()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    fn collection(&self) -> &str {
        &self.collection
    }

    async fn put(&self, document: Document) -> Result<(), anyhow::Error> {
        let mut documents = self.documents.write().await;
        documents.insert(document.id, document);
        Ok(())
    }

    async fn put_batch(&self, batch: Vec<Document>) -> Result<(), anyhow::Error> {
        let mut documents = self.documents.write().await;
        debug!(collection = %self.collection, count = batch.len(), "put_batch");
        for document in batch {
            documents.insert(document.id, document);
        }
        Ok(())
    }

    async fn get_by_ids(&self, ids: &[u64]) -> Result<Vec<Document>, anyhow::Error> {
        let documents = self.documents.read().await;
        let mut found: Vec<Document> = ids
            .iter()
            .filter_map(|id| documents.get(id).cloned())
            .collect();
        found.sort_by_key(|d| d.id);
        found.dedup_by_key(|d| d.id);
        Ok(found)
    }

    /// Linear scan: O(n * d) where n is the number of documents and d the vector dimension.
    async fn nearest_neighbors(
        &self,
        query_embedding: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredDocument>, anyhow::Error> {
        let documents = self.documents.read().await;
        Ok(rank_by_distance(
            documents.values().cloned(),
            query_embedding,
            k,
        ))
    }

    async fn delete(&self, id: u64) -> Result<(), anyhow::Error> {
        let mut documents = self.documents.write().await;
        documents.remove(&id);
        Ok(())
    }

    async fn count(&self) -> Result<usize, anyhow::Error> {
        Ok(self.len().await)
    }

    async fn clear(&self) -> Result<(), anyhow::Error> {
        let mut documents = self.documents.write().await;
        documents.clear();
        Ok(())
    }
}
