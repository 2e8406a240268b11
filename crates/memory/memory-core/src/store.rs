//! # Document Storage
//!
//! This module defines the storage interface shared by the turn store and the summary store.
//!
//! ## DocumentStore Trait
//!
//! An append-mostly collection keyed by integer IDs (string-encoded by backends that need a
//! text key). Each document carries its own embedding for similarity search.
//!
//! ### Required Methods
//!
//! - `put` / `put_batch`: insert or replace; a batch is all-or-nothing.
//! - `get_by_ids`: fetch by ID; missing IDs are omitted, results are ordered by ID.
//! - `nearest_neighbors`: the `k` closest documents by cosine distance, closest first.
//! - `delete`, `count`, `clear`: used by crash repair and explicit wipes.
//!
//! ### Implementations
//!
//! - **InMemoryDocumentStore** (`memory-inmemory`): tests and ephemeral sessions
//! - **SQLiteDocumentStore** (`memory-sqlite`): persistent storage
//!
//! ### Atomicity
//!
//! Every call is atomic from the caller's point of view: readers never observe a half-written
//! document or a partially applied batch.

use async_trait::async_trait;

/// A stored document: body, embedding and JSON metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: u64,
    pub content: String,
    pub embedding: Vec<f32>,
    pub metadata: serde_json::Value,
}

/// A similarity hit. Smaller `distance` means more similar.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredDocument {
    pub document: Document,
    pub distance: f32,
}

/// Trait for storing and retrieving documents.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Name of the collection, used in logs and by backends sharing one database.
    fn collection(&self) -> &str;

    /// Inserts a document, replacing any document with the same ID.
    async fn put(&self, document: Document) -> Result<(), anyhow::Error>;

    /// Inserts all documents or none of them.
    async fn put_batch(&self, documents: Vec<Document>) -> Result<(), anyhow::Error>;

    /// Retrieves documents by ID, ordered by ID. Missing IDs are omitted.
    async fn get_by_ids(&self, ids: &[u64]) -> Result<Vec<Document>, anyhow::Error>;

    /// Returns up to `k` documents ranked by ascending cosine distance to `query_embedding`.
    async fn nearest_neighbors(
        &self,
        query_embedding: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredDocument>, anyhow::Error>;

    /// Deletes a document by ID. Deleting a missing ID succeeds.
    async fn delete(&self, id: u64) -> Result<(), anyhow::Error>;

    /// Number of stored documents.
    async fn count(&self) -> Result<usize, anyhow::Error>;

    /// Removes every document.
    async fn clear(&self) -> Result<(), anyhow::Error>;
}

/// Calculates cosine similarity between two vectors.
///
/// Ranges from -1 (opposite) to 1 (identical). Empty or zero vectors yield 0.0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

/// Cosine distance, `1 - cosine_similarity`, in `[0, 2]`.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - cosine_similarity(a, b)
}

/// Ranks documents by distance to `query_embedding` and keeps the closest `k`.
///
/// Shared by backends that score in process rather than in the database.
pub fn rank_by_distance<I>(documents: I, query_embedding: &[f32], k: usize) -> Vec<ScoredDocument>
where
    I: IntoIterator<Item = Document>,
{
    let mut scored: Vec<ScoredDocument> = documents
        .into_iter()
        .map(|document| {
            let distance = cosine_distance(query_embedding, &document.embedding);
            ScoredDocument { document, distance }
        })
        .collect();

    scored.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.document.id.cmp(&b.document.id))
    });
    scored.truncate(k);
    scored
}
