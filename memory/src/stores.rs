//! Typed views over the two document collections.
//!
//! [`TurnStore`] holds individual [`Entry`] documents and knows how to reassemble them into
//! [`TurnPair`]s; [`SummaryStore`] holds one [`SummaryEntry`] per summarized pair. Both embed
//! content on write through the injected [`EmbeddingService`].

use embedding::EmbeddingService;
use memory_core::{DocumentStore, Entry, SummaryEntry, SummaryId, TurnId, TurnPair};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{MemoryError, Result};

/// Per-entry store of committed turns.
#[derive(Clone)]
pub struct TurnStore {
    store: Arc<dyn DocumentStore>,
    embedder: Arc<dyn EmbeddingService>,
}

impl TurnStore {
    pub fn new(store: Arc<dyn DocumentStore>, embedder: Arc<dyn EmbeddingService>) -> Self {
        Self { store, embedder }
    }

    /// Embeds both entries and writes them in one batch.
    pub async fn put_pair(&self, pair: &TurnPair) -> Result<()> {
        let texts = vec![pair.user.content.clone(), pair.assistant.content.clone()];
        let vectors = self
            .embedder
            .embed_batch(&texts)
            .await
            .map_err(MemoryError::Embedding)?;
        let [user_vec, assistant_vec]: [Vec<f32>; 2] =
            vectors.try_into().map_err(|v: Vec<Vec<f32>>| {
                MemoryError::Embedding(anyhow::anyhow!("expected 2 embeddings, got {}", v.len()))
            })?;

        let documents = vec![
            pair.user.to_document(user_vec).map_err(MemoryError::Store)?,
            pair.assistant
                .to_document(assistant_vec)
                .map_err(MemoryError::Store)?,
        ];
        self.store
            .put_batch(documents)
            .await
            .map_err(MemoryError::Store)?;
        debug!(user_id = pair.user.id, assistant_id = pair.assistant.id, "Turn pair stored");
        Ok(())
    }

    pub async fn get(&self, ids: &[TurnId]) -> Result<Vec<Entry>> {
        let documents = self
            .store
            .get_by_ids(ids)
            .await
            .map_err(MemoryError::Store)?;
        documents
            .into_iter()
            .map(|d| Entry::from_document(d).map_err(MemoryError::Store))
            .collect()
    }

    pub async fn get_one(&self, id: TurnId) -> Result<Option<Entry>> {
        Ok(self.get(&[id]).await?.into_iter().next())
    }

    /// Looks up `entry`'s counterpart and returns the pair, if both sides agree.
    pub async fn pair_of(&self, entry: Entry) -> Result<Option<TurnPair>> {
        let Some(counterpart) = self.get_one(entry.pair_id).await? else {
            return Ok(None);
        };
        Ok(TurnPair::from_entries(entry, counterpart))
    }

    /// The pair whose user entry immediately follows `after`, if it is fully written.
    pub async fn pair_after(&self, after: TurnId, next_turn_id: TurnId) -> Result<Option<TurnPair>> {
        let first = after + 1;
        if first + 1 >= next_turn_id {
            return Ok(None);
        }
        let mut entries = self.get(&[first, first + 1]).await?.into_iter();
        match (entries.next(), entries.next()) {
            (Some(a), Some(b)) => Ok(TurnPair::from_entries(a, b)),
            _ => Ok(None),
        }
    }

    /// Up to `n` most recent complete pairs below `next_turn_id`, oldest first.
    pub async fn recent_pairs(&self, next_turn_id: TurnId, n: usize) -> Result<Vec<TurnPair>> {
        if n == 0 || next_turn_id <= 1 {
            return Ok(Vec::new());
        }
        let start = next_turn_id.saturating_sub(2 * n as u64).max(1);
        let ids: Vec<TurnId> = (start..next_turn_id).collect();
        let entries = self.get(&ids).await?;
        Ok(assemble_pairs(entries))
    }

    /// Up to `k` entries closest to `query_embedding`, with their cosine distance.
    pub async fn nearest(&self, query_embedding: &[f32], k: usize) -> Result<Vec<(Entry, f32)>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let hits = self
            .store
            .nearest_neighbors(query_embedding, k)
            .await
            .map_err(MemoryError::Store)?;
        hits.into_iter()
            .map(|hit| {
                Entry::from_document(hit.document)
                    .map(|entry| (entry, hit.distance))
                    .map_err(MemoryError::Store)
            })
            .collect()
    }

    pub async fn delete(&self, id: TurnId) -> Result<()> {
        self.store.delete(id).await.map_err(MemoryError::Store)
    }

    pub async fn count(&self) -> Result<usize> {
        self.store.count().await.map_err(MemoryError::Store)
    }

    pub async fn clear(&self) -> Result<()> {
        self.store.clear().await.map_err(MemoryError::Store)
    }

    pub fn embedder(&self) -> &Arc<dyn EmbeddingService> {
        &self.embedder
    }
}

/// Pairs up entries by `pair_id`, dropping any entry whose counterpart is absent.
fn assemble_pairs(entries: Vec<Entry>) -> Vec<TurnPair> {
    let mut by_id: BTreeMap<TurnId, Entry> = entries.into_iter().map(|e| (e.id, e)).collect();
    let mut pairs = Vec::new();
    while let Some((_, entry)) = by_id.pop_first() {
        match by_id.remove(&entry.pair_id) {
            Some(counterpart) => match TurnPair::from_entries(entry, counterpart) {
                Some(pair) => pairs.push(pair),
                None => warn!("Skipping mismatched turn pair"),
            },
            None => debug!(turn_id = entry.id, "Counterpart outside range or missing"),
        }
    }
    pairs.sort_by_key(|p| p.user.id);
    pairs
}

/// Store of per-pair summaries.
#[derive(Clone)]
pub struct SummaryStore {
    store: Arc<dyn DocumentStore>,
    embedder: Arc<dyn EmbeddingService>,
}

impl SummaryStore {
    pub fn new(store: Arc<dyn DocumentStore>, embedder: Arc<dyn EmbeddingService>) -> Self {
        Self { store, embedder }
    }

    pub async fn put(&self, summary: &SummaryEntry) -> Result<()> {
        let vector = self.embed(&summary.content).await?;
        self.put_embedded(summary, vector).await
    }

    /// Embeds summary text, e.g. before taking the ledger lock for [`put_embedded`](Self::put_embedded).
    pub async fn embed(&self, content: &str) -> Result<Vec<f32>> {
        self.embedder
            .embed(content)
            .await
            .map_err(MemoryError::Embedding)
    }

    /// Stores a summary whose content was already embedded.
    pub async fn put_embedded(&self, summary: &SummaryEntry, vector: Vec<f32>) -> Result<()> {
        let document = summary.to_document(vector).map_err(MemoryError::Store)?;
        self.store.put(document).await.map_err(MemoryError::Store)?;
        debug!(summary_id = summary.id, source_ids = ?summary.source_ids, "Summary stored");
        Ok(())
    }

    pub async fn get(&self, ids: &[SummaryId]) -> Result<Vec<SummaryEntry>> {
        let documents = self
            .store
            .get_by_ids(ids)
            .await
            .map_err(MemoryError::Store)?;
        documents
            .into_iter()
            .map(|d| SummaryEntry::from_document(d).map_err(MemoryError::Store))
            .collect()
    }

    pub async fn get_one(&self, id: SummaryId) -> Result<Option<SummaryEntry>> {
        Ok(self.get(&[id]).await?.into_iter().next())
    }

    pub async fn nearest(
        &self,
        query_embedding: &[f32],
        k: usize,
    ) -> Result<Vec<(SummaryEntry, f32)>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let hits = self
            .store
            .nearest_neighbors(query_embedding, k)
            .await
            .map_err(MemoryError::Store)?;
        hits.into_iter()
            .map(|hit| {
                SummaryEntry::from_document(hit.document)
                    .map(|summary| (summary, hit.distance))
                    .map_err(MemoryError::Store)
            })
            .collect()
    }

    pub async fn delete(&self, id: SummaryId) -> Result<()> {
        self.store.delete(id).await.map_err(MemoryError::Store)
    }

    pub async fn count(&self) -> Result<usize> {
        self.store.count().await.map_err(MemoryError::Store)
    }

    pub async fn clear(&self) -> Result<()> {
        self.store.clear().await.map_err(MemoryError::Store)
    }
}
