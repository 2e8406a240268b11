//! Adapters for maintenance commands that never call a model.
//!
//! Token counts use the character estimate. Embedding and summarization fail, so context
//! previews skip the similarity tiers and reductions stay pending for the real application.

use async_trait::async_trait;
use embedding::EmbeddingService;
use memory::MemoryAdapters;
use memory_core::{EstimateTokenCounter, Summarizer};
use prompt::ChatMessage;
use std::sync::Arc;

struct OfflineEmbedder;

#[async_trait]
impl EmbeddingService for OfflineEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, anyhow::Error> {
        anyhow::bail!("no embedding service is configured for memctl")
    }
}

struct OfflineSummarizer;

#[async_trait]
impl Summarizer for OfflineSummarizer {
    async fn summarize(&self, _turns: &[ChatMessage]) -> Result<ChatMessage, anyhow::Error> {
        anyhow::bail!("no summarization model is configured for memctl")
    }
}

pub fn adapters() -> MemoryAdapters {
    MemoryAdapters {
        token_counter: Arc::new(EstimateTokenCounter),
        embedder: Arc::new(OfflineEmbedder),
        summarizer: Arc::new(OfflineSummarizer),
    }
}
