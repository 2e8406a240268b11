//! # Text Embeddings
//!
//! This crate defines the embedding service interface. The conversation memory engine embeds
//! every stored turn and summary through it, and embeds the query once per context assembly.
//! Concrete providers live outside this workspace and are injected by the caller.

use async_trait::async_trait;

/// Service for generating text embeddings.
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    /// Generates an embedding vector for a single text string.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, anyhow::Error>;

    /// Generates embedding vectors for multiple texts in a single call.
    ///
    /// The default calls [`embed`](Self::embed) once per text; providers with a batch endpoint
    /// should override it.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, anyhow::Error> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }
}
