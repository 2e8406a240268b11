//! Model adapters injected into the memory engine.
//!
//! The engine never talks to a language model directly. It counts tokens through
//! [`TokenCounter`] and condenses turns through [`Summarizer`]; embeddings come from the
//! `embedding` crate's `EmbeddingService`.

use async_trait::async_trait;
use prompt::ChatMessage;

/// Counts model tokens in a piece of text.
pub trait TokenCounter: Send + Sync {
    fn count_tokens(&self, text: &str) -> usize;

    /// Sum over message contents.
    fn count_messages(&self, messages: &[ChatMessage]) -> usize {
        messages.iter().map(|m| self.count_tokens(&m.content)).sum()
    }
}

/// Token counter using [`estimate_tokens`]; for callers without a real tokenizer.
#[derive(Debug, Clone, Copy, Default)]
pub struct EstimateTokenCounter;

impl TokenCounter for EstimateTokenCounter {
    fn count_tokens(&self, text: &str) -> usize {
        estimate_tokens(text)
    }
}

/// Estimates the token count for a text string.
///
/// This is a rough approximation: 1 token ≈ 4 characters for English text.
/// Divides text length by 4 and rounds up, ensuring minimum of 1 token.
pub fn estimate_tokens(text: &str) -> usize {
    ((text.len() as f64) / 4.0).ceil().max(1.0) as usize
}

/// Condenses a list of messages into a single system message.
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// `turns` are already stripped to `{role, content}`. The result should have the system role.
    async fn summarize(&self, turns: &[ChatMessage]) -> Result<ChatMessage, anyhow::Error>;
}
