use thiserror::Error;

/// Errors surfaced by the conversation memory engine.
#[derive(Error, Debug)]
pub enum MemoryError {
    /// A new query was staged while the previous one still awaits its response.
    #[error("A user query is already pending; add the assistant response or discard it first")]
    OutOfSequence,

    #[error("No pending user query to pair the assistant response with")]
    NoPendingQuery,

    /// The summarizer failed; the pending pair is kept and retried on the next reduction.
    #[error("Summarization failed: {0}")]
    Summarization(#[source] anyhow::Error),

    #[error("Store inconsistency: {0}")]
    StoreInconsistency(String),

    #[error("Store error: {0}")]
    Store(#[source] anyhow::Error),

    #[error("Embedding error: {0}")]
    Embedding(#[source] anyhow::Error),

    #[error("Background reduction task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, MemoryError>;
