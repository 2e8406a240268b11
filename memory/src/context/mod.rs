//! # Context Assembler
//!
//! Builds the token-bounded message list sent to the model for a new query.
//!
//! ## Example
//!
//! ```rust,no_run
//! # async fn example(memory: &memory::ConversationMemory) -> memory::Result<()> {
//! let context = memory
//!     .context_builder()
//!     .await
//!     .with_query("what did we decide about the trip?")
//!     .with_min_recent_pairs(2)
//!     .with_token_limit(2048)
//!     .build()
//!     .await?;
//! assert!(context.metadata.total_tokens <= 2048);
//! # Ok(())
//! # }
//! ```

mod budget;
mod builder;
mod types;

pub use builder::ContextBuilder;
pub use types::{AssembledContext, ContextMetadata, TierCounts};
