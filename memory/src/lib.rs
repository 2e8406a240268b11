//! # Memory Crate
//!
//! The conversation memory engine. It persists an unbounded dialogue as turn pairs, answers
//! "what context goes to the model now?" under a hard token budget, compresses old exchanges
//! into summaries and one rolling long-term memory string, and repairs itself after a crash.
//!
//! ## Components
//!
//! - [`stores`] - `TurnStore` / `SummaryStore`, typed views over two `DocumentStore`s
//! - [`ledger`] - ID counters and the pending-pair marker, with startup reconciliation
//! - [`long_term`] - the long-term memory document
//! - [`context`] - tiered, token-bounded context assembly
//! - [`reducer`] - pair summarization and long-term memory regeneration
//! - [`conversation`] - `ConversationMemory`, the façade tying it together
//!
//! ## External Interactions
//!
//! - **Storage backends**: `memory-inmemory` or `memory-sqlite` via `DocumentStore`
//! - **Embedding services**: the `embedding` crate's `EmbeddingService`
//! - **Language model**: token counting and summarization through `memory-core` adapter traits
//!
//! ## Persisted state
//!
//! Under `MemoryConfig::data_dir`: `ledger.json` (`{nextTurnId, nextSummaryId, pendingPair}`)
//! and `long_term_memory.json` (`{longTermMemory}`), both replaced atomically on every write.

pub mod config;
pub mod context;
pub mod conversation;
pub mod error;
pub mod ledger;
pub mod long_term;
mod persist;
pub mod reducer;
pub mod stores;

pub use config::MemoryConfig;
pub use context::{AssembledContext, ContextBuilder, ContextMetadata, TierCounts};
pub use conversation::{ConversationMemory, MemoryAdapters, StoreCounts};
pub use error::{MemoryError, Result};
pub use ledger::{Ledger, LedgerState, ReconcileReport};
pub use long_term::LongTermMemory;
pub use reducer::ReductionOutcome;
pub use stores::{SummaryStore, TurnStore};

pub use memory_core::{Entry, MemoryRole, SummaryEntry, TurnPair};
pub use prompt::ChatMessage;
