//! # Memory Core
//!
//! Core types and traits for conversation memory storage.
//! Used by the `memory` engine crate and by the store implementations.
//!
//! ## Modules
//!
//! - [`types`] - Entry, SummaryEntry, TurnPair, MemoryRole
//! - [`store`] - Document, DocumentStore trait, cosine distance
//! - [`adapters`] - TokenCounter and Summarizer traits injected into the engine

pub mod adapters;
pub mod store;
pub mod types;

pub use adapters::*;
pub use store::*;
pub use types::*;
