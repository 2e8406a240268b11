//! Assembled context and its metadata.

use chrono::{DateTime, Utc};
use memory_core::{SummaryId, TurnId};
use prompt::ChatMessage;
use std::collections::BTreeSet;

/// How many items each tier contributed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TierCounts {
    pub recent_pairs: usize,
    pub similar_pairs: usize,
    pub similar_summaries: usize,
    pub backfilled_summaries: usize,
}

/// Metadata about an assembled context.
#[derive(Debug, Clone)]
pub struct ContextMetadata {
    /// Tokens of every returned message, system message included.
    pub total_tokens: usize,
    /// Tokens of the leading system message, if one was rendered.
    pub system_tokens: Option<usize>,
    pub token_limit: usize,
    pub tiers: TierCounts,
    /// Turns included verbatim.
    pub turn_ids: BTreeSet<TurnId>,
    /// Summaries included, in output order.
    pub summary_ids: Vec<SummaryId>,
    /// True once some tier had to drop an item for lack of budget.
    pub budget_filled: bool,
    pub created_at: DateTime<Utc>,
}

/// The message list to send to the model, oldest history first, system message leading.
#[derive(Debug, Clone)]
pub struct AssembledContext {
    pub messages: Vec<ChatMessage>,
    pub metadata: ContextMetadata,
}

impl AssembledContext {
    /// True if no history (turns or summaries) was included.
    pub fn is_empty(&self) -> bool {
        self.metadata.turn_ids.is_empty() && self.metadata.summary_ids.is_empty()
    }

    /// Checks if the context exceeds the token limit.
    pub fn exceeds_limit(&self, limit: usize) -> bool {
        self.metadata.total_tokens > limit
    }

    /// The leading system message, if one was rendered.
    pub fn system_message(&self) -> Option<&ChatMessage> {
        self.metadata
            .system_tokens
            .and_then(|_| self.messages.first())
    }

    pub fn into_messages(self) -> Vec<ChatMessage> {
        self.messages
    }
}
