//! # Core Types
//!
//! ## Entry
//!
//! One persisted message of a turn pair. IDs are allocated by the ledger, strictly increasing
//! and never reused; a user entry and its assistant reply reference each other via `pair_id`.
//!
//! ## SummaryEntry
//!
//! A compacted turn pair. `source_ids` always names one user entry and one assistant entry.
//!
//! ## Document mapping
//!
//! Both entry kinds are stored as [`Document`]s: `content` is the document body and every
//! other field travels in `metadata`. Reads rehydrate the content alongside the metadata.

use anyhow::Context as _;
use chrono::{DateTime, Utc};
use prompt::{ChatMessage, MessageRole};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::store::Document;

/// ID of an entry in the turn store.
pub type TurnId = u64;
/// ID of an entry in the summary store.
pub type SummaryId = u64;

/// Represents the role of a message in a conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MemoryRole {
    User,
    Assistant,
    System,
}

impl From<MemoryRole> for MessageRole {
    fn from(role: MemoryRole) -> Self {
        match role {
            MemoryRole::User => MessageRole::User,
            MemoryRole::Assistant => MessageRole::Assistant,
            MemoryRole::System => MessageRole::System,
        }
    }
}

/// A single persisted message of a turn pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    pub id: TurnId,
    pub role: MemoryRole,
    /// Message text including its timestamp prefix.
    pub content: String,
    /// ID of the counterpart entry created in the same exchange.
    pub pair_id: TurnId,
    pub utc_time: DateTime<Utc>,
    pub num_tokens: usize,
    /// Model that produced an assistant entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Everything about an [`Entry`] except its body, as stored in document metadata.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EntryMetadata {
    role: MemoryRole,
    pair_id: TurnId,
    utc_time: DateTime<Utc>,
    num_tokens: usize,
    #[serde(default)]
    model: Option<String>,
}

impl Entry {
    /// Strips the entry to `{role, content}`.
    pub fn to_message(&self) -> ChatMessage {
        ChatMessage {
            role: self.role.into(),
            content: self.content.clone(),
        }
    }

    /// Converts to a store document carrying the given embedding.
    pub fn to_document(&self, embedding: Vec<f32>) -> Result<Document, anyhow::Error> {
        let metadata = serde_json::to_value(EntryMetadata {
            role: self.role,
            pair_id: self.pair_id,
            utc_time: self.utc_time,
            num_tokens: self.num_tokens,
            model: self.model.clone(),
        })?;
        Ok(Document {
            id: self.id,
            content: self.content.clone(),
            embedding,
            metadata,
        })
    }

    /// Rebuilds an entry from a store document.
    pub fn from_document(document: Document) -> Result<Self, anyhow::Error> {
        let metadata: EntryMetadata = serde_json::from_value(document.metadata)
            .with_context(|| format!("invalid entry metadata for turn {}", document.id))?;
        Ok(Self {
            id: document.id,
            role: metadata.role,
            content: document.content,
            pair_id: metadata.pair_id,
            utc_time: metadata.utc_time,
            num_tokens: metadata.num_tokens,
            model: metadata.model,
        })
    }
}

/// A completed exchange: the query and the assistant response that answered it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TurnPair {
    /// The query side; normally a user entry, a system entry for injected notes.
    pub user: Entry,
    pub assistant: Entry,
}

impl TurnPair {
    /// `(user_id, assistant_id)`, the shape used for `SummaryEntry::source_ids`.
    pub fn ids(&self) -> (TurnId, TurnId) {
        (self.user.id, self.assistant.id)
    }

    pub fn to_messages(&self) -> Vec<ChatMessage> {
        vec![self.user.to_message(), self.assistant.to_message()]
    }

    pub fn num_tokens(&self) -> usize {
        self.user.num_tokens + self.assistant.num_tokens
    }

    /// Pairs two entries regardless of the order they were fetched in.
    ///
    /// Returns `None` unless exactly one is an assistant entry and they reference each other.
    pub fn from_entries(a: Entry, b: Entry) -> Option<Self> {
        let (user, assistant) = match (a.role, b.role) {
            (MemoryRole::Assistant, MemoryRole::Assistant) => return None,
            (_, MemoryRole::Assistant) => (a, b),
            (MemoryRole::Assistant, _) => (b, a),
            _ => return None,
        };
        if user.pair_id != assistant.id || assistant.pair_id != user.id {
            return None;
        }
        Some(Self { user, assistant })
    }
}

/// A compacted turn pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SummaryEntry {
    pub id: SummaryId,
    /// `(user_id, assistant_id)` of the pair this summary condenses.
    pub source_ids: (TurnId, TurnId),
    pub utc_time: DateTime<Utc>,
    pub num_tokens: usize,
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SummaryMetadata {
    source_ids: (TurnId, TurnId),
    utc_time: DateTime<Utc>,
    num_tokens: usize,
}

impl SummaryEntry {
    /// True if either source turn is in `turn_ids`.
    pub fn overlaps(&self, turn_ids: &BTreeSet<TurnId>) -> bool {
        turn_ids.contains(&self.source_ids.0) || turn_ids.contains(&self.source_ids.1)
    }

    /// Summaries are sent to the model as system messages.
    pub fn to_message(&self) -> ChatMessage {
        ChatMessage::system(self.content.clone())
    }

    pub fn to_document(&self, embedding: Vec<f32>) -> Result<Document, anyhow::Error> {
        let metadata = serde_json::to_value(SummaryMetadata {
            source_ids: self.source_ids,
            utc_time: self.utc_time,
            num_tokens: self.num_tokens,
        })?;
        Ok(Document {
            id: self.id,
            content: self.content.clone(),
            embedding,
            metadata,
        })
    }

    pub fn from_document(document: Document) -> Result<Self, anyhow::Error> {
        let metadata: SummaryMetadata = serde_json::from_value(document.metadata)
            .with_context(|| format!("invalid summary metadata for summary {}", document.id))?;
        Ok(Self {
            id: document.id,
            source_ids: metadata.source_ids,
            utc_time: metadata.utc_time,
            num_tokens: metadata.num_tokens,
            content: document.content,
        })
    }
}
