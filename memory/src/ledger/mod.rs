//! # ID/Metadata Ledger
//!
//! Durable counters for both stores plus the pair awaiting summarization, kept in one JSON
//! document:
//!
//! ```json
//! { "nextTurnId": 7, "nextSummaryId": 3, "pendingPair": { "user": {..}, "assistant": {..} } }
//! ```
//!
//! IDs are 1-based, so `next_turn_id - 1` is the highest turn ID ever written and a fresh
//! ledger is `{1, 1, null}`. IDs are allocated then persisted before they are returned, so a
//! crash between allocation and use never hands the same ID out twice.
//!
//! On open the ledger is reconciled against the stores (see [`reconcile`]).

mod reconcile;


pub use reconcile::ReconcileReport;

use memory_core::{SummaryId, TurnId, TurnPair};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::Result;
use crate::persist::{load_json, save_json_atomic};
use crate::stores::{SummaryStore, TurnStore};

/// Persisted ledger contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerState {
    pub next_turn_id: TurnId,
    pub next_summary_id: SummaryId,
    /// Oldest committed pair without a summary.
    pub pending_pair: Option<TurnPair>,
}

impl Default for LedgerState {
    fn default() -> Self {
        Self {
            next_turn_id: 1,
            next_summary_id: 1,
            pending_pair: None,
        }
    }
}

impl LedgerState {
    /// Highest turn ID handed out so far (0 if none).
    pub fn last_turn_id(&self) -> TurnId {
        self.next_turn_id.saturating_sub(1)
    }

    /// Highest summary ID handed out so far (0 if none).
    pub fn last_summary_id(&self) -> SummaryId {
        self.next_summary_id.saturating_sub(1)
    }

    /// Number of pairs the turn counter accounts for.
    pub fn pairs_written(&self) -> u64 {
        self.last_turn_id() / 2
    }
}

/// The ledger document and where it lives.
#[derive(Debug)]
pub struct Ledger {
    path: PathBuf,
    state: LedgerState,
}

impl Ledger {
    /// Loads the ledger at `path`; a missing file yields a fresh ledger.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let state = load_json(&path).await?.unwrap_or_default();
        debug!(path = %path.display(), ?state, "Ledger loaded");
        Ok(Self { path, state })
    }

    /// Loads and reconciles against the stores.
    pub async fn open(
        path: impl AsRef<Path>,
        turns: &TurnStore,
        summaries: &SummaryStore,
    ) -> Result<(Self, ReconcileReport)> {
        let mut ledger = Self::load(path).await?;
        let report = ledger.reconcile(turns, summaries).await?;
        Ok((ledger, report))
    }

    pub fn state(&self) -> &LedgerState {
        &self.state
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn save(&self) -> Result<()> {
        save_json_atomic(&self.path, &self.state).await
    }

    /// Allocates the next turn ID and persists the advanced counter before returning it.
    pub async fn create_turn_id(&mut self) -> Result<TurnId> {
        let id = self.state.next_turn_id;
        self.state.next_turn_id += 1;
        self.save().await?;
        Ok(id)
    }

    /// Allocates the next summary ID and persists the advanced counter before returning it.
    pub async fn create_summary_id(&mut self) -> Result<SummaryId> {
        let id = self.state.next_summary_id;
        self.state.next_summary_id += 1;
        self.save().await?;
        Ok(id)
    }

    /// Returns turn IDs from `first` on if they are still the newest allocated and went unused.
    pub async fn release_turn_ids(&mut self, first: TurnId) -> Result<()> {
        if first < self.state.next_turn_id {
            debug!(first, next_turn_id = self.state.next_turn_id, "Releasing unused turn IDs");
            self.state.next_turn_id = first;
            self.save().await?;
        }
        Ok(())
    }

    /// Returns summary ID `id` if it is still the newest allocated and went unused.
    pub async fn release_summary_id(&mut self, id: SummaryId) -> Result<()> {
        if self.state.next_summary_id == id + 1 {
            self.state.next_summary_id = id;
            self.save().await?;
        }
        Ok(())
    }

    pub async fn set_pending_pair(&mut self, pair: Option<TurnPair>) -> Result<()> {
        self.state.pending_pair = pair;
        self.save().await
    }

    /// Back to `{1, 1, null}`, persisted.
    pub async fn reset(&mut self) -> Result<()> {
        self.state = LedgerState::default();
        self.save().await
    }
}
