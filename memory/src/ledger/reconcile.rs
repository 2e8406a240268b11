//! Startup reconciliation between the ledger and the two stores.
//!
//! Each write is atomic on its own, but a crash between writes can still leave the ledger and
//! the stores disagreeing. One pass:
//!
//! 1. Rewinds the turn counter until it names the assistant entry of a complete pair, deleting
//!    half-written pairs found on the way.
//! 2. Rewinds the summary counter until it names a stored summary.
//! 3. Deletes newest summaries that reference turns beyond the turn counter.
//! 4. Points `pending_pair` at the oldest pair after the newest summary, or clears it when
//!    every pair is summarized.
//!
//! Passes repeat until nothing changes, and the ledger is saved only if it differs from what
//! was loaded. A second run with no intervening writes is therefore a no-op.

use memory_core::{MemoryRole, SummaryId, TurnId, TurnPair};
use tracing::{info, instrument, warn};

use super::Ledger;
use crate::error::{MemoryError, Result};
use crate::stores::{SummaryStore, TurnStore};

const MAX_PASSES: usize = 8;

/// What reconciliation repaired.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Set when a committed but unsummarized pair had no pending marker.
    pub recovered_pending_pair: Option<(TurnId, TurnId)>,
    pub removed_turns: Vec<TurnId>,
    pub removed_summaries: Vec<SummaryId>,
    pub turn_ids_rewound: u64,
    pub summary_ids_rewound: u64,
    /// True if the ledger changed and was persisted.
    pub saved: bool,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        !self.saved && self.removed_turns.is_empty() && self.removed_summaries.is_empty()
    }
}

impl Ledger {
    /// Repairs the ledger and stores after an unclean shutdown.
    ///
    /// # Errors
    ///
    /// [`MemoryError::StoreInconsistency`] when a store holds entries no counter can address:
    /// a counter rewound to zero over a non-empty store, or an entry at the counter's next ID.
    #[instrument(skip_all, fields(path = %self.path.display()))]
    pub async fn reconcile(
        &mut self,
        turns: &TurnStore,
        summaries: &SummaryStore,
    ) -> Result<ReconcileReport> {
        let loaded = self.state.clone();
        let mut report = ReconcileReport::default();

        let mut converged = false;
        for _ in 0..MAX_PASSES {
            let before = (
                self.state.clone(),
                report.removed_turns.len(),
                report.removed_summaries.len(),
            );

            self.rewind_turn_counter(turns, &mut report).await?;
            self.rewind_summary_counter(summaries, &mut report).await?;
            self.truncate_dangling_summaries(summaries, &mut report)
                .await?;
            self.settle_pending_pair(turns, summaries, &mut report)
                .await?;

            let after = (
                self.state.clone(),
                report.removed_turns.len(),
                report.removed_summaries.len(),
            );
            if before == after {
                converged = true;
                break;
            }
        }
        if !converged {
            return Err(MemoryError::StoreInconsistency(format!(
                "ledger reconciliation did not converge after {MAX_PASSES} passes"
            )));
        }

        if self.state != loaded {
            self.save().await?;
            report.saved = true;
            info!(
                next_turn_id = self.state.next_turn_id,
                next_summary_id = self.state.next_summary_id,
                pending = ?self.state.pending_pair.as_ref().map(TurnPair::ids),
                "Ledger repaired"
            );
        }
        Ok(report)
    }

    async fn rewind_turn_counter(
        &mut self,
        turns: &TurnStore,
        report: &mut ReconcileReport,
    ) -> Result<()> {
        let next = self.state.next_turn_id;
        if turns.get_one(next).await?.is_some() {
            return Err(MemoryError::StoreInconsistency(format!(
                "turn store holds entry {next} but the ledger has not allocated it"
            )));
        }

        loop {
            let newest = self.state.last_turn_id();
            if newest == 0 {
                let remaining = turns.count().await?;
                if remaining > 0 {
                    return Err(MemoryError::StoreInconsistency(format!(
                        "turn counter exhausted but {remaining} entries remain in the turn store"
                    )));
                }
                return Ok(());
            }

            match turns.get_one(newest).await? {
                Some(entry) if entry.role == MemoryRole::Assistant => {
                    if turns.pair_of(entry).await?.is_some() {
                        return Ok(());
                    }
                    warn!(turn_id = newest, "Deleting assistant entry without its user entry");
                    turns.delete(newest).await?;
                    report.removed_turns.push(newest);
                }
                Some(entry) => {
                    warn!(turn_id = newest, role = ?entry.role, "Deleting half-written turn pair");
                    turns.delete(newest).await?;
                    report.removed_turns.push(newest);
                }
                None => {
                    warn!(turn_id = newest, "Turn counter ahead of turn store; rewinding");
                }
            }
            self.state.next_turn_id -= 1;
            report.turn_ids_rewound += 1;
        }
    }

    async fn rewind_summary_counter(
        &mut self,
        summaries: &SummaryStore,
        report: &mut ReconcileReport,
    ) -> Result<()> {
        let next = self.state.next_summary_id;
        if summaries.get_one(next).await?.is_some() {
            return Err(MemoryError::StoreInconsistency(format!(
                "summary store holds summary {next} but the ledger has not allocated it"
            )));
        }

        loop {
            let newest = self.state.last_summary_id();
            if newest == 0 {
                let remaining = summaries.count().await?;
                if remaining > 0 {
                    return Err(MemoryError::StoreInconsistency(format!(
                        "summary counter exhausted but {remaining} summaries remain"
                    )));
                }
                return Ok(());
            }
            if summaries.get_one(newest).await?.is_some() {
                return Ok(());
            }
            warn!(summary_id = newest, "Summary counter ahead of summary store; rewinding");
            self.state.next_summary_id -= 1;
            report.summary_ids_rewound += 1;
        }
    }

    async fn truncate_dangling_summaries(
        &mut self,
        summaries: &SummaryStore,
        report: &mut ReconcileReport,
    ) -> Result<()> {
        loop {
            let newest = self.state.last_summary_id();
            if newest == 0 {
                return Ok(());
            }
            let last_turn = self.state.last_turn_id();
            let beyond_counter = newest * 2 > last_turn;
            let beyond_sources = summaries
                .get_one(newest)
                .await?
                .is_some_and(|s| s.source_ids.0 > last_turn || s.source_ids.1 > last_turn);
            if !beyond_counter && !beyond_sources {
                return Ok(());
            }

            warn!(
                summary_id = newest,
                last_turn_id = last_turn,
                "Deleting summary of turns the turn store no longer holds"
            );
            summaries.delete(newest).await?;
            report.removed_summaries.push(newest);
            self.state.next_summary_id -= 1;
        }
    }

    async fn settle_pending_pair(
        &mut self,
        turns: &TurnStore,
        summaries: &SummaryStore,
        report: &mut ReconcileReport,
    ) -> Result<()> {
        let last_turn = self.state.last_turn_id();
        let covered_through = match self.state.last_summary_id() {
            0 => 0,
            id => summaries
                .get_one(id)
                .await?
                .map(|s| s.source_ids.1)
                .unwrap_or(0),
        };

        let desired = if last_turn <= covered_through {
            None
        } else {
            match turns
                .pair_after(covered_through, self.state.next_turn_id)
                .await?
            {
                Some(pair) => Some(pair),
                None => match turns.get_one(last_turn).await? {
                    Some(newest) => turns.pair_of(newest).await?,
                    None => None,
                },
            }
        };

        let current_ids = self.state.pending_pair.as_ref().map(TurnPair::ids);
        let desired_ids = desired.as_ref().map(TurnPair::ids);
        if current_ids == desired_ids {
            return Ok(());
        }

        match (current_ids, desired_ids) {
            (None, Some(ids)) => {
                warn!(?ids, "Recovering committed turn pair that was never summarized");
                report.recovered_pending_pair = Some(ids);
            }
            (Some(stale), None) => {
                info!(?stale, "Clearing pending pair that is already summarized");
            }
            (stale, ids) => {
                warn!(?stale, ?ids, "Replacing stale pending pair");
            }
        }
        self.state.pending_pair = desired;
        Ok(())
    }
}
