//! # Memory Reducer
//!
//! Turns the pending pair into a summary, then folds the summary tail into the long-term
//! memory string.
//!
//! `pending_pair` is the oldest unsummarized pair. After each summary the marker moves to the
//! next committed pair, so pairs that piled up while summarization was failing are caught up
//! in one reduction. A summarizer failure leaves the marker where it is for the next attempt.

use memory_core::{SummaryEntry, SummaryId, TurnPair};
use prompt::ChatMessage;
use tracing::{debug, info, instrument, warn};

use crate::context::ContextBuilder;
use crate::conversation::MemoryState;
use crate::error::{MemoryError, Result};

/// What one reduction did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReductionOutcome {
    pub summaries_created: Vec<SummaryId>,
    pub long_term_memory_updated: bool,
}

impl ReductionOutcome {
    /// True if there was nothing pending.
    pub fn is_noop(&self) -> bool {
        self.summaries_created.is_empty() && !self.long_term_memory_updated
    }
}

#[instrument(skip_all)]
pub(crate) async fn reduce(state: &MemoryState) -> Result<ReductionOutcome> {
    let mut outcome = ReductionOutcome::default();

    loop {
        let pending = state.ledger.read().await.state().pending_pair.clone();
        let Some(pair) = pending else {
            break;
        };
        let summary_id = summarize_pair(state, &pair).await?;
        outcome.summaries_created.push(summary_id);
    }

    if outcome.summaries_created.is_empty() {
        debug!("Nothing to reduce");
        return Ok(outcome);
    }

    match regenerate_long_term_memory(state).await {
        Ok(updated) => outcome.long_term_memory_updated = updated,
        Err(e) => warn!(error = %e, "Long-term memory not regenerated; keeping previous text"),
    }
    Ok(outcome)
}

/// Summarizes `pair`, stores the summary and advances the pending marker.
async fn summarize_pair(state: &MemoryState, pair: &TurnPair) -> Result<SummaryId> {
    let (user_id, assistant_id) = pair.ids();
    // No ledger lock is held across the summarizer or embedder calls.
    let message = state
        .summarizer
        .summarize(&pair.to_messages())
        .await
        .map_err(|e| {
            warn!(user_id, assistant_id, error = %e, "Summarization failed; pair stays pending");
            MemoryError::Summarization(e)
        })?;

    let vector = state.summaries.embed(&message.content).await?;
    let num_tokens = state.token_counter.count_tokens(&message.content);

    let mut ledger = state.ledger.write().await;
    let id = ledger.create_summary_id().await?;
    let summary = SummaryEntry {
        id,
        source_ids: (user_id, assistant_id),
        utc_time: pair.user.utc_time,
        num_tokens,
        content: message.content,
    };
    if let Err(e) = state.summaries.put_embedded(&summary, vector).await {
        ledger.release_summary_id(id).await?;
        return Err(e);
    }

    let next = state
        .turns
        .pair_after(assistant_id, ledger.state().next_turn_id)
        .await?;
    ledger.set_pending_pair(next).await?;
    info!(
        summary_id = id,
        user_id,
        assistant_id,
        num_tokens = summary.num_tokens,
        next_pending = ?ledger.state().pending_pair.as_ref().map(TurnPair::ids),
        "Turn pair summarized"
    );
    Ok(id)
}

/// Re-summarizes the current long-term memory plus as much of the summary tail as fits in
/// what is left of the summary budget. Returns false if there was nothing to fold in.
async fn regenerate_long_term_memory(state: &MemoryState) -> Result<bool> {
    let current = state.long_term.read().await.text().to_string();
    let budget = state
        .config
        .summary_budget
        .saturating_sub(state.token_counter.count_tokens(&current));

    let ledger = state.ledger.read().await.state().clone();
    let context = ContextBuilder::new(
        state.turns.clone(),
        state.summaries.clone(),
        state.token_counter.clone(),
        &ledger,
    )
    .with_config(&state.config)
    .only_summaries()
    .without_system_message()
    .with_token_limit(budget)
    .build()
    .await?;

    if context.is_empty() {
        debug!(budget, "No summaries fit the long-term memory budget");
        return Ok(false);
    }

    let mut input = Vec::with_capacity(context.messages.len() + 1);
    if !current.trim().is_empty() {
        input.push(ChatMessage::system(current));
    }
    let folded = context.metadata.summary_ids.len();
    input.extend(context.into_messages());

    let message = state
        .summarizer
        .summarize(&input)
        .await
        .map_err(MemoryError::Summarization)?;
    let num_tokens = state.token_counter.count_tokens(&message.content);
    state.long_term.write().await.replace(message.content).await?;
    info!(folded, num_tokens, "Long-term memory regenerated");
    Ok(true)
}
