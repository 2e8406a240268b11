//! Tiered, token-bounded context assembly.

use chrono::Utc;
use memory_core::{SummaryEntry, SummaryId, TokenCounter, TurnId, TurnPair};
use prompt::ChatMessage;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use super::budget::TokenBudget;
use super::types::{AssembledContext, ContextMetadata, TierCounts};
use crate::config::MemoryConfig;
use crate::error::Result;
use crate::ledger::LedgerState;
use crate::stores::{SummaryStore, TurnStore};

/// Summaries fetched per store round trip while backfilling.
const BACKFILL_CHUNK: u64 = 16;

/// Builder for the message list sent to the model.
///
/// Tiers run in order, each only while the previous one left budget unfilled:
///
/// 1. **Recency**: the newest `min_recent_pairs` pairs, newest first.
/// 2. **Similar turns**: nearest turns to the query, each pulled in with its counterpart.
/// 3. **Similar summaries**: nearest summaries to the query.
///
/// A **backfill** pass then always walks summaries from newest to oldest. Every tier stops at
/// the first item that does not fit. Anything whose turns are already represented is
/// skipped, so a pair never appears both verbatim and summarized. The output is sorted
/// oldest first and led by the system message.
pub struct ContextBuilder {
    turns: TurnStore,
    summaries: SummaryStore,
    token_counter: Arc<dyn TokenCounter>,
    next_turn_id: TurnId,
    next_summary_id: SummaryId,
    system_message: Option<ChatMessage>,
    query: String,
    min_recent_pairs: usize,
    token_limit: usize,
    query_size: usize,
    query_max_size: usize,
    distance_cutoff: Option<f32>,
    only_summaries: bool,
}

impl ContextBuilder {
    /// Creates a builder over the stores as of `ledger`.
    pub fn new(
        turns: TurnStore,
        summaries: SummaryStore,
        token_counter: Arc<dyn TokenCounter>,
        ledger: &LedgerState,
    ) -> Self {
        let defaults = MemoryConfig::default();
        Self {
            turns,
            summaries,
            token_counter,
            next_turn_id: ledger.next_turn_id,
            next_summary_id: ledger.next_summary_id,
            system_message: None,
            query: String::new(),
            min_recent_pairs: defaults.min_recent_pairs,
            token_limit: defaults.default_max_tokens(),
            query_size: defaults.query_size,
            query_max_size: defaults.query_max_size,
            distance_cutoff: defaults.distance_cutoff,
            only_summaries: false,
        }
    }

    /// Applies the context defaults from `config`.
    pub fn with_config(self, config: &MemoryConfig) -> Self {
        self.with_min_recent_pairs(config.min_recent_pairs)
            .with_token_limit(config.default_max_tokens())
            .with_query_size(config.query_size, config.query_max_size)
            .with_distance_cutoff(config.distance_cutoff)
    }

    pub fn with_system_message(mut self, message: ChatMessage) -> Self {
        self.system_message = Some(message);
        self
    }

    pub fn without_system_message(mut self) -> Self {
        self.system_message = None;
        self
    }

    /// Sets the query for the similarity tiers. An empty query skips them.
    pub fn with_query(mut self, query: &str) -> Self {
        self.query = query.to_string();
        self
    }

    pub fn with_min_recent_pairs(mut self, pairs: usize) -> Self {
        self.min_recent_pairs = pairs;
        self
    }

    /// Sets the maximum token count of the result, system message included.
    pub fn with_token_limit(mut self, limit: usize) -> Self {
        self.token_limit = limit;
        self
    }

    pub fn with_query_size(mut self, size: usize, max_size: usize) -> Self {
        self.query_size = size;
        self.query_max_size = max_size;
        self
    }

    pub fn with_distance_cutoff(mut self, cutoff: Option<f32>) -> Self {
        self.distance_cutoff = cutoff;
        self
    }

    /// Skips the verbatim tiers; only summaries are gathered.
    pub fn only_summaries(mut self) -> Self {
        self.only_summaries = true;
        self
    }

    #[instrument(
        skip(self),
        fields(
            token_limit = self.token_limit,
            min_recent_pairs = self.min_recent_pairs,
            only_summaries = self.only_summaries,
            next_turn_id = self.next_turn_id,
            next_summary_id = self.next_summary_id
        )
    )]
    pub async fn build(&self) -> Result<AssembledContext> {
        let mut budget = TokenBudget::new(self.token_limit);
        let system_tokens = self
            .system_message
            .as_ref()
            .map(|m| self.token_counter.count_tokens(&m.content));
        if let Some(tokens) = system_tokens {
            budget.charge(tokens);
        }

        let mut assembly = Assembly::default();
        let mut filled = false;

        if !self.only_summaries {
            filled = self.recency_tier(&mut budget, &mut assembly).await?;
        }

        if !filled {
            if let Some(embedding) = self.embed_query().await {
                if !self.only_summaries {
                    filled = self
                        .similar_turns_tier(&embedding, &mut budget, &mut assembly)
                        .await?;
                }
                if !filled {
                    filled = self
                        .similar_summaries_tier(&embedding, &mut budget, &mut assembly)
                        .await?;
                }
            }
        }

        filled |= self.backfill_summaries(&mut budget, &mut assembly).await?;

        let context = assembly.finish(
            self.system_message.clone(),
            system_tokens,
            budget.used(),
            self.token_limit,
            filled,
        );
        info!(
            total_tokens = context.metadata.total_tokens,
            recent_pairs = context.metadata.tiers.recent_pairs,
            similar_pairs = context.metadata.tiers.similar_pairs,
            similar_summaries = context.metadata.tiers.similar_summaries,
            backfilled_summaries = context.metadata.tiers.backfilled_summaries,
            budget_filled = filled,
            "Context assembled"
        );
        Ok(context)
    }

    /// Returns true if a pair was dropped for budget.
    async fn recency_tier(&self, budget: &mut TokenBudget, assembly: &mut Assembly) -> Result<bool> {
        let pairs = self
            .turns
            .recent_pairs(self.next_turn_id, self.min_recent_pairs)
            .await?;
        for pair in pairs.into_iter().rev() {
            if !budget.try_spend(pair.num_tokens()) {
                debug!(pair = ?pair.ids(), remaining = budget.remaining(), "Recency tier full");
                return Ok(true);
            }
            assembly.tiers.recent_pairs += 1;
            assembly.push_pair(pair);
        }
        Ok(false)
    }

    async fn similar_turns_tier(
        &self,
        embedding: &[f32],
        budget: &mut TokenBudget,
        assembly: &mut Assembly,
    ) -> Result<bool> {
        let written = self.next_turn_id.saturating_sub(1) as usize;
        let k = self.query_size.min(self.query_max_size).min(written);
        for (entry, distance) in self.turns.nearest(embedding, k).await? {
            if self.beyond_cutoff(distance) {
                break;
            }
            if assembly.included.contains(&entry.id) {
                continue;
            }
            let entry_id = entry.id;
            let Some(pair) = self.turns.pair_of(entry).await? else {
                warn!(turn_id = entry_id, "Similar turn has no counterpart; skipping");
                continue;
            };
            let (user_id, assistant_id) = pair.ids();
            if assembly.included.contains(&user_id) || assembly.included.contains(&assistant_id) {
                continue;
            }
            if !budget.try_spend(pair.num_tokens()) {
                debug!(pair = ?pair.ids(), distance, "Similar turn tier full");
                return Ok(true);
            }
            debug!(pair = ?pair.ids(), distance, preview = %preview(&pair.user.content), "Similar pair");
            assembly.tiers.similar_pairs += 1;
            assembly.push_pair(pair);
        }
        Ok(false)
    }

    async fn similar_summaries_tier(
        &self,
        embedding: &[f32],
        budget: &mut TokenBudget,
        assembly: &mut Assembly,
    ) -> Result<bool> {
        let written = self.next_summary_id.saturating_sub(1) as usize;
        let k = self.query_size.min(self.query_max_size).min(written);
        for (summary, distance) in self.summaries.nearest(embedding, k).await? {
            if self.beyond_cutoff(distance) {
                break;
            }
            if summary.overlaps(&assembly.included) {
                continue;
            }
            if !budget.try_spend(summary.num_tokens) {
                debug!(summary_id = summary.id, distance, "Similar summary tier full");
                return Ok(true);
            }
            debug!(summary_id = summary.id, distance, preview = %preview(&summary.content), "Similar summary");
            assembly.tiers.similar_summaries += 1;
            assembly.push_summary(summary);
        }
        Ok(false)
    }

    /// Walks summaries newest to oldest, skipping those already represented.
    async fn backfill_summaries(
        &self,
        budget: &mut TokenBudget,
        assembly: &mut Assembly,
    ) -> Result<bool> {
        let mut upper = self.next_summary_id.saturating_sub(1);
        while upper > 0 {
            let lower = upper.saturating_sub(BACKFILL_CHUNK - 1).max(1);
            let ids: Vec<SummaryId> = (lower..=upper).collect();
            for summary in self.summaries.get(&ids).await?.into_iter().rev() {
                if summary.overlaps(&assembly.included) {
                    continue;
                }
                if !budget.try_spend(summary.num_tokens) {
                    debug!(summary_id = summary.id, remaining = budget.remaining(), "Backfill stopped");
                    return Ok(true);
                }
                assembly.tiers.backfilled_summaries += 1;
                assembly.push_summary(summary);
            }
            upper = lower - 1;
        }
        Ok(false)
    }

    /// Embeds the query once. A failure degrades to no similarity tiers.
    async fn embed_query(&self) -> Option<Vec<f32>> {
        let query = self.query.trim();
        if query.is_empty() {
            return None;
        }
        match self.turns.embedder().embed(query).await {
            Ok(embedding) => Some(embedding),
            Err(e) => {
                warn!(error = %e, "Query embedding failed; skipping similarity tiers");
                None
            }
        }
    }

    fn beyond_cutoff(&self, distance: f32) -> bool {
        self.distance_cutoff.is_some_and(|cutoff| distance > cutoff)
    }
}

enum ContextItem {
    Pair(TurnPair),
    Summary(SummaryEntry),
}

impl ContextItem {
    /// Chronological position: the oldest underlying turn.
    fn order_key(&self) -> TurnId {
        match self {
            ContextItem::Pair(pair) => pair.user.id.min(pair.assistant.id),
            ContextItem::Summary(summary) => summary.source_ids.0.min(summary.source_ids.1),
        }
    }
}

#[derive(Default)]
struct Assembly {
    items: Vec<ContextItem>,
    /// Turn IDs represented so far, verbatim or summarized.
    included: BTreeSet<TurnId>,
    verbatim: BTreeSet<TurnId>,
    tiers: TierCounts,
}

impl Assembly {
    fn push_pair(&mut self, pair: TurnPair) {
        let (user_id, assistant_id) = pair.ids();
        self.included.extend([user_id, assistant_id]);
        self.verbatim.extend([user_id, assistant_id]);
        self.items.push(ContextItem::Pair(pair));
    }

    fn push_summary(&mut self, summary: SummaryEntry) {
        self.included
            .extend([summary.source_ids.0, summary.source_ids.1]);
        self.items.push(ContextItem::Summary(summary));
    }

    fn finish(
        mut self,
        system_message: Option<ChatMessage>,
        system_tokens: Option<usize>,
        total_tokens: usize,
        token_limit: usize,
        budget_filled: bool,
    ) -> AssembledContext {
        self.items.sort_by_key(ContextItem::order_key);

        let mut messages = Vec::with_capacity(self.items.len() * 2 + 1);
        messages.extend(system_message);
        let mut summary_ids = Vec::new();
        for item in self.items {
            match item {
                ContextItem::Pair(pair) => messages.extend(pair.to_messages()),
                ContextItem::Summary(summary) => {
                    summary_ids.push(summary.id);
                    messages.push(summary.to_message());
                }
            }
        }

        AssembledContext {
            messages,
            metadata: ContextMetadata {
                total_tokens,
                system_tokens,
                token_limit,
                tiers: self.tiers,
                turn_ids: self.verbatim,
                summary_ids,
                budget_filled,
                created_at: Utc::now(),
            },
        }
    }
}

/// Truncates a string for logging; appends "..." if truncated.
fn preview(s: &str) -> String {
    const MAX_LEN: usize = 80;
    match s.char_indices().nth(MAX_LEN) {
        Some((cut, _)) => format!("{}...", &s[..cut]),
        None => s.to_string(),
    }
}
