//! # Conversation Memory
//!
//! The façade over stores, ledger, long-term memory, context assembler and reducer.
//!
//! A turn is committed in two steps: [`ConversationMemory::add_user_query`] stages a draft,
//! [`ConversationMemory::add_assistant_response`] allocates both IDs, writes the pair in one
//! batch and marks it pending. Reductions run on a tokio task via
//! [`ConversationMemory::spawn_reduction`]; at most one is in flight, and every mutating call
//! drains it first.
//!
//! ## Example
//!
//! ```rust,no_run
//! use memory::{ConversationMemory, MemoryAdapters, MemoryConfig};
//! use memory_inmemory::InMemoryDocumentStore;
//! use std::sync::Arc;
//!
//! # async fn example(adapters: MemoryAdapters) -> memory::Result<()> {
//! let mut memory = ConversationMemory::open(
//!     MemoryConfig::default(),
//!     Arc::new(InMemoryDocumentStore::new("turns")),
//!     Arc::new(InMemoryDocumentStore::new("summaries")),
//!     adapters,
//! )
//! .await?;
//!
//! memory.add_user_query("What's on my calendar?")?;
//! let context = memory.gather_context("What's on my calendar?", 1, None).await?;
//! // ... send context.messages to the model ...
//! memory.add_assistant_response("Nothing until noon.", Some("gpt-4o")).await?;
//! memory.spawn_reduction().await;
//! # Ok(())
//! # }
//! ```

use chrono::{Local, Utc};
use embedding::EmbeddingService;
use memory_core::{DocumentStore, Entry, MemoryRole, Summarizer, TokenCounter, TurnPair};
use prompt::{timestamp_prefix, ChatMessage, SystemPrompt};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::config::MemoryConfig;
use crate::context::{AssembledContext, ContextBuilder};
use crate::error::{MemoryError, Result};
use crate::ledger::{Ledger, LedgerState, ReconcileReport};
use crate::long_term::LongTermMemory;
use crate::reducer::{self, ReductionOutcome};
use crate::stores::{SummaryStore, TurnStore};

/// Model-facing services injected into the engine.
#[derive(Clone)]
pub struct MemoryAdapters {
    pub token_counter: Arc<dyn TokenCounter>,
    pub embedder: Arc<dyn EmbeddingService>,
    pub summarizer: Arc<dyn Summarizer>,
}

/// Document counts of both stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreCounts {
    pub turns: usize,
    pub summaries: usize,
}

/// State shared with background reductions.
pub(crate) struct MemoryState {
    pub(crate) config: MemoryConfig,
    pub(crate) prompt: SystemPrompt,
    pub(crate) turns: TurnStore,
    pub(crate) summaries: SummaryStore,
    pub(crate) ledger: RwLock<Ledger>,
    pub(crate) long_term: RwLock<LongTermMemory>,
    pub(crate) token_counter: Arc<dyn TokenCounter>,
    pub(crate) summarizer: Arc<dyn Summarizer>,
}

/// One conversation's persistent memory. Single writer: mutating calls take `&mut self`.
pub struct ConversationMemory {
    state: Arc<MemoryState>,
    draft: Option<Entry>,
    pending_reduction: Option<JoinHandle<Result<ReductionOutcome>>>,
    reconcile_report: ReconcileReport,
}

impl ConversationMemory {
    /// Opens the memory under `config.data_dir`, reconciling the ledger with the stores.
    ///
    /// # Errors
    ///
    /// [`MemoryError::Config`] for invalid settings and [`MemoryError::StoreInconsistency`]
    /// when the stores cannot be reconciled with the ledger.
    #[instrument(skip_all, fields(data_dir = %config.data_dir.display()))]
    pub async fn open(
        config: MemoryConfig,
        turn_store: Arc<dyn DocumentStore>,
        summary_store: Arc<dyn DocumentStore>,
        adapters: MemoryAdapters,
    ) -> Result<Self> {
        config.validate()?;
        tokio::fs::create_dir_all(&config.data_dir).await?;

        let turns = TurnStore::new(turn_store, adapters.embedder.clone());
        let summaries = SummaryStore::new(summary_store, adapters.embedder);
        let (ledger, reconcile_report) =
            Ledger::open(config.ledger_path(), &turns, &summaries).await?;
        let long_term = LongTermMemory::load(config.long_term_memory_path()).await?;

        if !reconcile_report.is_clean() {
            warn!(report = ?reconcile_report, "Memory repaired on open");
        }
        info!(
            next_turn_id = ledger.state().next_turn_id,
            next_summary_id = ledger.state().next_summary_id,
            pending = ledger.state().pending_pair.is_some(),
            "Conversation memory opened"
        );

        Ok(Self {
            state: Arc::new(MemoryState {
                prompt: config.system_prompt(),
                config,
                turns,
                summaries,
                ledger: RwLock::new(ledger),
                long_term: RwLock::new(long_term),
                token_counter: adapters.token_counter,
                summarizer: adapters.summarizer,
            }),
            draft: None,
            pending_reduction: None,
            reconcile_report,
        })
    }

    /// Stages a user query. It is persisted only once its response arrives.
    pub fn add_user_query(&mut self, text: &str) -> Result<()> {
        self.add_query_with_role(text, MemoryRole::User)
    }

    /// Stages a query with an explicit role: `User`, or `System` for injected notes.
    ///
    /// # Errors
    ///
    /// [`MemoryError::OutOfSequence`] if a staged query still awaits its response.
    pub fn add_query_with_role(&mut self, text: &str, role: MemoryRole) -> Result<()> {
        if role == MemoryRole::Assistant {
            return Err(MemoryError::Config(
                "queries take the user or system role".into(),
            ));
        }
        if self.draft.is_some() {
            return Err(MemoryError::OutOfSequence);
        }
        self.draft = Some(self.stamp_entry(role, text, None));
        debug!(?role, "Query staged");
        Ok(())
    }

    /// Drops the staged query, if any. Returns true if one was dropped.
    pub fn discard_user_query(&mut self) -> bool {
        self.draft.take().is_some()
    }

    pub fn pending_query(&self) -> Option<&Entry> {
        self.draft.as_ref()
    }

    /// Commits the staged query and this response as one turn pair.
    ///
    /// # Errors
    ///
    /// [`MemoryError::NoPendingQuery`] without a staged query. On a store or embedding
    /// failure the draft is kept so the call can be retried. Once the pair is written the
    /// draft is consumed, even if saving the pending marker then fails.
    #[instrument(skip(self, text))]
    pub async fn add_assistant_response(
        &mut self,
        text: &str,
        model: Option<&str>,
    ) -> Result<TurnPair> {
        let Some(draft) = self.draft.clone() else {
            return Err(MemoryError::NoPendingQuery);
        };
        self.drain_reduction().await;

        let response = self.stamp_entry(MemoryRole::Assistant, text, model);
        let mut ledger = self.state.ledger.write().await;
        let user_id = ledger.create_turn_id().await?;
        let assistant_id = ledger.create_turn_id().await?;
        let pair = TurnPair {
            user: Entry {
                id: user_id,
                pair_id: assistant_id,
                ..draft
            },
            assistant: Entry {
                id: assistant_id,
                pair_id: user_id,
                ..response
            },
        };

        if let Err(e) = self.state.turns.put_pair(&pair).await {
            ledger.release_turn_ids(user_id).await?;
            return Err(e);
        }
        // The pair is committed; a failed marker save is repaired by reconciliation.
        self.draft = None;
        if ledger.state().pending_pair.is_none() {
            ledger.set_pending_pair(Some(pair.clone())).await?;
        }
        drop(ledger);

        info!(user_id, assistant_id, "Turn pair committed");
        Ok(pair)
    }

    /// Assembles context for `query` with the configured defaults.
    ///
    /// `max_tokens` defaults to `context_ratio * engine_max_tokens`.
    pub async fn gather_context(
        &self,
        query: &str,
        min_recent_pairs: usize,
        max_tokens: Option<usize>,
    ) -> Result<AssembledContext> {
        let mut builder = self
            .context_builder()
            .await
            .with_query(query)
            .with_min_recent_pairs(min_recent_pairs);
        if let Some(max_tokens) = max_tokens {
            builder = builder.with_token_limit(max_tokens);
        }
        builder.build().await
    }

    /// A builder over the current stores, with a freshly rendered system message and the
    /// configured defaults.
    pub async fn context_builder(&self) -> ContextBuilder {
        let ledger = self.ledger_snapshot().await;
        ContextBuilder::new(
            self.state.turns.clone(),
            self.state.summaries.clone(),
            self.state.token_counter.clone(),
            &ledger,
        )
        .with_config(&self.state.config)
        .with_system_message(self.system_message().await)
    }

    /// Renders the system message for the current time and long-term memory.
    pub async fn system_message(&self) -> ChatMessage {
        let long_term = self.state.long_term.read().await;
        self.state.prompt.render(&Local::now(), long_term.text())
    }

    /// Runs a reduction now, after any in-flight one finishes.
    pub async fn reduce_context(&mut self) -> Result<ReductionOutcome> {
        self.drain_reduction().await;
        reducer::reduce(&self.state).await
    }

    /// Starts a reduction on a background task, after any in-flight one finishes.
    pub async fn spawn_reduction(&mut self) {
        self.drain_reduction().await;
        let state = self.state.clone();
        self.pending_reduction = Some(tokio::spawn(async move { reducer::reduce(&state).await }));
    }

    /// Waits for the background reduction, if one was spawned.
    pub async fn await_pending_reduction(&mut self) -> Result<Option<ReductionOutcome>> {
        match self.pending_reduction.take() {
            Some(handle) => Ok(Some(handle.await??)),
            None => Ok(None),
        }
    }

    pub fn has_pending_reduction(&self) -> bool {
        self.pending_reduction
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// The last `n` committed pairs, oldest first.
    pub async fn recent_pairs(&self, n: usize) -> Result<Vec<TurnPair>> {
        let next_turn_id = self.state.ledger.read().await.state().next_turn_id;
        self.state.turns.recent_pairs(next_turn_id, n).await
    }

    pub async fn long_term_memory(&self) -> String {
        self.state.long_term.read().await.text().to_string()
    }

    pub async fn ledger_snapshot(&self) -> LedgerState {
        self.state.ledger.read().await.state().clone()
    }

    pub async fn store_counts(&self) -> Result<StoreCounts> {
        Ok(StoreCounts {
            turns: self.state.turns.count().await?,
            summaries: self.state.summaries.count().await?,
        })
    }

    /// What reconciliation repaired when this memory was opened.
    pub fn reconcile_report(&self) -> &ReconcileReport {
        &self.reconcile_report
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.state.config
    }

    /// Erases all history: both stores, the ledger, long-term memory and any staged query.
    pub async fn wipe(&mut self) -> Result<()> {
        self.drain_reduction().await;
        let mut ledger = self.state.ledger.write().await;
        self.state.turns.clear().await?;
        self.state.summaries.clear().await?;
        ledger.reset().await?;
        self.state.long_term.write().await.clear().await?;
        self.draft = None;
        warn!("Conversation memory wiped");
        Ok(())
    }

    /// Awaits the in-flight reduction; its failure is logged, the pair stays pending.
    async fn drain_reduction(&mut self) {
        if let Err(e) = self.await_pending_reduction().await {
            warn!(error = %e, "Background reduction failed; will retry on the next reduction");
        }
    }

    fn stamp_entry(&self, role: MemoryRole, text: &str, model: Option<&str>) -> Entry {
        let now = Local::now();
        let content = format!("{}{}", timestamp_prefix(&now), text);
        Entry {
            id: 0,
            role,
            num_tokens: self.state.token_counter.count_tokens(&content),
            content,
            pair_id: 0,
            utc_time: now.with_timezone(&Utc),
            model: model.map(str::to_string),
        }
    }
}
