//! Integration tests for context assembly, through the builder and through the façade.

mod common;

use chrono::Utc;
use common::{exchange, BagOfWordsEmbedder, Harness, WordCounter};
use embedding::EmbeddingService;
use memory::{ContextBuilder, Entry, LedgerState, MemoryRole, SummaryEntry, SummaryStore, TurnPair, TurnStore};
use memory_core::TokenCounter;
use memory_inmemory::InMemoryDocumentStore;
use prompt::{MessageRole, EMPTY_MEMORY_TEXT};
use std::sync::Arc;

fn words(n: usize, word: &str) -> String {
    vec![word; n].join(" ")
}

fn entry(id: u64, role: MemoryRole, pair_id: u64, content: String) -> Entry {
    Entry {
        id,
        role,
        num_tokens: WordCounter.count_tokens(&content),
        content,
        pair_id,
        utc_time: Utc::now(),
        model: None,
    }
}

/// Five pairs of 25 + 25 tokens, each with a summary of `summary_tokens` tokens.
async fn five_summarized_pairs(summary_tokens: usize) -> (TurnStore, SummaryStore, LedgerState) {
    let embedder: Arc<dyn EmbeddingService> = Arc::new(BagOfWordsEmbedder);
    let turns = TurnStore::new(Arc::new(InMemoryDocumentStore::new("turns")), embedder.clone());
    let summaries = SummaryStore::new(Arc::new(InMemoryDocumentStore::new("summaries")), embedder);

    for n in 1..=5u64 {
        let (user_id, assistant_id) = (2 * n - 1, 2 * n);
        let pair = TurnPair {
            user: entry(user_id, MemoryRole::User, assistant_id, words(25, &format!("ask{n}"))),
            assistant: entry(assistant_id, MemoryRole::Assistant, user_id, words(25, &format!("say{n}"))),
        };
        turns.put_pair(&pair).await.unwrap();

        let content = words(summary_tokens, &format!("gist{n}"));
        summaries
            .put(&SummaryEntry {
                id: n,
                source_ids: (user_id, assistant_id),
                utc_time: Utc::now(),
                num_tokens: WordCounter.count_tokens(&content),
                content,
            })
            .await
            .unwrap();
    }

    let ledger = LedgerState {
        next_turn_id: 11,
        next_summary_id: 6,
        pending_pair: None,
    };
    (turns, summaries, ledger)
}

#[tokio::test]
async fn test_two_recent_pairs_then_backfill_under_180_tokens() {
    let (turns, summaries, ledger) = five_summarized_pairs(20).await;

    let context = ContextBuilder::new(turns, summaries, Arc::new(WordCounter), &ledger)
        .with_min_recent_pairs(2)
        .with_token_limit(180)
        .build()
        .await
        .unwrap();

    let turn_ids: Vec<u64> = context.metadata.turn_ids.iter().copied().collect();
    assert_eq!(turn_ids, vec![7, 8, 9, 10]);
    assert_eq!(context.metadata.tiers.recent_pairs, 2);
    // Summaries 4 and 5 cover the verbatim pairs and are skipped.
    assert_eq!(context.metadata.summary_ids, vec![1, 2, 3]);
    assert_eq!(context.metadata.total_tokens, 160);
    assert!(!context.metadata.budget_filled);

    let first_words: Vec<&str> = context
        .messages
        .iter()
        .map(|m| m.content.split_whitespace().next().unwrap())
        .collect();
    assert_eq!(first_words, vec!["gist1", "gist2", "gist3", "ask4", "say4", "ask5", "say5"]);
}

#[tokio::test]
async fn test_backfill_fills_exactly_to_limit_then_stops() {
    let (turns, summaries, ledger) = five_summarized_pairs(40).await;

    let context = ContextBuilder::new(turns, summaries, Arc::new(WordCounter), &ledger)
        .with_min_recent_pairs(2)
        .with_token_limit(180)
        .build()
        .await
        .unwrap();

    // 100 for the pairs, summaries 3 and 2 reach exactly 180, summary 1 is dropped.
    assert_eq!(context.metadata.summary_ids, vec![2, 3]);
    assert_eq!(context.metadata.total_tokens, 180);
    assert!(context.metadata.budget_filled);
}

#[tokio::test]
async fn test_limit_smaller_than_one_pair_yields_only_what_fits() {
    let (turns, summaries, ledger) = five_summarized_pairs(5).await;

    let context = ContextBuilder::new(turns, summaries, Arc::new(WordCounter), &ledger)
        .with_min_recent_pairs(2)
        .with_token_limit(30)
        .build()
        .await
        .unwrap();

    // The recency tier is full at once; backfill still adds the newest summaries that fit.
    assert!(context.metadata.turn_ids.is_empty());
    assert_eq!(context.metadata.summary_ids, vec![1, 2, 3, 4, 5]);
    assert_eq!(context.metadata.total_tokens, 25);
}

#[tokio::test]
async fn test_gathered_context_never_exceeds_limit() {
    let harness = Harness::new();
    let mut memory = harness.open().await;
    for n in 1..=6 {
        exchange(
            &mut memory,
            &format!("tell me about topic {n} {}", words(n, "please")),
            &format!("topic {n} is {}", words(2 * n, "interesting")),
        )
        .await;
        memory.reduce_context().await.unwrap();
    }

    let system_tokens = WordCounter.count_tokens(&memory.system_message().await.content);
    for limit in (system_tokens..system_tokens + 200).step_by(7) {
        let context = memory
            .gather_context("topic 3", 2, Some(limit))
            .await
            .unwrap();
        let counted = WordCounter.count_messages(&context.messages);
        assert!(counted <= limit, "limit {limit} exceeded: {counted}");
        assert_eq!(counted, context.metadata.total_tokens);
        assert_eq!(context.messages[0].role, MessageRole::System);
    }
}

#[tokio::test]
async fn test_verbatim_pair_is_not_also_summarized() {
    let harness = Harness::new();
    let mut memory = harness.open().await;
    for n in 1..=3 {
        exchange(&mut memory, &format!("q{n}"), &format!("a{n}")).await;
        memory.reduce_context().await.unwrap();
    }

    let context = memory.gather_context("", 1, Some(500)).await.unwrap();

    let turn_ids: Vec<u64> = context.metadata.turn_ids.iter().copied().collect();
    assert_eq!(turn_ids, vec![5, 6]);
    assert_eq!(context.metadata.summary_ids, vec![1, 2]);
    let system_count = context
        .messages
        .iter()
        .filter(|m| m.role == MessageRole::System)
        .count();
    assert_eq!(system_count, 3);
}

#[tokio::test]
async fn test_system_message_renders_user_and_long_term_memory() {
    let harness = Harness::new();
    let mut memory = harness.open().await;

    let fresh = memory.system_message().await;
    assert_eq!(fresh.role, MessageRole::System);
    assert!(fresh.content.contains("Ada"));
    assert!(fresh.content.contains(EMPTY_MEMORY_TEXT));

    exchange(&mut memory, "remember my cat is called Miso", "noted").await;
    memory.reduce_context().await.unwrap();

    let context = memory.gather_context("cat", 1, None).await.unwrap();
    let system = context.system_message().unwrap();
    assert!(system.content.contains("recap 2 of 1 messages"));
    assert!(!system.content.contains(EMPTY_MEMORY_TEXT));
    assert_eq!(
        context.metadata.system_tokens,
        Some(WordCounter.count_tokens(&system.content))
    );
    assert_eq!(context.metadata.token_limit, memory.config().default_max_tokens());
}

#[tokio::test]
async fn test_custom_template_is_used() {
    let harness = Harness::new();
    let config = memory::MemoryConfig {
        system_template: Some("Assist {user}. Memory: {long_term_memory}".to_string()),
        ..harness.config()
    };
    let memory = memory::ConversationMemory::open(
        config,
        common::store(&harness.turns),
        common::store(&harness.summaries),
        harness.adapters(),
    )
    .await
    .unwrap();

    let system = memory.system_message().await;

    assert_eq!(system.content, format!("Assist Ada. Memory: {EMPTY_MEMORY_TEXT}"));
}
