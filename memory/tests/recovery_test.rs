//! Crash-recovery tests: the ledger and stores are left the way an interrupted run leaves
//! them, then the memory is reopened.

mod common;

use chrono::Utc;
use common::{adapters, body, exchange, BagOfWordsEmbedder, Harness, ScriptedSummarizer};
use memory::{ConversationMemory, Entry, LedgerState, MemoryError, MemoryRole, SummaryEntry, SummaryStore, TurnPair, TurnStore};
use memory_core::DocumentStore;
use memory_sqlite::SQLiteDocumentStore;
use std::path::Path;
use std::sync::Arc;

fn entry(id: u64, role: MemoryRole, pair_id: u64, content: &str) -> Entry {
    Entry {
        id,
        role,
        content: content.to_string(),
        pair_id,
        utc_time: Utc::now(),
        num_tokens: content.split_whitespace().count(),
        model: None,
    }
}

fn pair(n: u64) -> TurnPair {
    let (user_id, assistant_id) = (2 * n - 1, 2 * n);
    TurnPair {
        user: entry(user_id, MemoryRole::User, assistant_id, &format!("question {n}")),
        assistant: entry(assistant_id, MemoryRole::Assistant, user_id, &format!("answer {n}")),
    }
}

fn write_ledger(dir: &Path, state: &LedgerState) {
    let json = serde_json::to_string_pretty(state).unwrap();
    std::fs::write(dir.join("ledger.json"), json).unwrap();
}

fn turn_store(harness: &Harness) -> TurnStore {
    TurnStore::new(common::store(&harness.turns), Arc::new(BagOfWordsEmbedder))
}

fn summary_store(harness: &Harness) -> SummaryStore {
    SummaryStore::new(common::store(&harness.summaries), Arc::new(BagOfWordsEmbedder))
}

#[tokio::test]
async fn test_unrecorded_pair_becomes_pending_on_restart() {
    let harness = Harness::new();
    {
        let mut memory = harness.open().await;
        exchange(&mut memory, "q1", "a1").await;
        memory.reduce_context().await.unwrap();
    }

    // Crash after the pair was written and the counter advanced, before the ledger update.
    turn_store(&harness).put_pair(&pair(2)).await.unwrap();
    write_ledger(
        harness.data_dir(),
        &LedgerState {
            next_turn_id: 5,
            next_summary_id: 2,
            pending_pair: None,
        },
    );

    let mut memory = harness.open().await;

    assert_eq!(memory.reconcile_report().recovered_pending_pair, Some((3, 4)));
    assert!(memory.reconcile_report().saved);
    let pending = memory.ledger_snapshot().await.pending_pair.unwrap();
    assert_eq!(pending.ids(), (3, 4));
    assert_eq!(pending.user.content, "question 2");

    let outcome = memory.reduce_context().await.unwrap();
    assert_eq!(outcome.summaries_created, vec![2]);
    assert!(memory.ledger_snapshot().await.pending_pair.is_none());
}

#[tokio::test]
async fn test_second_reconciliation_is_noop() {
    let harness = Harness::new();
    turn_store(&harness).put_pair(&pair(1)).await.unwrap();
    turn_store(&harness).put_pair(&pair(2)).await.unwrap();
    write_ledger(
        harness.data_dir(),
        &LedgerState {
            next_turn_id: 9,
            next_summary_id: 4,
            pending_pair: None,
        },
    );

    let first = harness.open().await;
    let repaired = first.ledger_snapshot().await;
    assert!(!first.reconcile_report().is_clean());
    assert_eq!(repaired.next_turn_id, 5);
    assert_eq!(repaired.next_summary_id, 1);
    drop(first);

    let ledger_before = std::fs::read_to_string(harness.data_dir().join("ledger.json")).unwrap();
    let second = harness.open().await;
    let ledger_after = std::fs::read_to_string(harness.data_dir().join("ledger.json")).unwrap();

    assert!(second.reconcile_report().is_clean());
    assert_eq!(second.ledger_snapshot().await, repaired);
    assert_eq!(ledger_before, ledger_after);
}

#[tokio::test]
async fn test_half_written_pair_is_removed() {
    let harness = Harness::new();
    turn_store(&harness).put_pair(&pair(1)).await.unwrap();
    let orphan = entry(3, MemoryRole::User, 4, "lost question");
    harness
        .turns
        .put(orphan.to_document(vec![1.0; 4]).unwrap())
        .await
        .unwrap();
    write_ledger(
        harness.data_dir(),
        &LedgerState {
            next_turn_id: 5,
            next_summary_id: 1,
            pending_pair: None,
        },
    );

    let mut memory = harness.open().await;

    assert_eq!(memory.reconcile_report().removed_turns, vec![3]);
    let ledger = memory.ledger_snapshot().await;
    assert_eq!(ledger.next_turn_id, 3);
    assert_eq!(ledger.pending_pair.map(|p| p.ids()), Some((1, 2)));
    assert_eq!(memory.store_counts().await.unwrap().turns, 2);

    let next = exchange(&mut memory, "q2", "a2").await;
    assert_eq!(next.ids(), (3, 4));
}

#[tokio::test]
async fn test_stale_pending_pair_is_cleared_after_summary_write() {
    let harness = Harness::new();
    turn_store(&harness).put_pair(&pair(1)).await.unwrap();
    summary_store(&harness)
        .put(&SummaryEntry {
            id: 1,
            source_ids: (1, 2),
            utc_time: Utc::now(),
            num_tokens: 3,
            content: "a short recap".to_string(),
        })
        .await
        .unwrap();
    // Crash after the summary write, before the pending marker moved.
    write_ledger(
        harness.data_dir(),
        &LedgerState {
            next_turn_id: 3,
            next_summary_id: 2,
            pending_pair: Some(pair(1)),
        },
    );

    let memory = harness.open().await;

    assert!(memory.ledger_snapshot().await.pending_pair.is_none());
    assert!(memory.reconcile_report().saved);
    assert!(memory.reconcile_report().removed_summaries.is_empty());
}

#[tokio::test]
async fn test_entries_beyond_ledger_fail_fast() {
    let harness = Harness::new();
    turn_store(&harness).put_pair(&pair(1)).await.unwrap();
    // Ledger lost: a fresh one would hand out IDs already in the store.
    let result = harness.try_open().await;

    assert!(matches!(result, Err(MemoryError::StoreInconsistency(_))));
}

async fn open_sqlite(dir: &Path, summarizer: Arc<ScriptedSummarizer>) -> ConversationMemory {
    let config = memory::MemoryConfig::default().with_data_dir(dir);
    std::fs::create_dir_all(dir).unwrap();
    let path = config.sqlite_path();
    let turns = SQLiteDocumentStore::new(path.to_str().unwrap(), "turns")
        .await
        .unwrap();
    let summaries = SQLiteDocumentStore::from_pool(turns.pool().clone(), "summaries")
        .await
        .unwrap();
    ConversationMemory::open(config, Arc::new(turns), Arc::new(summaries), adapters(summarizer))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_sqlite_backed_memory_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let summarizer = Arc::new(ScriptedSummarizer::default());
    {
        let mut memory = open_sqlite(dir.path(), summarizer.clone()).await;
        exchange(&mut memory, "q1", "a1").await;
        memory.reduce_context().await.unwrap();
        exchange(&mut memory, "q2", "a2").await;
    }

    let mut memory = open_sqlite(dir.path(), summarizer).await;

    assert!(memory.reconcile_report().is_clean());
    let counts = memory.store_counts().await.unwrap();
    assert_eq!((counts.turns, counts.summaries), (4, 1));
    let queries: Vec<String> = memory
        .recent_pairs(5)
        .await
        .unwrap()
        .iter()
        .map(|p| body(&p.user.content).to_string())
        .collect();
    assert_eq!(queries, vec!["q1", "q2"]);

    let outcome = memory.reduce_context().await.unwrap();
    assert_eq!(outcome.summaries_created, vec![2]);
    let context = memory.gather_context("q1", 1, None).await.unwrap();
    assert!(context.metadata.turn_ids.contains(&3));
}
