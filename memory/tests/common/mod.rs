//! Shared fixtures for the memory integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use embedding::EmbeddingService;
use memory::{ConversationMemory, MemoryAdapters, MemoryConfig};
use memory_core::{DocumentStore, Summarizer, TokenCounter};
use memory_inmemory::InMemoryDocumentStore;
use prompt::{summarization_request, ChatMessage};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const DIMENSIONS: usize = 256;

/// Hashed bag-of-words embedding.
pub struct BagOfWordsEmbedder;

#[async_trait]
impl EmbeddingService for BagOfWordsEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, anyhow::Error> {
        let mut vector = vec![0.0; DIMENSIONS];
        for word in text.split_whitespace() {
            let word = word.to_lowercase();
            let hash = word
                .bytes()
                .fold(0xcbf29ce484222325u64, |h, b| (h ^ b as u64).wrapping_mul(0x100000001b3));
            vector[(hash % DIMENSIONS as u64) as usize] += 1.0;
        }
        Ok(vector)
    }
}

/// Bag-of-words embedder that stalls on summary text (the scripted summarizer's "recap ...").
pub struct SlowRecapEmbedder {
    pub delay: Duration,
}

#[async_trait]
impl EmbeddingService for SlowRecapEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, anyhow::Error> {
        if text.starts_with("recap") {
            tokio::time::sleep(self.delay).await;
        }
        BagOfWordsEmbedder.embed(text).await
    }
}

/// One token per whitespace-separated word.
pub struct WordCounter;

impl TokenCounter for WordCounter {
    fn count_tokens(&self, text: &str) -> usize {
        text.split_whitespace().count()
    }
}

/// Summarizer that records every successful request and can be made to fail.
#[derive(Default)]
pub struct ScriptedSummarizer {
    fail: AtomicBool,
    fail_on: Mutex<Vec<usize>>,
    attempts: AtomicUsize,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedSummarizer {
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Fails only the `attempt`-th call (1-based, counting failed calls too).
    pub fn fail_on_attempt(&self, attempt: usize) {
        self.fail_on.lock().unwrap().push(attempt);
    }

    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Summarizer for ScriptedSummarizer {
    async fn summarize(&self, turns: &[ChatMessage]) -> Result<ChatMessage, anyhow::Error> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail.load(Ordering::SeqCst) || self.fail_on.lock().unwrap().contains(&attempt) {
            anyhow::bail!("model unavailable");
        }
        let request = summarization_request(turns);
        let call = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request);
            requests.len()
        };
        Ok(ChatMessage::system(format!(
            "recap {call} of {} messages",
            turns.len()
        )))
    }
}

/// Both stores plus the adapters, kept so a memory can be reopened over the same data.
pub struct Harness {
    pub dir: tempfile::TempDir,
    pub turns: InMemoryDocumentStore,
    pub summaries: InMemoryDocumentStore,
    pub summarizer: Arc<ScriptedSummarizer>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
            turns: InMemoryDocumentStore::new("turns"),
            summaries: InMemoryDocumentStore::new("summaries"),
            summarizer: Arc::new(ScriptedSummarizer::default()),
        }
    }

    pub fn config(&self) -> MemoryConfig {
        MemoryConfig {
            user_name: "Ada".to_string(),
            ..MemoryConfig::default()
        }
        .with_data_dir(self.dir.path())
    }

    pub fn adapters(&self) -> MemoryAdapters {
        adapters(self.summarizer.clone())
    }

    pub async fn open(&self) -> ConversationMemory {
        self.try_open().await.unwrap()
    }

    pub async fn try_open(&self) -> memory::Result<ConversationMemory> {
        self.try_open_with(self.config(), self.adapters()).await
    }

    /// Opens over the shared stores with another config or adapters.
    pub async fn try_open_with(
        &self,
        config: MemoryConfig,
        adapters: MemoryAdapters,
    ) -> memory::Result<ConversationMemory> {
        ConversationMemory::open(
            config,
            Arc::new(self.turns.clone()),
            Arc::new(self.summaries.clone()),
            adapters,
        )
        .await
    }

    /// Seeds the long-term memory document before the memory is opened.
    pub fn write_long_term_memory(&self, text: &str) {
        let json = serde_json::json!({ "longTermMemory": text });
        std::fs::write(
            self.dir.path().join("long_term_memory.json"),
            serde_json::to_vec(&json).unwrap(),
        )
        .unwrap();
    }

    pub fn data_dir(&self) -> &Path {
        self.dir.path()
    }
}

pub fn adapters(summarizer: Arc<ScriptedSummarizer>) -> MemoryAdapters {
    MemoryAdapters {
        token_counter: Arc::new(WordCounter),
        embedder: Arc::new(BagOfWordsEmbedder),
        summarizer,
    }
}

/// Commits one pair through the façade.
pub async fn exchange(memory: &mut ConversationMemory, query: &str, response: &str) -> memory::TurnPair {
    memory.add_user_query(query).unwrap();
    memory.add_assistant_response(response, Some("test-model")).await.unwrap()
}

/// Strips the timestamp prefix stamped on stored turns.
pub fn body(content: &str) -> &str {
    content.split_once(": ").map(|(_, rest)| rest).unwrap_or(content)
}

pub fn store(store: &InMemoryDocumentStore) -> Arc<dyn DocumentStore> {
    Arc::new(store.clone())
}
