//! The rolling long-term memory string, persisted as `{"longTermMemory": "..."}`.
//!
//! Only the reducer replaces it, always as a whole.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::persist::{load_json, save_json_atomic};

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LongTermMemoryDocument {
    long_term_memory: String,
}

#[derive(Debug)]
pub struct LongTermMemory {
    path: PathBuf,
    text: String,
}

impl LongTermMemory {
    /// Loads the document at `path`; a missing file means no memory yet.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let document: LongTermMemoryDocument = load_json(&path).await?.unwrap_or_default();
        Ok(Self {
            path,
            text: document.long_term_memory,
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }

    /// Persists `text` atomically, then adopts it.
    pub async fn replace(&mut self, text: String) -> Result<()> {
        let document = LongTermMemoryDocument {
            long_term_memory: text,
        };
        save_json_atomic(&self.path, &document).await?;
        self.text = document.long_term_memory;
        Ok(())
    }

    pub async fn clear(&mut self) -> Result<()> {
        self.replace(String::new()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_file_is_empty_memory() {
        let dir = tempfile::tempdir().unwrap();
        let memory = LongTermMemory::load(dir.path().join("ltm.json")).await.unwrap();
        assert!(memory.is_empty());
        assert_eq!(memory.text(), "");
    }

    #[tokio::test]
    async fn test_replace_persists_whole_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ltm.json");

        let mut memory = LongTermMemory::load(&path).await.unwrap();
        memory.replace("Likes tea.".to_string()).await.unwrap();

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(raw, serde_json::json!({ "longTermMemory": "Likes tea." }));

        let reloaded = LongTermMemory::load(&path).await.unwrap();
        assert_eq!(reloaded.text(), "Likes tea.");

        memory.clear().await.unwrap();
        assert!(LongTermMemory::load(&path).await.unwrap().is_empty());
    }
}
