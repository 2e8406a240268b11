//! Memory engine configuration, loaded from `MEMORY_*` environment variables.

use prompt::SystemPrompt;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};

use crate::error::{MemoryError, Result};

const LEDGER_FILE: &str = "ledger.json";
const LONG_TERM_MEMORY_FILE: &str = "long_term_memory.json";
const SQLITE_FILE: &str = "memory.db";

/// Tunables for context assembly and reduction, plus where state is persisted.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct MemoryConfig {
    /// Directory holding the ledger, the long-term memory file and the SQLite database.
    pub data_dir: PathBuf,
    /// Substituted for `{user}` in the system message.
    pub user_name: String,
    /// Hard context limit of the model the assembled context is sent to.
    pub engine_max_tokens: usize,
    /// Fraction of `engine_max_tokens` used as the default context budget.
    pub context_ratio: f32,
    pub min_recent_pairs: usize,
    pub query_size: usize,
    pub query_max_size: usize,
    /// Similarity hits farther than this cosine distance are ignored.
    pub distance_cutoff: Option<f32>,
    /// Token budget for the long-term memory text and the summaries folded into it.
    pub summary_budget: usize,
    pub system_template: Option<String>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/memory"),
            user_name: "User".to_string(),
            engine_max_tokens: 4096,
            context_ratio: 0.85,
            min_recent_pairs: 1,
            query_size: 10,
            query_max_size: 50,
            distance_cutoff: None,
            summary_budget: 1000,
            system_template: None,
        }
    }
}

impl MemoryConfig {
    /// Load from environment variables. Unset or unparsable values fall back to defaults.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            data_dir: env::var("MEMORY_DATA_DIR")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            user_name: env::var("MEMORY_USER_NAME")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(defaults.user_name),
            engine_max_tokens: parse_var("MEMORY_ENGINE_MAX_TOKENS")
                .unwrap_or(defaults.engine_max_tokens),
            context_ratio: parse_var("MEMORY_CONTEXT_RATIO").unwrap_or(defaults.context_ratio),
            min_recent_pairs: parse_var("MEMORY_MIN_RECENT_PAIRS")
                .unwrap_or(defaults.min_recent_pairs),
            query_size: parse_var("MEMORY_QUERY_SIZE").unwrap_or(defaults.query_size),
            query_max_size: parse_var("MEMORY_QUERY_MAX_SIZE").unwrap_or(defaults.query_max_size),
            distance_cutoff: parse_var("MEMORY_DISTANCE_CUTOFF"),
            summary_budget: parse_var("MEMORY_SUMMARY_BUDGET").unwrap_or(defaults.summary_budget),
            system_template: env::var("MEMORY_SYSTEM_TEMPLATE")
                .ok()
                .filter(|s| !s.trim().is_empty()),
        };
        config.validate()?;
        Ok(config)
    }

    /// Rejects budgets and ratios that would make every context empty.
    pub fn validate(&self) -> Result<()> {
        if !(self.context_ratio > 0.0 && self.context_ratio <= 1.0) {
            return Err(MemoryError::Config(format!(
                "context_ratio must be in (0, 1], got {}",
                self.context_ratio
            )));
        }
        if self.engine_max_tokens == 0 {
            return Err(MemoryError::Config("engine_max_tokens must be > 0".into()));
        }
        if self.summary_budget == 0 {
            return Err(MemoryError::Config("summary_budget must be > 0".into()));
        }
        if self.query_max_size == 0 {
            return Err(MemoryError::Config("query_max_size must be > 0".into()));
        }
        if let Some(cutoff) = self.distance_cutoff {
            if !(0.0..=2.0).contains(&cutoff) {
                return Err(MemoryError::Config(format!(
                    "distance_cutoff must be a cosine distance in [0, 2], got {cutoff}"
                )));
            }
        }
        Ok(())
    }

    /// Default context budget: `floor(context_ratio * engine_max_tokens)`.
    pub fn default_max_tokens(&self) -> usize {
        (self.engine_max_tokens as f64 * self.context_ratio as f64).floor() as usize
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir.join(LEDGER_FILE)
    }

    pub fn long_term_memory_path(&self) -> PathBuf {
        self.data_dir.join(LONG_TERM_MEMORY_FILE)
    }

    pub fn sqlite_path(&self) -> PathBuf {
        self.data_dir.join(SQLITE_FILE)
    }

    pub fn system_prompt(&self) -> SystemPrompt {
        match &self.system_template {
            Some(template) => SystemPrompt::new(template.clone(), self.user_name.clone()),
            None => SystemPrompt::with_default_template(self.user_name.clone()),
        }
    }

    /// Same configuration rooted at another directory.
    pub fn with_data_dir(mut self, data_dir: impl AsRef<Path>) -> Self {
        self.data_dir = data_dir.as_ref().to_path_buf();
        self
    }
}

fn parse_var<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.trim().parse().ok())
}
