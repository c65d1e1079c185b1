use std::env;
use std::fs;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Where persisted artifacts live on disk.
///
/// `data_dir` holds the versioned biography snapshots; `logs_dir` holds the
/// per-user banks, session agendas, transcripts, and evaluation CSVs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: String,
    pub logs_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "data".to_string(),
            logs_dir: "logs".to_string(),
        }
    }
}

/// Pacing and bounds for a single interview session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Minutes of user inactivity before the session times out.
    pub timeout_minutes: u64,
    /// Unprocessed-memory count that triggers an incremental biography update.
    pub memory_threshold: usize,
    /// Bound on agent consideration loops (recall, follow-up revision, re-planning).
    pub max_consideration_iterations: usize,
    /// Replay window over an agent's event stream when building prompts.
    pub max_events_len: usize,
    /// Use the non-adaptive baseline interviewer prompt.
    pub use_baseline_prompt: bool,
    /// Hard cap on user messages before the session ends. `None` = unlimited.
    pub max_turns: Option<usize>,
    /// Seconds to wait for the scribe / an in-flight update during teardown.
    pub drain_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_minutes: 10,
            memory_threshold: 10,
            max_consideration_iterations: 3,
            max_events_len: 30,
            use_baseline_prompt: false,
            max_turns: None,
            drain_timeout_secs: 300,
        }
    }
}

/// Tuning for the memory / question banks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BankConfig {
    /// Cosine similarity above which a proposed question counts as a near-duplicate.
    pub similarity_threshold: f32,
    /// Top-k results per bank search.
    pub search_k: usize,
}

impl Default for BankConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.85,
            search_k: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Base URL of an OpenAI-compatible chat completions endpoint.
    pub base_url: String,
    pub model: String,
    /// Name of the environment variable holding the API key. The key itself
    /// never lives in config files.
    pub api_key_env: String,
    pub request_timeout_secs: u64,
    /// Transport-level retries with exponential backoff starting at 1 s.
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://openrouter.ai/api/v1".to_string(),
            model: "openai/gpt-4o-mini".to_string(),
            api_key_env: "OPENROUTER_API_KEY".to_string(),
            request_timeout_secs: 120,
            max_retries: 10,
        }
    }
}

/// Top-level configuration, threaded from the session engine into every
/// agent at construction. Nothing below the CLI reads the process
/// environment directly.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub storage: StorageConfig,
    pub session: SessionConfig,
    pub bank: BankConfig,
    pub llm: LlmConfig,
}

impl AppConfig {
    /// Load from an optional TOML file, then apply environment overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Ok(raw) = fs::read_to_string(path) {
            config = toml::from_str(&raw)?;
        }
        config.apply_env();
        Ok(config)
    }

    /// Environment-only construction (the CLI default).
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }

    /// Apply the documented environment overrides. Unparseable values are
    /// ignored in favor of the current setting.
    pub fn apply_env(&mut self) {
        if let Ok(value) = env::var("DATA_DIR") {
            if !value.is_empty() {
                self.storage.data_dir = value;
            }
        }
        if let Ok(value) = env::var("LOGS_DIR") {
            if !value.is_empty() {
                self.storage.logs_dir = value;
            }
        }
        if let Some(value) = parse_env::<u64>("SESSION_TIMEOUT_MINUTES") {
            self.session.timeout_minutes = value;
        }
        if let Some(value) = parse_env::<usize>("MEMORY_THRESHOLD_FOR_UPDATE") {
            self.session.memory_threshold = value;
        }
        if let Some(value) = parse_env::<usize>("MAX_CONSIDERATION_ITERATIONS") {
            self.session.max_consideration_iterations = value;
        }
        if let Some(value) = parse_env::<usize>("MAX_EVENTS_LEN") {
            self.session.max_events_len = value;
        }
        if let Ok(value) = env::var("USE_BASELINE_PROMPT") {
            self.session.use_baseline_prompt =
                matches!(value.to_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Ok(value) = env::var("MODEL_NAME") {
            if !value.is_empty() {
                self.llm.model = value;
            }
        }
    }

    /// `{data_dir}/{user_id}`: biography snapshots.
    pub fn user_data_dir(&self, user_id: &str) -> String {
        format!("{}/{}", self.storage.data_dir, user_id)
    }

    /// `{logs_dir}/{user_id}`: banks, agendas, evaluation CSVs.
    pub fn user_logs_dir(&self, user_id: &str) -> String {
        format!("{}/{}", self.storage.logs_dir, user_id)
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|raw| raw.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = AppConfig::default();
        assert_eq!(config.session.timeout_minutes, 10);
        assert_eq!(config.session.memory_threshold, 10);
        assert_eq!(config.session.max_consideration_iterations, 3);
        assert_eq!(config.session.max_events_len, 30);
        assert!(!config.session.use_baseline_prompt);
        assert_eq!(config.session.drain_timeout_secs, 300);
        assert_eq!(config.bank.similarity_threshold, 0.85);
        assert_eq!(config.storage.data_dir, "data");
        assert_eq!(config.storage.logs_dir, "logs");
    }

    #[test]
    fn toml_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memoir.toml");

        let mut config = AppConfig::default();
        config.session.memory_threshold = 4;
        config.bank.similarity_threshold = 0.9;
        config.save_to(&path).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let loaded: AppConfig = toml::from_str(&raw).unwrap();
        assert_eq!(loaded.session.memory_threshold, 4);
        assert_eq!(loaded.bank.similarity_threshold, 0.9);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let loaded: AppConfig = toml::from_str("[session]\nmemory_threshold = 2\n").unwrap();
        assert_eq!(loaded.session.memory_threshold, 2);
        // Untouched sections keep their defaults.
        assert_eq!(loaded.session.timeout_minutes, 10);
        assert_eq!(loaded.storage.data_dir, "data");
    }

    #[test]
    fn user_dirs_join_user_id() {
        let config = AppConfig::default();
        assert_eq!(config.user_data_dir("alice"), "data/alice");
        assert_eq!(config.user_logs_dir("alice"), "logs/alice");
    }
}
