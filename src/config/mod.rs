//! Configuration loading and management.
//!
//! Loads turnkeeper configuration from `./config.toml` (or
//! `$TURNKEEPER_CONFIG_PATH`). Environment variables override file values;
//! file values override defaults. Precedence: env vars > config file >
//! defaults; a missing file is not an error.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Top-level turnkeeper configuration loaded from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub memory: MemoryConfig,
    pub thresholds: ThresholdsConfig,
    pub planner: PlannerConfig,
    pub llm: LlmConfig,
    pub checkpoint: CheckpointConfig,
    pub languages: LanguagesConfig,
}

impl Config {
    /// Load configuration with precedence: env vars > TOML file > defaults.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from_file()?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn load_from_file() -> Result<Self> {
        let path = Self::config_path()?;
        match std::fs::read_to_string(&path) {
            Ok(contents) => {
                tracing::info!(path = %path.display(), "loading config from file");
                let config: Config =
                    toml::from_str(&contents).context("failed to parse config TOML")?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("no config file found, using defaults");
                Ok(Config::default())
            }
            Err(e) => Err(anyhow::anyhow!("failed to read config file: {e}")),
        }
    }

    fn config_path() -> Result<PathBuf> {
        Self::config_path_with(|key| std::env::var(key).ok())
    }

    fn config_path_with(env: impl Fn(&str) -> Option<String>) -> Result<PathBuf> {
        if let Some(p) = env("TURNKEEPER_CONFIG_PATH") {
            return Ok(PathBuf::from(p));
        }
        Ok(PathBuf::from("config.toml"))
    }

    /// Apply environment overrides. Takes a resolver function for
    /// testability rather than calling `std::env::set_var` in tests.
    fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("TURNKEEPER_FUZZY_MATCH_MIN") {
            apply_parsed(&v, "TURNKEEPER_FUZZY_MATCH_MIN", &mut self.thresholds.fuzzy_match_min);
        }
        if let Some(v) = env("TURNKEEPER_DISAMBIGUATION_GAP") {
            apply_parsed(
                &v,
                "TURNKEEPER_DISAMBIGUATION_GAP",
                &mut self.thresholds.disambiguation_gap,
            );
        }
        if let Some(v) = env("TURNKEEPER_CALENDAR_DELETE_THRESHOLD") {
            apply_parsed(
                &v,
                "TURNKEEPER_CALENDAR_DELETE_THRESHOLD",
                &mut self.thresholds.calendar_delete_threshold,
            );
        }
        if let Some(v) = env("TURNKEEPER_CONFIDENCE_THRESHOLD") {
            apply_parsed(
                &v,
                "TURNKEEPER_CONFIDENCE_THRESHOLD",
                &mut self.thresholds.confidence_threshold,
            );
        }

        if let Some(v) = env("TURNKEEPER_OLLAMA_URL") {
            self.llm.local.base_url = v;
        }
        if let Some(v) = env("TURNKEEPER_LOCAL_MODEL") {
            self.llm.local.model = v;
        }
        if let Some(key) = env("TURNKEEPER_CLOUD_API_KEY") {
            let model = env("TURNKEEPER_CLOUD_MODEL").unwrap_or_else(|| {
                self.llm
                    .cloud
                    .as_ref()
                    .map(|c| c.model.clone())
                    .unwrap_or_else(default_cloud_model)
            });
            let base_url = env("TURNKEEPER_CLOUD_BASE_URL").unwrap_or_else(|| {
                self.llm
                    .cloud
                    .as_ref()
                    .map(|c| c.base_url.clone())
                    .unwrap_or_else(default_cloud_base_url)
            });
            self.llm.cloud = Some(LlmCloudConfig {
                base_url,
                api_key: key,
                model,
            });
        }
    }

    /// Parse a TOML string into config (for testing).
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: Config = toml::from_str(toml_str).context("failed to parse config TOML")?;
        Ok(config)
    }
}

fn apply_parsed(raw: &str, var: &'static str, slot: &mut f64) {
    match raw.parse() {
        Ok(n) => *slot = n,
        Err(_) => tracing::warn!(var, value = %raw, "ignoring invalid env override"),
    }
}

/// `[memory]` — ConversationMemory bounds (spec §6).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub max_context_msgs: usize,
    pub max_total_tokens: u32,
    pub max_system_msgs: usize,
    pub chars_per_token: f64,
    pub conversation_ttl_secs: u64,
    pub disambiguation_ttl_secs: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_context_msgs: 10,
            max_total_tokens: 500,
            max_system_msgs: 3,
            chars_per_token: 3.5,
            conversation_ttl_secs: 12 * 3600,
            disambiguation_ttl_secs: 5 * 60,
        }
    }
}

/// `[thresholds]` — scoring cutoffs shared across resolvers and HITL.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ThresholdsConfig {
    pub fuzzy_match_min: f64,
    pub disambiguation_gap: f64,
    pub calendar_delete_threshold: f64,
    pub confidence_threshold: f64,
}

impl Default for ThresholdsConfig {
    fn default() -> Self {
        Self {
            fuzzy_match_min: 0.3,
            disambiguation_gap: 0.2,
            calendar_delete_threshold: 0.4,
            confidence_threshold: 0.7,
        }
    }
}

/// `[planner]` — Planner LLM call parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            model: "llama3".to_string(),
            temperature: 0.3,
            max_tokens: 2500,
        }
    }
}

/// `[llm]` — gateway provider configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub local: LlmLocalConfig,
    pub cloud: Option<LlmCloudConfig>,
}

/// Local (e.g. Ollama / LM Studio) provider config.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmLocalConfig {
    pub base_url: String,
    #[serde(alias = "default_model")]
    pub model: String,
}

impl Default for LlmLocalConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "llama3".to_string(),
        }
    }
}

fn default_cloud_base_url() -> String {
    "https://api.openai.com".to_string()
}

fn default_cloud_model() -> String {
    "gpt-4o".to_string()
}

/// Cloud provider config (OpenAI-chat-completions-compatible).
#[derive(Clone, Deserialize)]
pub struct LlmCloudConfig {
    #[serde(default = "default_cloud_base_url")]
    pub base_url: String,
    pub api_key: String,
    #[serde(default = "default_cloud_model", alias = "default_model")]
    pub model: String,
}

impl std::fmt::Debug for LlmCloudConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmCloudConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"__REDACTED__")
            .field("model", &self.model)
            .finish()
    }
}

/// `[checkpoint]` — checkpoint store LRU/TTL policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    pub ttl_secs: u64,
    pub max_entries: usize,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 30 * 60,
            max_entries: 10_000,
        }
    }
}

/// `[languages]` — supported language tags and fallback.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LanguagesConfig {
    pub supported: Vec<String>,
    pub fallback: String,
}

impl Default for LanguagesConfig {
    fn default() -> Self {
        Self {
            supported: vec!["he".to_string(), "en".to_string()],
            fallback: "en".to_string(),
        }
    }
}
