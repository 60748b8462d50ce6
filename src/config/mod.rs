use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, path::PathBuf};
use tracing::debug;

use crate::llm::{CallPolicy, ProviderConfig};
use crate::llm::openai::DEFAULT_BASE_URL;
use crate::session::CompactionPolicy;

/// Alias accepted by `--model` that fans out to every catalog entry
pub const ALL_MODELS: &str = "all";

const DEFAULT_SUMMARY_MODEL: &str = "deepseek/deepseek-chat-v3.1:free";
const DATABASE_FILE: &str = "colloquy.db";

/// A model reachable through the configured endpoint
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelEntry {
    /// Short name used on the command line
    pub alias: String,
    /// Model id sent to the endpoint
    pub model: String,
}

impl ModelEntry {
    pub fn new(alias: &str, model: &str) -> Self {
        Self {
            alias: alias.to_string(),
            model: model.to_string(),
        }
    }
}

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Data directory holding the conversation database
    pub data_dir: PathBuf,

    /// API key
    pub api_key: Option<String>,

    /// Base URL of the OpenAI-compatible endpoint
    pub base_url: Option<String>,

    /// Extra headers for API requests
    pub extra_headers: HashMap<String, String>,

    /// Models in comparison order
    pub models: Vec<ModelEntry>,

    /// Model used to write conversation summaries
    pub summary_model: String,

    pub reply_policy: CallPolicy,

    pub summary_policy: CallPolicy,

    pub compaction: CompactionPolicy,

    /// Request timeout in seconds
    pub timeout_seconds: u64,

    /// Retries for transient request failures
    pub max_retries: u32,
}

impl Default for Config {
    fn default() -> Self {
        let mut extra_headers = HashMap::new();
        extra_headers.insert("HTTP-Referer".to_string(), "http://localhost:8080".to_string());
        extra_headers.insert("X-Title".to_string(), "Colloquy".to_string());

        Self {
            data_dir: dirs::data_dir()
                .map(|dir| dir.join("colloquy"))
                .unwrap_or_else(|| PathBuf::from("./data")),
            api_key: None,
            base_url: None,
            extra_headers,
            models: default_models(),
            summary_model: DEFAULT_SUMMARY_MODEL.to_string(),
            reply_policy: CallPolicy::REPLY,
            summary_policy: CallPolicy::SUMMARY,
            compaction: CompactionPolicy::default(),
            timeout_seconds: 120,
            max_retries: 2,
        }
    }
}

fn default_models() -> Vec<ModelEntry> {
    vec![
        ModelEntry::new("deepseek", "deepseek/deepseek-chat-v3.1:free"),
        ModelEntry::new("grok", "x-ai/grok-4-fast:free"),
        ModelEntry::new("gemma", "google/gemma-3-27b-it:free"),
    ]
}

impl Config {
    /// Initialize configuration from various sources
    pub async fn init() -> Result<Self> {
        debug!("Initializing configuration");

        let mut config = Self::default();

        // Load from environment variables
        config.load_from_env();

        // Try to load from configuration files
        if let Some(file_config) = Self::load_from_file().await? {
            config.merge_with(file_config);
        }

        Ok(config)
    }

    /// Load configuration from environment variables
    pub fn load_from_env(&mut self) {
        self.apply_env(|key| std::env::var(key).ok());
    }

    fn apply_env<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        // Most specific key wins
        for key in ["OPENAI_API_KEY", "OPENROUTER_API_KEY", "COLLOQUY_API_KEY"] {
            if let Some(value) = var(key).filter(|v| !v.trim().is_empty()) {
                self.api_key = Some(value);
            }
        }

        if let Some(base_url) = var("COLLOQUY_BASE_URL") {
            self.base_url = Some(base_url);
        }

        if let Some(data_dir) = var("COLLOQUY_DATA_DIR") {
            self.data_dir = PathBuf::from(data_dir);
        }

        if let Some(model) = var("COLLOQUY_SUMMARY_MODEL") {
            self.summary_model = model;
        }

        if let Some(fold) = var("COLLOQUY_FOLD_SUMMARIES") {
            self.compaction.fold_previous_summary = matches!(fold.to_lowercase().as_str(), "1" | "true" | "yes");
        }
    }

    /// Load the first colloquy.json found, if any
    pub async fn load_from_file() -> Result<Option<Self>> {
        // 1. ./.colloquy.json
        // 2. ./colloquy.json
        // 3. $CONFIG_DIR/colloquy/colloquy.json
        let mut config_paths = vec![
            PathBuf::from("./.colloquy.json"),
            PathBuf::from("./colloquy.json"),
        ];

        if let Some(config_dir) = dirs::config_dir() {
            config_paths.push(config_dir.join("colloquy").join("colloquy.json"));
        }

        for path in config_paths {
            if path.exists() {
                debug!("Loading configuration from: {}", path.display());
                let content = tokio::fs::read_to_string(&path).await?;
                let config: Self = serde_json::from_str(&content)
                    .map_err(|e| anyhow!("Invalid configuration in {}: {}", path.display(), e))?;
                return Ok(Some(config));
            }
        }

        Ok(None)
    }

    /// Merge a file configuration into this one
    ///
    /// Fields left at their defaults in `other` do not override.
    pub fn merge_with(&mut self, other: Self) {
        let defaults = Self::default();

        if other.api_key.is_some() {
            self.api_key = other.api_key;
        }
        if other.base_url.is_some() {
            self.base_url = other.base_url;
        }
        if other.data_dir != defaults.data_dir {
            self.data_dir = other.data_dir;
        }
        self.extra_headers.extend(other.extra_headers);
        if other.models != defaults.models && !other.models.is_empty() {
            self.models = other.models;
        }
        if other.summary_model != defaults.summary_model {
            self.summary_model = other.summary_model;
        }
        if other.reply_policy != defaults.reply_policy {
            self.reply_policy = other.reply_policy;
        }
        if other.summary_policy != defaults.summary_policy {
            self.summary_policy = other.summary_policy;
        }
        if other.compaction != defaults.compaction {
            self.compaction = other.compaction;
        }
        if other.timeout_seconds != defaults.timeout_seconds {
            self.timeout_seconds = other.timeout_seconds;
        }
        if other.max_retries != defaults.max_retries {
            self.max_retries = other.max_retries;
        }
    }

    /// Check if the configuration has a valid API key
    pub fn has_api_key(&self) -> bool {
        self.api_key.as_deref().map_or(false, |key| !key.trim().is_empty())
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE)
    }

    pub fn aliases(&self) -> Vec<&str> {
        self.models.iter().map(|m| m.alias.as_str()).collect()
    }

    /// Look up a catalog entry by alias
    pub fn model_for(&self, alias: &str) -> Result<&ModelEntry> {
        let alias = alias.trim().to_lowercase();
        self.models.iter().find(|m| m.alias == alias).ok_or_else(|| {
            anyhow!(
                "Unsupported model: {}. Available: {}, {}",
                alias,
                self.aliases().join(", "),
                ALL_MODELS
            )
        })
    }

    /// Provider settings for the configured endpoint
    pub fn provider_config(&self) -> ProviderConfig {
        ProviderConfig {
            provider_type: "openai".to_string(),
            api_key: self.api_key.clone(),
            base_url: Some(self.base_url.clone().unwrap_or_else(|| DEFAULT_BASE_URL.to_string())),
            model: self.summary_model.clone(),
            timeout_seconds: self.timeout_seconds,
            max_retries: self.max_retries,
            extra_headers: self.extra_headers.clone(),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if !self.has_api_key() {
            return Err(anyhow!(
                "No API key configured. Set COLLOQUY_API_KEY, OPENROUTER_API_KEY, or OPENAI_API_KEY environment variable."
            ));
        }

        if self.models.is_empty() {
            return Err(anyhow!("At least one model must be configured"));
        }

        for entry in &self.models {
            if entry.alias.trim().is_empty() || entry.model.trim().is_empty() {
                return Err(anyhow!("Model entries need both an alias and a model id"));
            }
            if entry.alias == ALL_MODELS {
                return Err(anyhow!("'{}' is reserved and cannot be a model alias", ALL_MODELS));
            }
        }

        if self.summary_model.trim().is_empty() {
            return Err(anyhow!("summary_model is required"));
        }

        for (name, policy) in [("reply_policy", &self.reply_policy), ("summary_policy", &self.summary_policy)] {
            if policy.max_tokens == 0 {
                return Err(anyhow!("{}.max_tokens must be greater than 0", name));
            }
            if !(0.0..=2.0).contains(&policy.temperature) {
                return Err(anyhow!("{}.temperature must be between 0.0 and 2.0", name));
            }
        }

        if self.compaction.keep_recent > self.compaction.threshold {
            return Err(anyhow!("compaction.keep_recent must not exceed compaction.threshold"));
        }

        if self.timeout_seconds == 0 {
            return Err(anyhow!("timeout_seconds must be greater than 0"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_key() -> Config {
        Config {
            api_key: Some("sk-test".to_string()),
            ..Config::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.aliases(), vec!["deepseek", "grok", "gemma"]);
        assert_eq!(config.reply_policy, CallPolicy::REPLY);
        assert_eq!(config.summary_policy, CallPolicy::SUMMARY);
        assert_eq!(config.compaction.threshold, 5);
        assert_eq!(config.extra_headers.get("HTTP-Referer").map(String::as_str), Some("http://localhost:8080"));
        assert!(config.database_path().ends_with("colloquy.db"));
    }

    #[test]
    fn test_validate_requires_key() {
        assert!(Config::default().validate().is_err());
        assert!(with_key().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_ranges() {
        let mut config = with_key();
        config.reply_policy.temperature = 3.0;
        assert!(config.validate().is_err());

        let mut config = with_key();
        config.compaction.keep_recent = 10;
        assert!(config.validate().is_err());

        let mut config = with_key();
        config.models.push(ModelEntry::new("all", "x/y"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_model_lookup() {
        let config = Config::default();
        assert_eq!(config.model_for("Grok").unwrap().model, "x-ai/grok-4-fast:free");

        let err = config.model_for("llama").unwrap_err().to_string();
        assert_eq!(err, "Unsupported model: llama. Available: deepseek, grok, gemma, all");
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("OPENAI_API_KEY", "openai"),
            ("COLLOQUY_API_KEY", "colloquy"),
            ("COLLOQUY_DATA_DIR", "/tmp/colloquy-test"),
            ("COLLOQUY_FOLD_SUMMARIES", "true"),
            ("COLLOQUY_SUMMARY_MODEL", "google/gemma-3-27b-it:free"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_env(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.api_key.as_deref(), Some("colloquy"));
        assert_eq!(config.data_dir, PathBuf::from("/tmp/colloquy-test"));
        assert!(config.compaction.fold_previous_summary);
        assert_eq!(config.summary_model, "google/gemma-3-27b-it:free");
    }

    #[test]
    fn test_file_config_merges_over_defaults() {
        let file: Config = serde_json::from_str(
            r#"{
                "base_url": "http://localhost:11434/v1",
                "extra_headers": {"X-Title": "Lab"},
                "compaction": {"threshold": 8}
            }"#,
        )
        .unwrap();

        let mut config = with_key();
        config.merge_with(file);

        assert_eq!(config.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.base_url.as_deref(), Some("http://localhost:11434/v1"));
        assert_eq!(config.extra_headers.get("X-Title").map(String::as_str), Some("Lab"));
        assert_eq!(config.compaction.threshold, 8);
        assert_eq!(config.compaction.keep_recent, 3);
        assert_eq!(config.models.len(), 3);
    }

    #[test]
    fn test_provider_config_defaults_base_url() {
        let provider = with_key().provider_config();
        assert_eq!(provider.base_url.as_deref(), Some(DEFAULT_BASE_URL));
        assert_eq!(provider.api_key.as_deref(), Some("sk-test"));
    }
}
