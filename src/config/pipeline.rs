//! Pipeline configuration
//!
//! One serde tree covering the store, the language model, stage timeouts and
//! the tuning knobs of each stage. Defaults match the crop_yield dataset; a
//! JSON file and environment variables can override them.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{Context, Result};

/// Top-level configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Tabular store
    pub store: StoreConfig,

    /// Language model endpoint
    pub llm: LlmConfig,

    /// Per-stage timeouts
    pub timeouts: TimeoutConfig,

    /// Entity / metric grounding
    pub resolution: ResolutionConfig,

    /// Plan compilation
    pub compiler: CompilerConfig,

    /// Plan execution
    pub executor: ExecutorConfig,

    /// Answer synthesis
    pub synthesis: SynthesisConfig,

    /// Provenance for each table (used in citations)
    pub sources: Vec<DataSourceConfig>,
}

/// Store configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Path of the SQLite database (opened read-only)
    pub database_path: PathBuf,

    /// Maximum idle connections kept in the pool
    pub pool_size: usize,

    /// Rows sampled per table for the schema snapshot
    pub sample_rows: usize,

    /// Cap on distinct values cached per entity/category column
    pub max_distinct_values: usize,
}

/// Which wire protocol the language model speaks
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    /// Ollama `/api/generate`
    Ollama,
    /// OpenAI-compatible `/chat/completions` (Groq and friends)
    ChatCompletions,
}

/// Language model configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: LlmProvider,

    /// Base URL; provider default when absent
    pub base_url: Option<String>,

    /// Model name; provider default when absent
    pub model: Option<String>,

    /// Bearer token for chat-completions providers
    #[serde(skip_serializing)]
    pub api_key: Option<String>,

    /// Max tokens to generate per call
    pub max_tokens: u32,
}

/// Stage timeouts (milliseconds)
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub intent_ms: u64,
    pub execution_ms: u64,
    pub synthesis_ms: u64,
}

/// Grounding of model-produced names against the schema
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolutionConfig {
    /// Minimum normalized similarity (0.0-1.0) for a fuzzy entity match
    pub similarity_threshold: f64,
}

/// Plan compiler options
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// Compile `compare` into one plan per entity instead of one shared plan
    pub compare_fan_out: bool,

    /// Row cap bound into lookup plans
    pub lookup_row_limit: i64,

    /// Entities kept when a compare names none and ranks all of them
    pub compare_top_n: i64,
}

/// Plan executor options
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Run independent plans of one intent concurrently
    pub concurrent_plans: bool,
}

/// Answer synthesizer options
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    /// Relative tolerance when matching generated numbers to computed ones
    pub relative_tolerance: f64,

    /// Absolute tolerance (covers rounding of small values)
    pub absolute_tolerance: f64,

    /// Rows per result included in the synthesis prompt
    pub max_prompt_rows: usize,
}

/// Where a table's data came from
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DataSourceConfig {
    pub table: String,
    pub file: String,
    pub url: String,
    pub description: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            llm: LlmConfig::default(),
            timeouts: TimeoutConfig::default(),
            resolution: ResolutionConfig::default(),
            compiler: CompilerConfig::default(),
            executor: ExecutorConfig::default(),
            synthesis: SynthesisConfig::default(),
            sources: vec![DataSourceConfig::crop_yield()],
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("data/crop_yield.db"),
            pool_size: 4,
            sample_rows: 5,
            max_distinct_values: 500,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::Ollama,
            base_url: None,
            model: None,
            api_key: None,
            max_tokens: 2048,
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            intent_ms: 30_000,
            execution_ms: 10_000,
            synthesis_ms: 60_000,
        }
    }
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.8,
        }
    }
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            compare_fan_out: false,
            lookup_row_limit: 200,
            compare_top_n: 10,
        }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            concurrent_plans: true,
        }
    }
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            relative_tolerance: 0.005,
            absolute_tolerance: 0.01,
            max_prompt_rows: 20,
        }
    }
}

impl DataSourceConfig {
    /// The crop_yield table shipped with the dataset
    pub fn crop_yield() -> Self {
        Self {
            table: "crop_yield".to_string(),
            file: "crop_yield.csv".to_string(),
            url: "N/A (uploaded from crop_yield.csv)".to_string(),
            description: "State-wise, season-wise crop production statistics from 1997-2018, including Area, Production, Annual_Rainfall, Fertilizer, Pesticide, and Yield.".to_string(),
        }
    }
}

impl TimeoutConfig {
    pub fn intent(&self) -> Duration {
        Duration::from_millis(self.intent_ms)
    }

    pub fn execution(&self) -> Duration {
        Duration::from_millis(self.execution_ms)
    }

    pub fn synthesis(&self) -> Duration {
        Duration::from_millis(self.synthesis_ms)
    }
}

impl PipelineConfig {
    /// Load from a JSON file; missing fields fall back to defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Apply environment overrides on top of this config
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(path) = lookup("SAMARTH_DB_PATH") {
            self.store.database_path = PathBuf::from(path);
        }
        if let Some(provider) = lookup("SAMARTH_LLM_PROVIDER") {
            self.llm.provider = match provider.trim().to_lowercase().as_str() {
                "ollama" => LlmProvider::Ollama,
                "groq" | "openai" | "chat_completions" => LlmProvider::ChatCompletions,
                other => anyhow::bail!("Unknown SAMARTH_LLM_PROVIDER '{}'", other),
            };
        }
        // Provider-specific variables first, generic ones win
        match self.llm.provider {
            LlmProvider::Ollama => {
                if let Some(url) = lookup("OLLAMA_URL") {
                    self.llm.base_url = Some(url);
                }
                if let Some(model) = lookup("OLLAMA_MODEL") {
                    self.llm.model = Some(model);
                }
            }
            LlmProvider::ChatCompletions => {
                if let Some(key) = lookup("GROQ_API_KEY") {
                    self.llm.api_key = Some(key);
                }
            }
        }
        if let Some(url) = lookup("SAMARTH_LLM_BASE_URL") {
            self.llm.base_url = Some(url);
        }
        if let Some(model) = lookup("SAMARTH_LLM_MODEL") {
            self.llm.model = Some(model);
        }
        if let Some(key) = lookup("SAMARTH_LLM_API_KEY") {
            self.llm.api_key = Some(key);
        }
        Ok(self)
    }

    /// Source description for a table, if configured
    pub fn source_for(&self, table: &str) -> Option<&DataSourceConfig> {
        self.sources.iter().find(|s| s.table == table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_target_crop_yield() {
        let config = PipelineConfig::default();
        assert_eq!(config.sources.len(), 1);
        assert_eq!(config.source_for("crop_yield").unwrap().file, "crop_yield.csv");
        assert_eq!(config.timeouts.intent(), Duration::from_secs(30));
        assert!(!config.compiler.compare_fan_out);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{"timeouts": {"intent_ms": 500}, "compiler": {"compare_fan_out": true}}"#).unwrap();
        assert_eq!(config.timeouts.intent_ms, 500);
        assert_eq!(config.timeouts.synthesis_ms, 60_000);
        assert!(config.compiler.compare_fan_out);
        assert_eq!(config.compiler.lookup_row_limit, 200);
    }

    #[test]
    fn test_env_overrides_select_provider() {
        let env: HashMap<&str, &str> = [
            ("SAMARTH_LLM_PROVIDER", "groq"),
            ("GROQ_API_KEY", "secret"),
            ("SAMARTH_DB_PATH", "/tmp/crops.db"),
        ]
        .into_iter()
        .collect();

        let config = PipelineConfig::default()
            .with_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.llm.provider, LlmProvider::ChatCompletions);
        assert_eq!(config.llm.api_key.as_deref(), Some("secret"));
        assert_eq!(config.store.database_path, PathBuf::from("/tmp/crops.db"));
    }

    #[test]
    fn test_unknown_provider_is_rejected() {
        let result = PipelineConfig::default()
            .with_overrides(|k| (k == "SAMARTH_LLM_PROVIDER").then(|| "carrier-pigeon".to_string()));
        assert!(result.is_err());
    }

    #[test]
    fn test_api_key_is_not_serialized() {
        let mut config = PipelineConfig::default();
        config.llm.api_key = Some("secret".to_string());
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("secret"));
    }
}
