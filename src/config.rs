use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TacitConfig {
    pub log_level: String,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub extraction: ExtractionConfig,
    pub retrieval: RetrievalConfig,
    pub ingest: IngestConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
    pub default_project: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Base URL of an OpenAI-compatible API (e.g. Ollama's `http://localhost:11434/v1`).
    pub endpoint: String,
    pub model: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ExtractionConfig {
    /// `"rules"` (deterministic, offline) or `"llm"`.
    pub extractor: String,
    /// Chat endpoint for the LLM extractor; ignored by the rule extractor.
    pub llm_endpoint: String,
    pub llm_model: String,
    /// Maximum characters of transcript text sent to the LLM per run.
    pub llm_max_chars: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    pub default_k: usize,
    /// Candidates fetched per path before fusion.
    pub candidate_limit: usize,
    /// Cosine similarity at or above which a new fact supersedes a live one.
    pub merge_threshold: f64,
    /// Lower bound of the reinforcement band.
    pub reinforce_threshold: f64,
    /// Pairwise similarity above which recall keeps only one representative.
    pub mmr_threshold: f64,
    pub vector_weight: f64,
    pub keyword_weight: f64,
    pub graph_weight: f64,
    /// Exponential recency decay constant, per day of fact age.
    pub recency_lambda: f64,
    pub max_hops: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct IngestConfig {
    pub max_retries: u32,
    pub retry_base_ms: u64,
    /// Advisory session locks older than this are considered abandoned.
    pub lock_stale_secs: i64,
}

impl Default for TacitConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            storage: StorageConfig::default(),
            embedding: EmbeddingConfig::default(),
            extraction: ExtractionConfig::default(),
            retrieval: RetrievalConfig::default(),
            ingest: IngestConfig::default(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let db_path = default_tacit_dir()
            .join("knowledge.db")
            .to_string_lossy()
            .into_owned();
        Self {
            db_path,
            default_project: "default".into(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434/v1".into(),
            model: "nomic-embed-text".into(),
            timeout_secs: 30,
        }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            extractor: "rules".into(),
            llm_endpoint: "http://localhost:11434/v1".into(),
            llm_model: "qwen2.5-coder".into(),
            llm_max_chars: 8000,
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_k: 5,
            candidate_limit: 30,
            merge_threshold: 0.92,
            reinforce_threshold: 0.80,
            mmr_threshold: 0.95,
            vector_weight: 0.55,
            keyword_weight: 0.25,
            graph_weight: 0.20,
            recency_lambda: 0.01,
            max_hops: 2,
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_base_ms: 250,
            lock_stale_secs: 600,
        }
    }
}

/// Returns `~/.tacit/`
pub fn default_tacit_dir() -> PathBuf {
    dirs::home_dir()
        .expect("home directory must exist")
        .join(".tacit")
}

/// Returns the default config file path: `~/.tacit/config.toml`
pub fn default_config_path() -> PathBuf {
    default_tacit_dir().join("config.toml")
}

impl TacitConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            TacitConfig::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides (TACIT_DB, TACIT_PROJECT,
    /// TACIT_LOG_LEVEL, TACIT_EMBED_URL).
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("TACIT_DB") {
            self.storage.db_path = val;
        }
        if let Ok(val) = std::env::var("TACIT_PROJECT") {
            self.storage.default_project = val;
        }
        if let Ok(val) = std::env::var("TACIT_LOG_LEVEL") {
            self.log_level = val;
        }
        if let Ok(val) = std::env::var("TACIT_EMBED_URL") {
            self.embedding.endpoint = val;
        }
    }

    /// Reject configurations that would silently change retrieval semantics.
    /// Runs before any ingestion or query traffic is accepted.
    pub fn validate(&self) -> Result<()> {
        let r = &self.retrieval;
        anyhow::ensure!(
            (0.0..=1.0).contains(&r.merge_threshold),
            "merge_threshold must be in [0, 1], got {}",
            r.merge_threshold
        );
        anyhow::ensure!(
            r.reinforce_threshold <= r.merge_threshold,
            "reinforce_threshold ({}) must not exceed merge_threshold ({})",
            r.reinforce_threshold,
            r.merge_threshold
        );
        let weight_sum = r.vector_weight + r.keyword_weight + r.graph_weight;
        anyhow::ensure!(weight_sum > 0.0, "fusion weights must not all be zero");
        anyhow::ensure!(
            r.recency_lambda >= 0.0,
            "recency_lambda must be non-negative, got {}",
            r.recency_lambda
        );
        match self.extraction.extractor.as_str() {
            "rules" | "llm" => {}
            other => anyhow::bail!("unknown extractor: {other}. Supported: rules, llm"),
        }
        Ok(())
    }

    /// Resolve the database path, expanding `~` if needed.
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .expect("home directory must exist")
            .join(rest)
    } else {
        PathBuf::from(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = TacitConfig::default();
        config.validate().unwrap();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.storage.default_project, "default");
        assert_eq!(config.retrieval.default_k, 5);
        assert!(config.storage.db_path.ends_with("knowledge.db"));
    }

    #[test]
    fn parse_toml_config() {
        let toml_str = r#"
log_level = "debug"

[storage]
db_path = "/tmp/test.db"
default_project = "myproject"

[retrieval]
default_k = 10
recency_lambda = 0.05
"#;
        let config: TacitConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.storage.db_path, "/tmp/test.db");
        assert_eq!(config.storage.default_project, "myproject");
        assert_eq!(config.retrieval.default_k, 10);
        assert!((config.retrieval.recency_lambda - 0.05).abs() < 1e-9);
        // defaults still apply for unset fields
        assert!((config.retrieval.merge_threshold - 0.92).abs() < 1e-9);
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = TacitConfig::default();
        std::env::set_var("TACIT_DB", "/tmp/override.db");
        std::env::set_var("TACIT_PROJECT", "env-project");
        std::env::set_var("TACIT_LOG_LEVEL", "trace");

        config.apply_env_overrides();

        assert_eq!(config.storage.db_path, "/tmp/override.db");
        assert_eq!(config.storage.default_project, "env-project");
        assert_eq!(config.log_level, "trace");

        // Clean up
        std::env::remove_var("TACIT_DB");
        std::env::remove_var("TACIT_PROJECT");
        std::env::remove_var("TACIT_LOG_LEVEL");
    }

    #[test]
    fn validate_rejects_inverted_thresholds() {
        let mut config = TacitConfig::default();
        config.retrieval.reinforce_threshold = 0.99;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_unknown_extractor() {
        let mut config = TacitConfig::default();
        config.extraction.extractor = "magic".into();
        assert!(config.validate().is_err());
    }
}
