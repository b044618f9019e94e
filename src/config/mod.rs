//! Configuration management for fusion-rank
//!
//! Loads the TOML configuration, applies environment and profile overrides
//! and validates the result before any engine is built.

use crate::error::{FusionRankError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

mod validator;

pub use validator::ConfigValidator;

/// Current configuration schema version
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub fusion: FusionSettings,
    #[serde(default)]
    pub bm25: Bm25Config,
    pub embedding: EmbeddingConfig,
    pub indexing: IndexingConfig,
    pub reranker: RerankerConfig,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
    #[serde(default)]
    pub profiles: HashMap<String, ProfileOverrides>,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
    #[serde(default = "current_timestamp")]
    pub last_modified: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Query-time retrieval settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Sparse weight in fusion; dense gets `1 - alpha`
    pub alpha: f32,
    pub k: usize,
    pub reranker_cutoff: usize,
    #[serde(default)]
    pub degrade_to_single_source: bool,
    /// "bm25" (in-memory) or "tantivy" (on-disk keyword index)
    #[serde(default = "default_lexical_backend")]
    pub lexical_backend: String,
}

fn default_lexical_backend() -> String {
    "bm25".to_string()
}

/// Score normalization settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionSettings {
    /// Score given to every hit when a result set has no spread
    pub degenerate_score: f32,
}

impl Default for FusionSettings {
    fn default() -> Self {
        Self {
            degenerate_score: 1.0,
        }
    }
}

/// Okapi BM25 parameters
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Bm25Config {
    pub k1: f32,
    pub b: f32,
    pub epsilon: f32,
}

impl Default for Bm25Config {
    fn default() -> Self {
        Self {
            k1: 1.5,
            b: 0.75,
            epsilon: 0.25,
        }
    }
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub model: String,
    pub batch_size: usize,
}

/// Indexing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingConfig {
    pub vector_dim: usize,
    pub hnsw_ef_construction: usize,
    pub hnsw_m: usize,
    #[serde(default = "default_ef_search")]
    pub hnsw_ef_search: usize,
    pub data_dir: PathBuf,
}

fn default_ef_search() -> usize {
    64
}

/// Cross-encoder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankerConfig {
    pub model: String,
    pub batch_size: usize,
    pub max_input_tokens: usize,
    #[serde(default)]
    pub fallback_to_fusion: bool,
}

/// Per-call time limits as duration strings ("500ms", "5s", "1m"); "0" disables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    pub sparse: String,
    pub dense: String,
    pub rerank: String,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            sparse: "5s".to_string(),
            dense: "10s".to_string(),
            rerank: "30s".to_string(),
        }
    }
}

impl TimeoutsConfig {
    pub fn sparse_duration(&self) -> Result<Option<Duration>> {
        parse_timeout("timeouts.sparse", &self.sparse)
    }

    pub fn dense_duration(&self) -> Result<Option<Duration>> {
        parse_timeout("timeouts.dense", &self.dense)
    }

    pub fn rerank_duration(&self) -> Result<Option<Duration>> {
        parse_timeout("timeouts.rerank", &self.rerank)
    }
}

fn parse_timeout(path: &str, value: &str) -> Result<Option<Duration>> {
    let duration = parse_duration(value).ok_or_else(|| FusionRankError::InvalidConfigValue {
        path: path.to_string(),
        message: format!("Invalid duration format: {}", value),
    })?;
    Ok((!duration.is_zero()).then_some(duration))
}

/// Parse strings like "250ms", "5s", "2m", "1h"; a bare number is seconds
pub fn parse_duration(value: &str) -> Option<Duration> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    let pattern = PATTERN
        .get_or_init(|| Regex::new(r"^\s*(\d+)\s*(ms|s|m|h)?\s*$").ok())
        .as_ref()?;

    let caps = pattern.captures(value)?;
    let amount: u64 = caps.get(1)?.as_str().parse().ok()?;
    let duration = match caps.get(2).map(|m| m.as_str()) {
        Some("ms") => Duration::from_millis(amount),
        Some("m") => Duration::from_secs(amount.checked_mul(60)?),
        Some("h") => Duration::from_secs(amount.checked_mul(3600)?),
        _ => Duration::from_secs(amount),
    };
    Some(duration)
}

/// Profile-specific configuration overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alpha: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reranker_cutoff: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub k: Option<usize>,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(FusionRankError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| FusionRankError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        config.apply_env_overrides();
        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Save configuration to a file, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| FusionRankError::Io {
                source: e,
                context: format!("Failed to create config directory: {:?}", parent),
            })?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| FusionRankError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Load configuration with a specific profile applied
    pub fn load_with_profile(path: &Path, profile: &str) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_profile(profile)?;
        Ok(config)
    }

    /// Apply a profile's overrides to the configuration
    pub fn apply_profile(&mut self, profile: &str) -> Result<()> {
        let overrides =
            self.profiles
                .get(profile)
                .cloned()
                .ok_or_else(|| FusionRankError::ProfileNotFound {
                    name: profile.to_string(),
                })?;

        if let Some(alpha) = overrides.alpha {
            self.retrieval.alpha = alpha;
        }
        if let Some(cutoff) = overrides.reranker_cutoff {
            self.retrieval.reranker_cutoff = cutoff;
        }
        if let Some(k) = overrides.k {
            self.retrieval.k = k;
        }

        ConfigValidator::validate(self)
    }

    /// Apply environment variable overrides
    /// Environment variables in format: FUSION_RANK_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        for (key, value) in std::env::vars() {
            if let Some(config_key) = key.strip_prefix("FUSION_RANK_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "RETRIEVAL__ALPHA" => self.retrieval.alpha = parse_env(path, value)?,
            "RETRIEVAL__K" => self.retrieval.k = parse_env(path, value)?,
            "RETRIEVAL__RERANKER_CUTOFF" => {
                self.retrieval.reranker_cutoff = parse_env(path, value)?
            }
            "RETRIEVAL__DEGRADE_TO_SINGLE_SOURCE" => {
                self.retrieval.degrade_to_single_source = parse_env(path, value)?
            }
            "RETRIEVAL__LEXICAL_BACKEND" => self.retrieval.lexical_backend = value.to_string(),
            "EMBEDDING__MODEL" => self.embedding.model = value.to_string(),
            "RERANKER__MODEL" => self.reranker.model = value.to_string(),
            "RERANKER__FALLBACK_TO_FUSION" => {
                self.reranker.fallback_to_fusion = parse_env(path, value)?
            }
            "INDEXING__DATA_DIR" => self.indexing.data_dir = PathBuf::from(value),
            "TIMEOUTS__SPARSE" => self.timeouts.sparse = value.to_string(),
            "TIMEOUTS__DENSE" => self.timeouts.dense = value.to_string(),
            "TIMEOUTS__RERANK" => self.timeouts.rerank = value.to_string(),
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| FusionRankError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("fusion-rank").join("config.toml"))
    }

    /// Get the default data directory
    pub fn default_data_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| FusionRankError::Config("Cannot determine data directory".to_string()))?;

        Ok(data_dir.join("fusion-rank"))
    }
}

fn parse_env<T: std::str::FromStr>(path: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| FusionRankError::InvalidConfigValue {
            path: path.to_string(),
            message: format!("Cannot parse '{}'", value),
        })
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = Self::default_data_dir().unwrap_or_else(|_| PathBuf::from(".fusion-rank"));

        Self {
            meta: MetaConfig {
                schema_version: SCHEMA_VERSION.to_string(),
                created_at: current_timestamp(),
                last_modified: current_timestamp(),
            },
            retrieval: RetrievalConfig {
                alpha: 0.3,
                k: 5,
                reranker_cutoff: 20,
                degrade_to_single_source: false,
                lexical_backend: default_lexical_backend(),
            },
            fusion: FusionSettings::default(),
            bm25: Bm25Config::default(),
            embedding: EmbeddingConfig {
                model: "all-MiniLM-L6-v2".to_string(),
                batch_size: 32,
            },
            indexing: IndexingConfig {
                vector_dim: 384,
                hnsw_ef_construction: 200,
                hnsw_m: 16,
                hnsw_ef_search: default_ef_search(),
                data_dir,
            },
            reranker: RerankerConfig {
                model: "BAAI/bge-reranker-v2-m3".to_string(),
                batch_size: 16,
                max_input_tokens: 512,
                fallback_to_fusion: false,
            },
            timeouts: TimeoutsConfig::default(),
            profiles: HashMap::new(),
        }
    }
}
