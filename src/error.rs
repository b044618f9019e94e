use crate::corpus::CorpusError;
use crate::embedding::{EmbeddingError, IndexBuildError};
use crate::retrieval::{RerankError, SearchError};
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for fusion-rank
#[derive(Error, Debug)]
pub enum FusionRankError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration validation errors
    #[error("Configuration validation failed: {errors:?}")]
    ConfigValidation { errors: Vec<ValidationError> },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Invalid configuration value
    #[error("Invalid configuration value at {path}: {message}")]
    InvalidConfigValue { path: String, message: String },

    /// Unknown configuration profile
    #[error("Profile not found: {name}")]
    ProfileNotFound { name: String },

    /// IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    /// JSON errors
    #[error("JSON error: {context}: {source}")]
    Json {
        source: serde_json::Error,
        context: String,
    },

    /// Chunk store errors
    #[error("Corpus error: {0}")]
    Corpus(#[from] CorpusError),

    /// Engine construction errors
    #[error("Index error: {0}")]
    Index(#[from] IndexBuildError),

    /// Embedding model errors
    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    /// Cross-encoder model errors
    #[error("Reranker error: {0}")]
    Rerank(#[from] RerankError),

    /// Query pipeline errors
    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Path to the configuration key that failed validation
    pub path: String,
    /// Error message describing the validation failure
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type for fusion-rank operations
pub type Result<T> = std::result::Result<T, FusionRankError>;

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_context_chain_is_kept() {
        let built: std::result::Result<(), IndexBuildError> =
            Err(IndexBuildError::UnknownBackend("sqlite".to_string()));
        let err: FusionRankError = built
            .context("Failed to build dense index for corpus.jsonl")
            .unwrap_err()
            .into();

        assert!(matches!(err, FusionRankError::Other(_)));
        assert_eq!(err.to_string(), "Failed to build dense index for corpus.jsonl");
        if let FusionRankError::Other(inner) = &err {
            let root = inner.root_cause().to_string();
            assert_eq!(root, "Unknown lexical backend: sqlite");
        }
    }

    #[test]
    fn test_index_error_converts() {
        fn build() -> Result<()> {
            Err(IndexBuildError::DimensionMismatch {
                provider: 384,
                configured: 768,
            })?;
            Ok(())
        }

        let err = build().unwrap_err();
        assert!(matches!(err, FusionRankError::Index(_)));
        assert!(err.to_string().contains("384"));
    }
}
