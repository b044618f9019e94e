//! Hybrid search combining lexical and dense retrieval with reranking

use super::fusion::{FusionConfig, FusionMerger, DEFAULT_RERANKER_CUTOFF};
use super::normalize::{MinMaxNormalizer, DEFAULT_DEGENERATE_SCORE};
use super::pipeline::{
    FuseStage, Pipeline, QueryContext, RerankStage, RetrieveStage, StageTimeouts,
};
use super::reranker::{CrossEncoder, RerankedResult, Reranker};
use super::{DenseEngine, LexicalEngine, SearchQuery, DEFAULT_TOP_K};
use crate::config::Config;
use crate::corpus::{ChunkStore, CorpusFingerprint};
use crate::embedding::EmbeddingProvider;
use crate::error::Result as ConfigResult;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

/// Pipeline stage a failure is attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchStage {
    Sparse,
    Dense,
    Fuse,
    Rerank,
}

impl fmt::Display for SearchStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Sparse => "sparse",
            Self::Dense => "dense",
            Self::Fuse => "fuse",
            Self::Rerank => "rerank",
        };
        write!(f, "{}", name)
    }
}

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("{stage} engine unavailable: {message}")]
    EngineUnavailable { stage: SearchStage, message: String },

    #[error("Reranker backend unavailable: {0}")]
    RerankBackendUnavailable(String),

    #[error("{stage} engine was built from corpus {actual}, chunk store is {expected}")]
    CorpusMismatch {
        stage: SearchStage,
        expected: CorpusFingerprint,
        actual: CorpusFingerprint,
    },

    #[error("{stage} stage got unknown identifier '{external_id}'")]
    UnknownIdentifier {
        stage: SearchStage,
        external_id: String,
    },

    #[error("Invalid {stage} parameters: {message}")]
    InvalidParameters { stage: SearchStage, message: String },

    #[error("Invalid query: {0}")]
    InvalidQuery(String),
}

impl SearchError {
    pub(crate) fn engine(stage: SearchStage, message: impl fmt::Display) -> Self {
        Self::EngineUnavailable {
            stage,
            message: message.to_string(),
        }
    }

    /// Stage that failed; `None` for queries rejected before any stage ran
    pub fn stage(&self) -> Option<SearchStage> {
        match self {
            Self::EngineUnavailable { stage, .. }
            | Self::CorpusMismatch { stage, .. }
            | Self::UnknownIdentifier { stage, .. }
            | Self::InvalidParameters { stage, .. } => Some(*stage),
            Self::RerankBackendUnavailable(_) => Some(SearchStage::Rerank),
            Self::InvalidQuery(_) => None,
        }
    }
}

/// Shared, read-only collaborators of the searcher
#[derive(Clone)]
pub struct SearchBackends {
    pub store: Arc<ChunkStore>,
    pub lexical: Arc<dyn LexicalEngine>,
    pub dense: Arc<dyn DenseEngine>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub cross_encoder: Arc<dyn CrossEncoder>,
}

/// Searcher tuning, usually derived from [`Config`]
#[derive(Debug, Clone)]
pub struct SearchSettings {
    pub alpha: f32,
    pub k: usize,
    pub reranker_cutoff: usize,
    pub degenerate_score: f32,
    pub degrade_to_single_source: bool,
    pub fallback_to_fusion: bool,
    pub rerank_batch_size: usize,
    pub max_input_tokens: usize,
    pub timeouts: StageTimeouts,
}

impl SearchSettings {
    pub fn from_config(config: &Config) -> ConfigResult<Self> {
        let timeouts = StageTimeouts {
            sparse: config.timeouts.sparse_duration()?,
            dense: config.timeouts.dense_duration()?,
            rerank: config.timeouts.rerank_duration()?,
        };

        Ok(Self {
            alpha: config.retrieval.alpha,
            k: config.retrieval.k,
            reranker_cutoff: config.retrieval.reranker_cutoff,
            degenerate_score: config.fusion.degenerate_score,
            degrade_to_single_source: config.retrieval.degrade_to_single_source,
            fallback_to_fusion: config.reranker.fallback_to_fusion,
            rerank_batch_size: config.reranker.batch_size,
            max_input_tokens: config.reranker.max_input_tokens,
            timeouts,
        })
    }
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            alpha: 0.3,
            k: DEFAULT_TOP_K,
            reranker_cutoff: DEFAULT_RERANKER_CUTOFF,
            degenerate_score: DEFAULT_DEGENERATE_SCORE,
            degrade_to_single_source: false,
            fallback_to_fusion: false,
            rerank_batch_size: 16,
            max_input_tokens: 512,
            timeouts: StageTimeouts::default(),
        }
    }
}

/// Hybrid searcher: lexical + dense retrieval, fusion, cross-encoder rerank
pub struct HybridSearcher {
    pipeline: Pipeline,
    settings: SearchSettings,
}

impl HybridSearcher {
    /// Create a searcher running the standard retrieve, fuse, rerank pipeline
    ///
    /// Fails if either engine was built from a different corpus than `store`.
    pub fn new(backends: SearchBackends, settings: SearchSettings) -> Result<Self, SearchError> {
        let expected = backends.store.fingerprint();
        let engines = [
            (SearchStage::Sparse, backends.lexical.corpus_fingerprint()),
            (SearchStage::Dense, backends.dense.corpus_fingerprint()),
        ];
        for (stage, actual) in engines {
            if actual != expected {
                return Err(SearchError::CorpusMismatch {
                    stage,
                    expected,
                    actual,
                });
            }
        }

        let merger = FusionMerger::new(Arc::new(MinMaxNormalizer::new(
            settings.degenerate_score,
        )));
        let reranker = Arc::new(Reranker::new(
            backends.cross_encoder,
            settings.rerank_batch_size,
            settings.max_input_tokens,
        ));

        tracing::info!(
            "Hybrid searcher ready: {} chunks, reranker {}",
            backends.store.len(),
            reranker.model_name()
        );

        let pipeline = Pipeline::new()
            .with_stage(RetrieveStage::new(
                Arc::clone(&backends.store),
                backends.lexical,
                backends.dense,
                backends.embedder,
                settings.timeouts,
                settings.degrade_to_single_source,
            ))
            .with_stage(FuseStage::new(merger))
            .with_stage(RerankStage::new(
                backends.store,
                reranker,
                settings.timeouts.rerank,
                settings.fallback_to_fusion,
            ));

        Ok(Self { pipeline, settings })
    }

    /// Create a searcher around a custom pipeline
    pub fn with_pipeline(pipeline: Pipeline, settings: SearchSettings) -> Self {
        Self { pipeline, settings }
    }

    pub fn settings(&self) -> &SearchSettings {
        &self.settings
    }

    /// Perform hybrid search
    ///
    /// Returns at most `k` results ordered by rerank score. An empty candidate
    /// set is not an error.
    pub async fn search(&self, query: &SearchQuery) -> Result<Vec<RerankedResult>, SearchError> {
        if query.text.trim().is_empty() {
            return Err(SearchError::InvalidQuery(
                "Query text cannot be empty".to_string(),
            ));
        }

        let k = query.k.unwrap_or(self.settings.k);
        let alpha = query.alpha.unwrap_or(self.settings.alpha);
        let cutoff = query.reranker_cutoff.unwrap_or(self.settings.reranker_cutoff);

        if k == 0 {
            return Err(SearchError::InvalidParameters {
                stage: SearchStage::Rerank,
                message: "k must be greater than 0".to_string(),
            });
        }
        FusionConfig::new(alpha, cutoff).map_err(|e| SearchError::InvalidParameters {
            stage: SearchStage::Fuse,
            message: e.to_string(),
        })?;

        let start = Instant::now();
        let ctx = QueryContext::new(query.text.clone(), k, alpha, cutoff);
        let query_id = ctx.query_id;
        tracing::info!(
            "[{}] search \"{}\" (k={}, alpha={}, cutoff={})",
            query_id,
            query.text,
            k,
            alpha,
            cutoff
        );

        let ctx = match self.pipeline.run(ctx).await {
            Ok(ctx) => ctx,
            Err(e) => {
                tracing::warn!("[{}] search failed: {}", query_id, e);
                return Err(e);
            }
        };

        let mut results = ctx.results;
        results.truncate(k);

        tracing::info!(
            "[{}] {} results in {}ms",
            query_id,
            results.len(),
            start.elapsed().as_millis()
        );

        Ok(results)
    }
}
