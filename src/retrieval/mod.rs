//! Hybrid retrieval & reranking
//!
//! Sparse (lexical) and dense (vector) retrieval run side by side, their
//! scores are normalized and fused into a shortlist, and a cross-encoder
//! produces the final ordering.

mod engines;
mod fusion;
mod hybrid;
mod normalize;
mod pipeline;
mod reranker;
mod tokenizer;

pub use engines::{select_top_k, DenseEngine, DenseMatch, EngineError, LexicalEngine};
pub use fusion::{
    Candidate, FusedResultSet, FusionConfig, FusionError, FusionMerger, RetrievalResultSet,
    RetrievalSource, ScoredHit, SourceScore, DEFAULT_RERANKER_CUTOFF,
};
pub use hybrid::{HybridSearcher, SearchBackends, SearchError, SearchSettings, SearchStage};
pub use normalize::{
    min_max_normalize, MinMaxNormalizer, ScoreNormalizer, DEFAULT_DEGENERATE_SCORE,
};
pub use pipeline::{
    FuseStage, Pipeline, QueryContext, RerankStage, RetrieveStage, Stage, StageTimeouts,
};
pub use reranker::{
    CrossEncoder, FastEmbedCrossEncoder, RerankCandidate, RerankError, RerankedResult, Reranker,
    DEFAULT_RERANKER_MODEL,
};
pub use tokenizer::tokenize;

use serde::{Deserialize, Serialize};

/// Default number of final results
pub const DEFAULT_TOP_K: usize = 5;

/// Search request; unset fields fall back to the searcher's settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQuery {
    /// Query text
    pub text: String,

    /// Maximum number of final results
    pub k: Option<usize>,

    /// Weight of the sparse source in fusion, in [0, 1]
    pub alpha: Option<f32>,

    /// Number of fused candidates handed to the reranker
    pub reranker_cutoff: Option<usize>,
}

impl SearchQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            k: None,
            alpha: None,
            reranker_cutoff: None,
        }
    }

    pub fn with_k(mut self, k: usize) -> Self {
        self.k = Some(k);
        self
    }

    pub fn with_alpha(mut self, alpha: f32) -> Self {
        self.alpha = Some(alpha);
        self
    }

    pub fn with_reranker_cutoff(mut self, cutoff: usize) -> Self {
        self.reranker_cutoff = Some(cutoff);
        self
    }
}
