//! Contracts the retrieval core needs from its engines

use crate::corpus::{ChunkId, CorpusFingerprint};
use crate::embedding::{EmbeddingError, KeywordIndexError, VectorIndexError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Vector index error: {0}")]
    VectorIndex(#[from] VectorIndexError),

    #[error("Keyword index error: {0}")]
    KeywordIndex(#[from] KeywordIndexError),

    #[error("{0}")]
    Backend(String),
}

/// Sparse, keyword-frequency based engine
pub trait LexicalEngine: Send + Sync {
    /// Score every chunk of the corpus against the tokenized query
    ///
    /// The returned vector is aligned to the chunk store ordering: entry `i`
    /// is the score of `ChunkId(i)`.
    fn score(&self, tokens: &[String]) -> Result<Vec<f32>, EngineError>;

    /// Fingerprint of the chunk store this engine was built from
    fn corpus_fingerprint(&self) -> CorpusFingerprint;
}

/// A match returned by a dense engine
#[derive(Debug, Clone, PartialEq)]
pub struct DenseMatch {
    /// Identifier as stored in the vector index
    pub external_id: String,
    /// Similarity score, higher is more similar
    pub score: f32,
}

/// Vector similarity engine
pub trait DenseEngine: Send + Sync {
    /// Return up to `top_k` matches ordered by similarity descending
    fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<DenseMatch>, EngineError>;

    /// Fingerprint of the chunk store this engine was built from
    fn corpus_fingerprint(&self) -> CorpusFingerprint;
}

/// Pick the `k` best chunks from a corpus-aligned score vector
///
/// Only strictly positive, finite scores count as hits. Ties keep corpus order.
pub fn select_top_k(scores: &[f32], k: usize) -> Vec<(ChunkId, f32)> {
    let mut hits: Vec<(ChunkId, f32)> = scores
        .iter()
        .enumerate()
        .filter(|(_, score)| score.is_finite() && **score > 0.0)
        .map(|(ordinal, score)| (ChunkId(ordinal), *score))
        .collect();

    hits.sort_by(|a, b| b.1.total_cmp(&a.1));
    hits.truncate(k);
    hits
}
