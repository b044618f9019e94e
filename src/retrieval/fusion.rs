//! Weighted, count-normalized fusion of sparse and dense result sets
//!
//! Each result set is min-max normalized on its own scale, weighted (`alpha`
//! for sparse, `1 - alpha` for dense) and merged by chunk id. The fused score
//! is the accumulated weighted score divided by the number of sources that
//! proposed the chunk.
//!
//! Lexical result sets only contain chunks with a positive score, so the
//! weakest lexical match normalizes to 0 rather than a non-matching chunk.
//!
//! Dividing by the source count favors consensus over magnitude only up to a
//! point: a chunk found by both engines at moderate scores can rank below a
//! chunk found by one engine at its top score. This is intended.

use super::normalize::{MinMaxNormalizer, ScoreNormalizer};
use crate::corpus::ChunkId;
use ahash::{AHashMap, AHashSet};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Default number of fused candidates handed to the reranker
pub const DEFAULT_RERANKER_CUTOFF: usize = 20;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FusionError {
    #[error("Invalid sparse weight {0}: must be a finite value in [0, 1]")]
    InvalidWeight(f32),

    #[error("Invalid cutoff: must be greater than 0")]
    InvalidCutoff,
}

/// Which engine produced a result set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalSource {
    Sparse,
    Dense,
}

impl fmt::Display for RetrievalSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sparse => write!(f, "sparse"),
            Self::Dense => write!(f, "dense"),
        }
    }
}

/// One (chunk, raw score) pair from an engine
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredHit {
    pub id: ChunkId,
    pub score: f32,
}

/// Ranked hits returned by one engine for one query
#[derive(Debug, Clone)]
pub struct RetrievalResultSet {
    source: RetrievalSource,
    hits: Vec<ScoredHit>,
}

impl RetrievalResultSet {
    pub fn new(source: RetrievalSource, hits: Vec<(ChunkId, f32)>) -> Self {
        Self {
            source,
            hits: hits
                .into_iter()
                .map(|(id, score)| ScoredHit { id, score })
                .collect(),
        }
    }

    pub fn empty(source: RetrievalSource) -> Self {
        Self {
            source,
            hits: Vec::new(),
        }
    }

    pub fn source(&self) -> RetrievalSource {
        self.source
    }

    pub fn hits(&self) -> &[ScoredHit] {
        &self.hits
    }


    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

/// Raw and normalized score of a candidate from one source
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SourceScore {
    pub raw: f32,
    pub normalized: f32,
}

/// A chunk proposed by at least one engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: ChunkId,
    pub sparse: Option<SourceScore>,
    pub dense: Option<SourceScore>,
    /// Sum of weighted normalized scores
    pub accumulated: f32,
    /// Number of engines that returned this chunk
    pub source_count: u8,
    /// `accumulated / source_count`
    pub fused_score: f32,
}

/// Fusion parameters for one query
#[derive(Debug, Clone, Copy)]
pub struct FusionConfig {
    /// Weight of the sparse source (`alpha`); dense gets `1 - alpha`
    pub sparse_weight: f32,

    /// Number of fused candidates kept
    pub cutoff: usize,
}

impl FusionConfig {
    pub fn new(sparse_weight: f32, cutoff: usize) -> Result<Self, FusionError> {
        if !sparse_weight.is_finite() || !(0.0..=1.0).contains(&sparse_weight) {
            return Err(FusionError::InvalidWeight(sparse_weight));
        }
        if cutoff == 0 {
            return Err(FusionError::InvalidCutoff);
        }

        Ok(Self {
            sparse_weight,
            cutoff,
        })
    }

    pub fn dense_weight(&self) -> f32 {
        1.0 - self.sparse_weight
    }
}

/// Fused candidates ordered by fused score descending
#[derive(Debug, Clone, Default)]
pub struct FusedResultSet {
    candidates: Vec<Candidate>,
    positions: AHashMap<ChunkId, usize>,
}

impl FusedResultSet {
    fn from_ordered(candidates: Vec<Candidate>) -> Self {
        let positions = candidates
            .iter()
            .enumerate()
            .map(|(pos, c)| (c.id, pos))
            .collect();
        Self {
            candidates,
            positions,
        }
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    pub fn get(&self, id: ChunkId) -> Option<&Candidate> {
        self.positions.get(&id).map(|&pos| &self.candidates[pos])
    }

    pub fn ids(&self) -> Vec<ChunkId> {
        self.candidates.iter().map(|c| c.id).collect()
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn into_candidates(self) -> Vec<Candidate> {
        self.candidates
    }
}

/// Merges a sparse and a dense result set into one ranked candidate list
#[derive(Clone)]
pub struct FusionMerger {
    normalizer: Arc<dyn ScoreNormalizer>,
}

impl FusionMerger {
    pub fn new(normalizer: Arc<dyn ScoreNormalizer>) -> Self {
        Self { normalizer }
    }

    /// Fuse two result sets
    ///
    /// Ties on the fused score keep discovery order: sparse hits in sparse
    /// rank order first, then dense-only hits in dense rank order. Either set
    /// may be empty.
    pub fn fuse(
        &self,
        sparse: &RetrievalResultSet,
        dense: &RetrievalResultSet,
        config: &FusionConfig,
    ) -> FusedResultSet {
        let (sparse_hits, sparse_raw) = first_occurrences(sparse);
        let (dense_hits, dense_raw) = first_occurrences(dense);
        let sparse_norm = self.normalizer.normalize(&sparse_raw);
        let dense_norm = self.normalizer.normalize(&dense_raw);

        let mut candidates: Vec<Candidate> =
            Vec::with_capacity(sparse_hits.len() + dense_hits.len());
        let mut positions: AHashMap<ChunkId, usize> = AHashMap::new();

        for (hit, normalized) in sparse_hits.iter().zip(sparse_norm) {
            positions.insert(hit.id, candidates.len());
            candidates.push(Candidate {
                id: hit.id,
                sparse: Some(SourceScore {
                    raw: hit.score,
                    normalized,
                }),
                dense: None,
                accumulated: config.sparse_weight * normalized,
                source_count: 1,
                fused_score: 0.0,
            });
        }

        for (hit, normalized) in dense_hits.iter().zip(dense_norm) {
            let contribution = config.dense_weight() * normalized;
            let score = SourceScore {
                raw: hit.score,
                normalized,
            };

            match positions.get(&hit.id) {
                Some(&pos) => {
                    let candidate = &mut candidates[pos];
                    candidate.dense = Some(score);
                    candidate.accumulated += contribution;
                    candidate.source_count += 1;
                }
                None => {
                    positions.insert(hit.id, candidates.len());
                    candidates.push(Candidate {
                        id: hit.id,
                        sparse: None,
                        dense: Some(score),
                        accumulated: contribution,
                        source_count: 1,
                        fused_score: 0.0,
                    });
                }
            }
        }

        for candidate in &mut candidates {
            candidate.fused_score = candidate.accumulated / f32::from(candidate.source_count);
        }

        // Stable sort keeps discovery order among equal scores
        candidates.sort_by(|a, b| b.fused_score.total_cmp(&a.fused_score));
        candidates.truncate(config.cutoff);

        tracing::debug!(
            "Fused {} sparse + {} dense hits into {} candidates",
            sparse.len(),
            dense.len(),
            candidates.len()
        );

        FusedResultSet::from_ordered(candidates)
    }
}

/// Hits of one set with repeated ids removed (first occurrence wins),
/// paired with their raw scores for normalization
fn first_occurrences(set: &RetrievalResultSet) -> (Vec<ScoredHit>, Vec<f32>) {
    let mut seen: AHashSet<ChunkId> = AHashSet::with_capacity(set.len());
    let hits: Vec<ScoredHit> = set
        .hits()
        .iter()
        .filter(|hit| {
            let first = seen.insert(hit.id);
            if !first {
                tracing::debug!("Ignoring repeated {} hit for chunk {}", set.source(), hit.id);
            }
            first
        })
        .copied()
        .collect();
    let scores = hits.iter().map(|hit| hit.score).collect();
    (hits, scores)
}

impl Default for FusionMerger {
    fn default() -> Self {
        Self::new(Arc::new(MinMaxNormalizer::default()))
    }
}
