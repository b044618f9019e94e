/// HNSW vector index for similarity search
use crate::corpus::CorpusFingerprint;
use crate::retrieval::{DenseEngine, DenseMatch, EngineError};
use ahash::AHashSet;
use hnsw_rs::prelude::*;
use thiserror::Error;

/// Upper bound on HNSW layers supported by hnsw_rs
const MAX_LAYERS: usize = 16;

#[derive(Error, Debug)]
pub enum VectorIndexError {
    #[error("Index initialization failed: {0}")]
    InitializationError(String),

    #[error("Duplicate id in index: {0}")]
    DuplicateId(String),

    #[error("Index is full: capacity {0}")]
    CapacityExceeded(usize),

    #[error("Invalid dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },
}

/// Construction parameters for [`VectorIndex`]
#[derive(Debug, Clone, Copy)]
pub struct HnswParams {
    /// Number of connections per layer (M)
    pub m: usize,
    /// Candidate list size during construction (higher = better recall, slower build)
    pub ef_construction: usize,
    /// Candidate list size during search, raised to `top_k` when smaller
    pub ef_search: usize,
}

impl Default for HnswParams {
    fn default() -> Self {
        Self {
            m: 16,
            ef_construction: 200,
            ef_search: 64,
        }
    }
}

/// HNSW vector index over a chunk store
///
/// Vectors are stored in insertion slots; each slot remembers the external id
/// of its chunk so matches can be mapped back through the identifier map.
/// Similarity is `1 - cosine distance`.
pub struct VectorIndex {
    index: Hnsw<'static, f32, DistCosine>,
    dimension: usize,
    capacity: usize,
    params: HnswParams,
    external_ids: Vec<String>,
    seen: AHashSet<String>,
    fingerprint: CorpusFingerprint,
}

impl VectorIndex {
    /// Create an empty index for at most `capacity` vectors
    pub fn new(
        dimension: usize,
        capacity: usize,
        params: HnswParams,
        fingerprint: CorpusFingerprint,
    ) -> Result<Self, VectorIndexError> {
        if dimension == 0 {
            return Err(VectorIndexError::InitializationError(
                "dimension must be greater than 0".to_string(),
            ));
        }
        if params.m == 0 || params.ef_construction == 0 {
            return Err(VectorIndexError::InitializationError(
                "HNSW m and ef_construction must be greater than 0".to_string(),
            ));
        }

        let capacity = capacity.max(1);
        let index = Hnsw::<f32, DistCosine>::new(
            params.m,
            capacity,
            MAX_LAYERS,
            params.ef_construction,
            DistCosine,
        );

        Ok(Self {
            index,
            dimension,
            capacity,
            params,
            external_ids: Vec::with_capacity(capacity),
            seen: AHashSet::with_capacity(capacity),
            fingerprint,
        })
    }

    /// Insert the vector of one chunk
    pub fn insert(&mut self, external_id: &str, vector: &[f32]) -> Result<(), VectorIndexError> {
        if vector.len() != self.dimension {
            return Err(VectorIndexError::InvalidDimension {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        if self.external_ids.len() >= self.capacity {
            return Err(VectorIndexError::CapacityExceeded(self.capacity));
        }
        if !self.seen.insert(external_id.to_string()) {
            return Err(VectorIndexError::DuplicateId(external_id.to_string()));
        }

        let slot = self.external_ids.len();
        let data = vector.to_vec();
        self.index.insert((&data, slot));
        self.external_ids.push(external_id.to_string());

        Ok(())
    }

    /// Search for the `k` nearest neighbors, most similar first
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<DenseMatch>, VectorIndexError> {
        if query.len() != self.dimension {
            return Err(VectorIndexError::InvalidDimension {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }

        let ef_search = self.params.ef_search.max(k);
        let mut matches: Vec<DenseMatch> = self
            .index
            .search(query, k, ef_search)
            .into_iter()
            .filter_map(|neighbour| {
                self.external_ids
                    .get(neighbour.d_id)
                    .map(|external_id| DenseMatch {
                        external_id: external_id.clone(),
                        score: 1.0 - neighbour.distance,
                    })
            })
            .collect();

        matches.sort_by(|a, b| b.score.total_cmp(&a.score));
        matches.truncate(k);
        Ok(matches)
    }

    /// Get the number of vectors in the index
    pub fn len(&self) -> usize {
        self.external_ids.len()
    }

    /// Check if index is empty
    pub fn is_empty(&self) -> bool {
        self.external_ids.is_empty()
    }

    /// Get vector dimension
    pub fn dimension(&self) -> usize {
        self.dimension
    }
}

impl DenseEngine for VectorIndex {
    fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<DenseMatch>, EngineError> {
        Ok(self.search(vector, top_k)?)
    }

    fn corpus_fingerprint(&self) -> CorpusFingerprint {
        self.fingerprint
    }
}
