/// Builds the retrieval engines for a chunk store
use super::{
    Bm25Index, EmbeddingError, EmbeddingProvider, HnswParams, KeywordIndex, VectorIndex,
    VectorIndexError,
};
use crate::config::{Config, IndexingConfig};
use crate::corpus::{Chunk, ChunkStore};
use crate::retrieval::LexicalEngine;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum IndexBuildError {
    #[error("Embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Vector index error: {0}")]
    VectorIndex(#[from] VectorIndexError),

    #[error("Keyword index error: {0}")]
    KeywordIndex(#[from] super::KeywordIndexError),

    #[error("Embedding dimension {provider} does not match indexing.vector_dim {configured}")]
    DimensionMismatch { provider: usize, configured: usize },

    #[error("Unknown lexical backend: {0}")]
    UnknownBackend(String),
}

/// Summary of one dense index build
#[derive(Debug, Clone, Copy)]
pub struct BuildReport {
    pub indexed: usize,
    pub skipped: usize,
    pub duration_ms: u64,
}

/// Embeds chunks in batches and builds the lexical and dense engines
pub struct IndexBuilder {
    provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
}

impl IndexBuilder {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, batch_size: usize) -> Self {
        Self {
            provider,
            batch_size: batch_size.max(1),
        }
    }

    /// Embed every non-empty chunk and insert it into a fresh HNSW index
    ///
    /// Chunks with empty text have nothing to embed; they are skipped and stay
    /// reachable through the lexical engine only.
    pub fn build_vector_index(
        &self,
        store: &ChunkStore,
        config: &IndexingConfig,
    ) -> Result<(VectorIndex, BuildReport), IndexBuildError> {
        let start = Instant::now();
        if self.provider.dimension() != config.vector_dim {
            return Err(IndexBuildError::DimensionMismatch {
                provider: self.provider.dimension(),
                configured: config.vector_dim,
            });
        }

        let (chunks, empty): (Vec<&Chunk>, Vec<&Chunk>) = store
            .iter()
            .partition(|chunk| !chunk.indexed_text().trim().is_empty());
        for chunk in &empty {
            warn!(
                "Chunk {} ({}) has no text, skipping dense indexing",
                chunk.id, chunk.external_id
            );
        }

        let params = HnswParams {
            m: config.hnsw_m,
            ef_construction: config.hnsw_ef_construction,
            ef_search: config.hnsw_ef_search,
        };
        let mut index = VectorIndex::new(
            config.vector_dim,
            chunks.len(),
            params,
            store.fingerprint(),
        )?;

        info!(
            "Embedding {} chunks with {} (batch size {})",
            chunks.len(),
            self.provider.model_name(),
            self.batch_size
        );

        for batch in chunks.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|chunk| chunk.indexed_text()).collect();
            let embeddings = self.provider.embed_batch(&texts)?;

            if embeddings.len() != batch.len() {
                return Err(EmbeddingError::GenerationError(format!(
                    "Embedding count mismatch: expected {}, got {}",
                    batch.len(),
                    embeddings.len()
                ))
                .into());
            }

            for (chunk, embedding) in batch.iter().zip(embeddings.iter()) {
                index.insert(&chunk.external_id, embedding)?;
            }
            debug!("Indexed batch of {} chunks", batch.len());
        }

        let report = BuildReport {
            indexed: index.len(),
            skipped: empty.len(),
            duration_ms: start.elapsed().as_millis() as u64,
        };
        info!(
            "Dense index ready: {} indexed, {} skipped, {}ms",
            report.indexed, report.skipped, report.duration_ms
        );

        Ok((index, report))
    }

    /// Build the lexical engine selected by `retrieval.lexical_backend`
    pub fn build_lexical(
        store: &ChunkStore,
        config: &Config,
    ) -> Result<Arc<dyn LexicalEngine>, IndexBuildError> {
        match config.retrieval.lexical_backend.as_str() {
            "bm25" => Ok(Arc::new(Bm25Index::build(store, config.bm25))),
            "tantivy" => {
                let path = config
                    .indexing
                    .data_dir
                    .join("keyword")
                    .join(store.fingerprint().to_hex());
                Ok(Arc::new(KeywordIndex::open_or_build(path, store)?))
            }
            other => Err(IndexBuildError::UnknownBackend(other.to_string())),
        }
    }
}
