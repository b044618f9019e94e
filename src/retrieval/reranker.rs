//! Cross-encoder reranking using FastEmbed

use crate::corpus::ChunkId;
use fastembed::{RerankInitOptions, RerankerModel, TextRerank};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Default cross-encoder model
pub const DEFAULT_RERANKER_MODEL: &str = "BAAI/bge-reranker-v2-m3";

#[derive(Error, Debug)]
pub enum RerankError {
    #[error("Reranker initialization failed: {0}")]
    InitializationError(String),

    #[error("Reranker backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Scores (query, text) pairs jointly
pub trait CrossEncoder: Send + Sync {
    /// Return one relevance logit per text, in input order
    fn score(&self, query: &str, texts: &[&str]) -> Result<Vec<f32>, RerankError>;

    fn model_name(&self) -> &str;
}

/// FastEmbed-backed cross-encoder
pub struct FastEmbedCrossEncoder {
    model: Arc<TextRerank>,
    model_name: String,
    batch_size: usize,
}

impl FastEmbedCrossEncoder {
    /// Create a new cross-encoder
    ///
    /// # Arguments
    /// * `model_name` - Model name (e.g., "BAAI/bge-reranker-v2-m3")
    /// * `max_length` - Token limit per (query, text) pair; longer pairs are truncated
    /// * `batch_size` - Pairs per inference batch
    pub fn new(
        model_name: &str,
        max_length: usize,
        batch_size: usize,
    ) -> Result<Self, RerankError> {
        let reranker_model = match model_name {
            "BAAI/bge-reranker-base" | "bge-reranker-base" => RerankerModel::BGERerankerBase,
            "BAAI/bge-reranker-v2-m3" | "bge-reranker-v2-m3" => RerankerModel::BGERerankerV2M3,
            "jinaai/jina-reranker-v1-turbo-en" => RerankerModel::JINARerankerV1TurboEn,
            "jinaai/jina-reranker-v2-base-multilingual" => {
                RerankerModel::JINARerankerV2BaseMultiligual
            }
            _ => {
                return Err(RerankError::InitializationError(format!(
                    "Unsupported model: {}. Supported: BAAI/bge-reranker-base, BAAI/bge-reranker-v2-m3, \
                     jinaai/jina-reranker-v1-turbo-en, jinaai/jina-reranker-v2-base-multilingual",
                    model_name
                )));
            }
        };

        tracing::info!(
            "Initializing reranker model: {} (max length {})",
            model_name,
            max_length
        );

        let init_options = RerankInitOptions::new(reranker_model)
            .with_max_length(max_length)
            .with_show_download_progress(true);

        let model = TextRerank::try_new(init_options)
            .map_err(|e| RerankError::InitializationError(e.to_string()))?;

        Ok(Self {
            model: Arc::new(model),
            model_name: model_name.to_string(),
            batch_size: batch_size.max(1),
        })
    }

    /// Create cross-encoder with default model
    pub fn with_default_model() -> Result<Self, RerankError> {
        Self::new(DEFAULT_RERANKER_MODEL, 512, 16)
    }
}

impl CrossEncoder for FastEmbedCrossEncoder {
    fn score(&self, query: &str, texts: &[&str]) -> Result<Vec<f32>, RerankError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let results = self
            .model
            .rerank(query, texts.to_vec(), false, Some(self.batch_size))
            .map_err(|e| RerankError::BackendUnavailable(e.to_string()))?;

        // FastEmbed returns results sorted by score; put them back in input order.
        // Slots the model did not fill stay NaN and are dropped by the reranker.
        let mut scores = vec![f32::NAN; texts.len()];
        for result in results {
            if let Some(slot) = scores.get_mut(result.index) {
                *slot = result.score;
            }
        }

        Ok(scores)
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

/// A fused candidate resolved to its text
#[derive(Debug, Clone)]
pub struct RerankCandidate {
    pub id: ChunkId,
    pub external_id: String,
    pub text: String,
    pub fusion_score: f32,
}

/// Final result of a search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RerankedResult {
    pub id: ChunkId,
    pub external_id: String,
    pub text: String,
    /// Cross-encoder relevance score (fusion score when reranking fell back)
    pub score: f32,
    pub fusion_score: f32,
}

impl RerankedResult {
    /// Result carrying the fusion score, used when reranking is skipped
    pub fn from_fusion(candidate: RerankCandidate) -> Self {
        Self {
            id: candidate.id,
            external_id: candidate.external_id,
            text: candidate.text,
            score: candidate.fusion_score,
            fusion_score: candidate.fusion_score,
        }
    }
}

/// Second-stage ranking over the fused shortlist
pub struct Reranker {
    encoder: Arc<dyn CrossEncoder>,
    batch_size: usize,
    max_input_tokens: usize,
}

impl Reranker {
    pub fn new(encoder: Arc<dyn CrossEncoder>, batch_size: usize, max_input_tokens: usize) -> Self {
        Self {
            encoder,
            batch_size: batch_size.max(1),
            max_input_tokens: max_input_tokens.max(1),
        }
    }

    pub fn model_name(&self) -> &str {
        self.encoder.model_name()
    }

    /// Rerank candidates given a query
    ///
    /// Empty texts and pairs the model could not score are logged and left
    /// out. A failing scoring call fails the whole rerank.
    ///
    /// # Returns
    /// At most `k` results sorted by rerank score descending; equal scores
    /// keep the fusion order.
    pub fn rerank(
        &self,
        query: &str,
        candidates: Vec<RerankCandidate>,
        k: usize,
    ) -> Result<Vec<RerankedResult>, RerankError> {
        if candidates.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        if query.trim().is_empty() {
            return Err(RerankError::InvalidInput(
                "Query cannot be empty".to_string(),
            ));
        }

        let (valid, malformed): (Vec<_>, Vec<_>) = candidates
            .into_iter()
            .partition(|c| !c.text.trim().is_empty());
        for candidate in &malformed {
            tracing::warn!("Skipping rerank of chunk {}: empty text", candidate.id);
        }

        let inputs: Vec<&str> = valid
            .iter()
            .map(|c| truncate_words(&c.text, self.max_input_tokens))
            .collect();

        let mut scores = Vec::with_capacity(inputs.len());
        for batch in inputs.chunks(self.batch_size) {
            let batch_scores = self.encoder.score(query, batch).map_err(|e| match e {
                RerankError::BackendUnavailable(msg) => RerankError::BackendUnavailable(msg),
                other => RerankError::BackendUnavailable(other.to_string()),
            })?;

            if batch_scores.len() != batch.len() {
                return Err(RerankError::BackendUnavailable(format!(
                    "{} returned {} scores for {} pairs",
                    self.encoder.model_name(),
                    batch_scores.len(),
                    batch.len()
                )));
            }
            scores.extend(batch_scores);
        }

        let mut ranked: Vec<RerankedResult> = valid
            .into_iter()
            .zip(scores)
            .filter_map(|(candidate, score)| {
                if !score.is_finite() {
                    tracing::warn!(
                        "Skipping chunk {}: reranker produced no usable score",
                        candidate.id
                    );
                    return None;
                }
                Some(RerankedResult {
                    id: candidate.id,
                    external_id: candidate.external_id,
                    text: candidate.text,
                    score,
                    fusion_score: candidate.fusion_score,
                })
            })
            .collect();

        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
        ranked.truncate(k);

        Ok(ranked)
    }
}

/// Keep at most `max_words` whitespace-separated words
fn truncate_words(text: &str, max_words: usize) -> &str {
    let mut count = 0;
    let mut in_word = false;

    for (idx, ch) in text.char_indices() {
        if ch.is_whitespace() {
            in_word = false;
        } else if !in_word {
            if count == max_words {
                return text[..idx].trim_end();
            }
            count += 1;
            in_word = true;
        }
    }

    text
}
