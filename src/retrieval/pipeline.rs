//! Query pipeline: retrieve, fuse, rerank
//!
//! Each stage takes the query context and hands back an enriched one, so a
//! normalizer, merger or reranker can be swapped without touching the others.

use super::engines::{select_top_k, DenseEngine, EngineError, LexicalEngine};
use super::fusion::{
    FusedResultSet, FusionConfig, FusionMerger, RetrievalResultSet, RetrievalSource,
};
use super::hybrid::{SearchError, SearchStage};
use super::reranker::{RerankCandidate, RerankError, RerankedResult, Reranker};
use super::tokenizer::tokenize;
use crate::corpus::{ChunkStore, IdentifierMap};
use crate::embedding::EmbeddingProvider;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

/// State of one query as it moves through the pipeline
#[derive(Debug, Clone)]
pub struct QueryContext {
    /// Correlates log lines of one search
    pub query_id: Uuid,
    pub text: String,
    pub k: usize,
    pub alpha: f32,
    pub reranker_cutoff: usize,
    pub sparse: RetrievalResultSet,
    pub dense: RetrievalResultSet,
    pub fused: FusedResultSet,
    pub results: Vec<RerankedResult>,
}

impl QueryContext {
    pub fn new(text: impl Into<String>, k: usize, alpha: f32, reranker_cutoff: usize) -> Self {
        Self {
            query_id: Uuid::new_v4(),
            text: text.into(),
            k,
            alpha,
            reranker_cutoff,
            sparse: RetrievalResultSet::empty(RetrievalSource::Sparse),
            dense: RetrievalResultSet::empty(RetrievalSource::Dense),
            fused: FusedResultSet::default(),
            results: Vec::new(),
        }
    }
}

/// One step of the query pipeline
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    async fn process(&self, ctx: QueryContext) -> Result<QueryContext, SearchError>;
}

/// Ordered list of stages
#[derive(Default)]
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stage(mut self, stage: impl Stage + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub async fn run(&self, mut ctx: QueryContext) -> Result<QueryContext, SearchError> {
        for stage in &self.stages {
            let start = Instant::now();
            ctx = stage.process(ctx).await?;
            debug!(
                "[{}] {} stage done in {}ms",
                ctx.query_id,
                stage.name(),
                start.elapsed().as_millis()
            );
        }
        Ok(ctx)
    }
}

/// Per-call time limits; `None` means unbounded
#[derive(Debug, Clone, Copy, Default)]
pub struct StageTimeouts {
    pub sparse: Option<Duration>,
    pub dense: Option<Duration>,
    pub rerank: Option<Duration>,
}

enum CallFailure {
    TimedOut(Duration),
    Aborted(String),
}

impl fmt::Display for CallFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TimedOut(limit) => write!(f, "timed out after {}ms", limit.as_millis()),
            Self::Aborted(reason) => write!(f, "task aborted: {}", reason),
        }
    }
}

/// Run a blocking call on the blocking pool, bounded by `limit`
///
/// A timed-out call keeps running in the background; its result is dropped.
async fn run_blocking<T, F>(limit: Option<Duration>, f: F) -> Result<T, CallFailure>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let handle = tokio::task::spawn_blocking(f);
    let joined = match limit {
        Some(limit) => tokio::time::timeout(limit, handle)
            .await
            .map_err(|_| CallFailure::TimedOut(limit))?,
        None => handle.await,
    };
    joined.map_err(|e| CallFailure::Aborted(e.to_string()))
}

/// Queries the lexical and dense engines concurrently
pub struct RetrieveStage {
    store: Arc<ChunkStore>,
    ids: Arc<IdentifierMap>,
    lexical: Arc<dyn LexicalEngine>,
    dense: Arc<dyn DenseEngine>,
    embedder: Arc<dyn EmbeddingProvider>,
    timeouts: StageTimeouts,
    degrade_to_single_source: bool,
}

impl RetrieveStage {
    pub fn new(
        store: Arc<ChunkStore>,
        lexical: Arc<dyn LexicalEngine>,
        dense: Arc<dyn DenseEngine>,
        embedder: Arc<dyn EmbeddingProvider>,
        timeouts: StageTimeouts,
        degrade_to_single_source: bool,
    ) -> Self {
        let ids = Arc::new(IdentifierMap::from_store(&store));
        Self {
            store,
            ids,
            lexical,
            dense,
            embedder,
            timeouts,
            degrade_to_single_source,
        }
    }

    async fn sparse_search(
        &self,
        tokens: Vec<String>,
        cutoff: usize,
    ) -> Result<RetrievalResultSet, SearchError> {
        let engine = Arc::clone(&self.lexical);
        let scores = run_blocking(self.timeouts.sparse, move || engine.score(&tokens))
            .await
            .map_err(|f| SearchError::engine(SearchStage::Sparse, f))?
            .map_err(|e| SearchError::engine(SearchStage::Sparse, e))?;

        if scores.len() != self.store.len() {
            return Err(SearchError::engine(
                SearchStage::Sparse,
                format!(
                    "returned {} scores for a corpus of {} chunks",
                    scores.len(),
                    self.store.len()
                ),
            ));
        }

        Ok(RetrievalResultSet::new(
            RetrievalSource::Sparse,
            select_top_k(&scores, cutoff),
        ))
    }

    async fn dense_search(
        &self,
        text: String,
        cutoff: usize,
    ) -> Result<RetrievalResultSet, SearchError> {
        let embedder = Arc::clone(&self.embedder);
        let engine = Arc::clone(&self.dense);
        let matches = run_blocking(self.timeouts.dense, move || {
            let vector = embedder.embed(&text)?;
            engine.query(&vector, cutoff)
        })
        .await
        .map_err(|f| SearchError::engine(SearchStage::Dense, f))?
        .map_err(|e: EngineError| SearchError::engine(SearchStage::Dense, e))?;

        let mut hits = Vec::with_capacity(matches.len().min(cutoff));
        for m in matches.into_iter().take(cutoff) {
            let id = self
                .ids
                .resolve(&m.external_id)
                .ok_or_else(|| SearchError::UnknownIdentifier {
                    stage: SearchStage::Dense,
                    external_id: m.external_id.clone(),
                })?;
            hits.push((id, m.score));
        }

        Ok(RetrievalResultSet::new(RetrievalSource::Dense, hits))
    }

    fn degrade(
        &self,
        ctx: &QueryContext,
        error: SearchError,
        source: RetrievalSource,
    ) -> Result<RetrievalResultSet, SearchError> {
        if self.degrade_to_single_source && matches!(error, SearchError::EngineUnavailable { .. })
        {
            warn!(
                "[{}] {}; continuing without {} results",
                ctx.query_id, error, source
            );
            Ok(RetrievalResultSet::empty(source))
        } else {
            Err(error)
        }
    }
}

#[async_trait]
impl Stage for RetrieveStage {
    fn name(&self) -> &'static str {
        "retrieve"
    }

    async fn process(&self, mut ctx: QueryContext) -> Result<QueryContext, SearchError> {
        let tokens = tokenize(&ctx.text);
        let (sparse, dense) = tokio::join!(
            self.sparse_search(tokens, ctx.reranker_cutoff),
            self.dense_search(ctx.text.clone(), ctx.reranker_cutoff)
        );

        let (sparse, dense) = match (sparse, dense) {
            (Ok(sparse), Ok(dense)) => (sparse, dense),
            (Err(e), Ok(dense)) => (self.degrade(&ctx, e, RetrievalSource::Sparse)?, dense),
            (Ok(sparse), Err(e)) => (sparse, self.degrade(&ctx, e, RetrievalSource::Dense)?),
            // Both sources gone: nothing left to fuse
            (Err(e), Err(_)) => return Err(e),
        };

        debug!(
            "[{}] retrieved {} sparse and {} dense hits",
            ctx.query_id,
            sparse.len(),
            dense.len()
        );

        ctx.sparse = sparse;
        ctx.dense = dense;
        Ok(ctx)
    }
}

/// Normalizes and merges the two result sets
pub struct FuseStage {
    merger: FusionMerger,
}

impl FuseStage {
    pub fn new(merger: FusionMerger) -> Self {
        Self { merger }
    }
}

#[async_trait]
impl Stage for FuseStage {
    fn name(&self) -> &'static str {
        "fuse"
    }

    async fn process(&self, mut ctx: QueryContext) -> Result<QueryContext, SearchError> {
        let config = FusionConfig::new(ctx.alpha, ctx.reranker_cutoff).map_err(|e| {
            SearchError::InvalidParameters {
                stage: SearchStage::Fuse,
                message: e.to_string(),
            }
        })?;

        ctx.fused = self.merger.fuse(&ctx.sparse, &ctx.dense, &config);
        debug!(
            "[{}] {} fused candidates (alpha {})",
            ctx.query_id,
            ctx.fused.len(),
            ctx.alpha
        );
        Ok(ctx)
    }
}

/// Scores the fused shortlist with the cross-encoder
pub struct RerankStage {
    store: Arc<ChunkStore>,
    reranker: Arc<Reranker>,
    timeout: Option<Duration>,
    fallback_to_fusion: bool,
}

impl RerankStage {
    pub fn new(
        store: Arc<ChunkStore>,
        reranker: Arc<Reranker>,
        timeout: Option<Duration>,
        fallback_to_fusion: bool,
    ) -> Self {
        Self {
            store,
            reranker,
            timeout,
            fallback_to_fusion,
        }
    }

    fn candidates(&self, fused: &FusedResultSet) -> Result<Vec<RerankCandidate>, SearchError> {
        fused
            .candidates()
            .iter()
            .map(|candidate| {
                let chunk =
                    self.store
                        .get(candidate.id)
                        .ok_or_else(|| SearchError::UnknownIdentifier {
                            stage: SearchStage::Rerank,
                            external_id: candidate.id.to_string(),
                        })?;
                Ok(RerankCandidate {
                    id: chunk.id,
                    external_id: chunk.external_id.clone(),
                    text: chunk.indexed_text(),
                    fusion_score: candidate.fused_score,
                })
            })
            .collect()
    }
}

#[async_trait]
impl Stage for RerankStage {
    fn name(&self) -> &'static str {
        "rerank"
    }

    async fn process(&self, mut ctx: QueryContext) -> Result<QueryContext, SearchError> {
        let candidates = self.candidates(&ctx.fused)?;
        if candidates.is_empty() {
            debug!("[{}] no candidates to rerank", ctx.query_id);
            ctx.results = Vec::new();
            return Ok(ctx);
        }

        let reranker = Arc::clone(&self.reranker);
        let query = ctx.text.clone();
        let k = ctx.k;
        let shortlist = candidates.clone();
        let outcome = run_blocking(self.timeout, move || reranker.rerank(&query, shortlist, k))
            .await
            .map_err(|f| RerankError::BackendUnavailable(f.to_string()))
            .and_then(|result| result);

        ctx.results = match outcome {
            Ok(results) => results,
            Err(RerankError::InvalidInput(msg)) => return Err(SearchError::InvalidQuery(msg)),
            Err(e) if self.fallback_to_fusion => {
                warn!(
                    "[{}] {}; falling back to fusion ranking",
                    ctx.query_id, e
                );
                candidates
                    .into_iter()
                    .take(ctx.k)
                    .map(RerankedResult::from_fusion)
                    .collect()
            }
            Err(e) => return Err(SearchError::RerankBackendUnavailable(e.to_string())),
        };

        Ok(ctx)
    }
}
