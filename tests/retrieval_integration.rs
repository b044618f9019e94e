use fusion_rank::corpus::{ChunkId, ChunkStore, CorpusFingerprint};
use fusion_rank::embedding::{EmbeddingError, EmbeddingProvider};
use fusion_rank::retrieval::{
    CrossEncoder, DenseEngine, DenseMatch, EngineError, FuseStage, FusionMerger, HybridSearcher,
    LexicalEngine, Pipeline, QueryContext, RerankError, RetrieveStage, SearchBackends,
    SearchError, SearchQuery, SearchSettings, SearchStage, StageTimeouts,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Returns a fixed, corpus-aligned score vector
struct FixedLexical {
    scores: Vec<f32>,
    fingerprint: CorpusFingerprint,
}

impl LexicalEngine for FixedLexical {
    fn score(&self, _tokens: &[String]) -> Result<Vec<f32>, EngineError> {
        Ok(self.scores.clone())
    }

    fn corpus_fingerprint(&self) -> CorpusFingerprint {
        self.fingerprint
    }
}

/// Returns fixed matches, optionally after a delay or with an error
struct FixedDense {
    matches: Vec<(&'static str, f32)>,
    delay: Option<Duration>,
    fail: bool,
    fingerprint: CorpusFingerprint,
}

impl FixedDense {
    fn new(store: &ChunkStore, matches: Vec<(&'static str, f32)>) -> Self {
        Self {
            matches,
            delay: None,
            fail: false,
            fingerprint: store.fingerprint(),
        }
    }
}

impl DenseEngine for FixedDense {
    fn query(&self, _vector: &[f32], top_k: usize) -> Result<Vec<DenseMatch>, EngineError> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if self.fail {
            return Err(EngineError::Backend("vector store unreachable".to_string()));
        }
        Ok(self
            .matches
            .iter()
            .take(top_k)
            .map(|(id, score)| DenseMatch {
                external_id: id.to_string(),
                score: *score,
            })
            .collect())
    }

    fn corpus_fingerprint(&self) -> CorpusFingerprint {
        self.fingerprint
    }
}

struct StubEmbedder;

impl EmbeddingProvider for StubEmbedder {
    fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(vec![1.0; 4])
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|_| vec![1.0; 4]).collect())
    }

    fn dimension(&self) -> usize {
        4
    }

    fn model_name(&self) -> &str {
        "stub"
    }
}

/// Gives every pair the same score, so the fusion order survives reranking
struct ConstantEncoder;

impl CrossEncoder for ConstantEncoder {
    fn score(&self, _query: &str, texts: &[&str]) -> Result<Vec<f32>, RerankError> {
        Ok(vec![1.0; texts.len()])
    }

    fn model_name(&self) -> &str {
        "constant"
    }
}

/// Scores by the number of query words present in the text
struct OverlapEncoder;

impl CrossEncoder for OverlapEncoder {
    fn score(&self, query: &str, texts: &[&str]) -> Result<Vec<f32>, RerankError> {
        let query_words: HashSet<String> =
            query.split_whitespace().map(|w| w.to_lowercase()).collect();
        Ok(texts
            .iter()
            .map(|text| {
                text.split_whitespace()
                    .filter(|w| query_words.contains(&w.to_lowercase()))
                    .count() as f32
            })
            .collect())
    }

    fn model_name(&self) -> &str {
        "overlap"
    }
}

struct FailingEncoder;

impl CrossEncoder for FailingEncoder {
    fn score(&self, _query: &str, _texts: &[&str]) -> Result<Vec<f32>, RerankError> {
        Err(RerankError::BackendUnavailable("model offline".to_string()))
    }

    fn model_name(&self) -> &str {
        "failing"
    }
}

/// Returns its scores only after a delay
struct SlowLexical {
    scores: Vec<f32>,
    delay: Duration,
    fingerprint: CorpusFingerprint,
}

impl LexicalEngine for SlowLexical {
    fn score(&self, _tokens: &[String]) -> Result<Vec<f32>, EngineError> {
        std::thread::sleep(self.delay);
        Ok(self.scores.clone())
    }

    fn corpus_fingerprint(&self) -> CorpusFingerprint {
        self.fingerprint
    }
}

/// Returns its scores only after a delay
struct SlowEncoder {
    delay: Duration,
}

impl CrossEncoder for SlowEncoder {
    fn score(&self, _query: &str, texts: &[&str]) -> Result<Vec<f32>, RerankError> {
        std::thread::sleep(self.delay);
        Ok((0..texts.len()).map(|i| i as f32).collect())
    }

    fn model_name(&self) -> &str {
        "slow"
    }
}

fn corpus(n: usize) -> Arc<ChunkStore> {
    Arc::new(ChunkStore::from_texts(
        (0..n).map(|i| format!("chunk number {}", i)),
    ))
}

fn backends(
    store: &Arc<ChunkStore>,
    lexical_scores: Vec<f32>,
    dense: FixedDense,
    encoder: Arc<dyn CrossEncoder>,
) -> SearchBackends {
    SearchBackends {
        store: Arc::clone(store),
        lexical: Arc::new(FixedLexical {
            scores: lexical_scores,
            fingerprint: store.fingerprint(),
        }),
        dense: Arc::new(dense),
        embedder: Arc::new(StubEmbedder),
        cross_encoder: encoder,
    }
}

fn settings(alpha: f32) -> SearchSettings {
    SearchSettings {
        alpha,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_fused_candidates_from_both_sources() {
    let store = corpus(4);
    let dense = FixedDense::new(&store, vec![("2", 0.9), ("3", 0.8)]);

    let pipeline = Pipeline::new()
        .with_stage(RetrieveStage::new(
            Arc::clone(&store),
            Arc::new(FixedLexical {
                scores: vec![0.0, 5.0, 3.0, 0.0],
                fingerprint: store.fingerprint(),
            }),
            Arc::new(dense),
            Arc::new(StubEmbedder),
            StageTimeouts::default(),
            false,
        ))
        .with_stage(FuseStage::new(FusionMerger::default()));
    assert_eq!(pipeline.stage_names(), vec!["retrieve", "fuse"]);

    let ctx = pipeline
        .run(QueryContext::new("which chunk", 5, 0.5, 20))
        .await
        .unwrap();

    assert_eq!(ctx.sparse.len(), 2);
    assert_eq!(ctx.dense.len(), 2);
    assert_eq!(ctx.fused.ids(), vec![ChunkId(1), ChunkId(2), ChunkId(3)]);

    let both = ctx.fused.get(ChunkId(2)).unwrap();
    assert_eq!(both.source_count, 2);
    assert!(both.sparse.is_some() && both.dense.is_some());
    // id 2 beats the dense-only chunk that normalized to the bottom
    let dense_only = ctx.fused.get(ChunkId(3)).unwrap();
    assert!(both.fused_score > dense_only.fused_score);
}

#[tokio::test]
async fn test_end_to_end_keeps_fusion_order_on_rerank_ties() {
    let store = corpus(4);
    let dense = FixedDense::new(&store, vec![("2", 0.9), ("3", 0.8)]);
    let searcher = HybridSearcher::new(
        backends(&store, vec![0.0, 5.0, 3.0, 0.0], dense, Arc::new(ConstantEncoder)),
        settings(0.5),
    )
    .unwrap();

    let results = searcher.search(&SearchQuery::new("which chunk")).await.unwrap();
    let ids: Vec<ChunkId> = results.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![ChunkId(1), ChunkId(2), ChunkId(3)]);

    assert!((results[0].fusion_score - 0.5).abs() < 1e-6);
    assert!((results[1].fusion_score - 0.25).abs() < 1e-6);
    assert!(results[2].fusion_score.abs() < 1e-6);
    assert_eq!(results[1].external_id, "2");
    assert_eq!(results[1].text, "chunk number 2");
}

#[tokio::test]
async fn test_single_dense_hit_gets_degenerate_score() {
    let store = corpus(6);
    let dense = FixedDense::new(&store, vec![("5", 0.99)]);
    let searcher = HybridSearcher::new(
        backends(&store, vec![0.0; 6], dense, Arc::new(ConstantEncoder)),
        settings(0.3),
    )
    .unwrap();

    let results = searcher.search(&SearchQuery::new("anything")).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, ChunkId(5));
    assert!((results[0].fusion_score - 0.7).abs() < 1e-6);
}

#[tokio::test]
async fn test_reranker_overrides_fusion_order() {
    let store = Arc::new(ChunkStore::from_texts(["apple pie recipe", "car engine repair"]));
    // fusion alone prefers the car chunk
    let dense = FixedDense::new(&store, vec![("1", 0.9), ("0", 0.8)]);
    let searcher = HybridSearcher::new(
        backends(&store, vec![0.5, 1.0], dense, Arc::new(OverlapEncoder)),
        settings(0.5),
    )
    .unwrap();

    let results = searcher
        .search(&SearchQuery::new("how to bake a pie"))
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].text, "apple pie recipe");
    assert_eq!(results[1].text, "car engine repair");
    assert!(results[0].fusion_score < results[1].fusion_score);
}

#[tokio::test]
async fn test_dense_failure_fails_search() {
    let store = corpus(3);
    let mut dense = FixedDense::new(&store, vec![("0", 0.9)]);
    dense.fail = true;
    let searcher = HybridSearcher::new(
        backends(&store, vec![1.0, 2.0, 0.0], dense, Arc::new(ConstantEncoder)),
        settings(0.5),
    )
    .unwrap();

    let err = searcher.search(&SearchQuery::new("query")).await.unwrap_err();
    assert!(matches!(
        err,
        SearchError::EngineUnavailable {
            stage: SearchStage::Dense,
            ..
        }
    ));
}

#[tokio::test]
async fn test_degrade_to_sparse_only() {
    let store = corpus(3);
    let mut dense = FixedDense::new(&store, vec![]);
    dense.fail = true;
    let searcher = HybridSearcher::new(
        backends(&store, vec![1.0, 2.0, 0.0], dense, Arc::new(ConstantEncoder)),
        SearchSettings {
            degrade_to_single_source: true,
            ..settings(0.5)
        },
    )
    .unwrap();

    let results = searcher.search(&SearchQuery::new("query")).await.unwrap();
    let ids: Vec<ChunkId> = results.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![ChunkId(1), ChunkId(0)]);
}

#[tokio::test]
async fn test_unknown_dense_identifier_is_fatal() {
    let store = corpus(3);
    let dense = FixedDense::new(&store, vec![("ghost", 0.9)]);
    let searcher = HybridSearcher::new(
        backends(&store, vec![1.0, 0.0, 0.0], dense, Arc::new(ConstantEncoder)),
        SearchSettings {
            degrade_to_single_source: true,
            ..settings(0.5)
        },
    )
    .unwrap();

    let err = searcher.search(&SearchQuery::new("query")).await.unwrap_err();
    match err {
        SearchError::UnknownIdentifier { stage, external_id } => {
            assert_eq!(stage, SearchStage::Dense);
            assert_eq!(external_id, "ghost");
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test]
async fn test_dense_timeout() {
    let store = corpus(3);
    let mut dense = FixedDense::new(&store, vec![("0", 0.9)]);
    dense.delay = Some(Duration::from_millis(400));
    let searcher = HybridSearcher::new(
        backends(&store, vec![1.0, 0.0, 0.0], dense, Arc::new(ConstantEncoder)),
        SearchSettings {
            timeouts: StageTimeouts {
                sparse: None,
                dense: Some(Duration::from_millis(20)),
                rerank: None,
            },
            ..settings(0.5)
        },
    )
    .unwrap();

    let err = searcher.search(&SearchQuery::new("query")).await.unwrap_err();
    assert_eq!(err.stage(), Some(SearchStage::Dense));
    assert!(err.to_string().contains("timed out"));
}

#[tokio::test]
async fn test_sparse_timeout() {
    let store = corpus(3);
    let mut backends = backends(
        &store,
        vec![0.0; 3],
        FixedDense::new(&store, vec![("0", 0.9)]),
        Arc::new(ConstantEncoder),
    );
    backends.lexical = Arc::new(SlowLexical {
        scores: vec![1.0, 0.0, 0.0],
        delay: Duration::from_millis(400),
        fingerprint: store.fingerprint(),
    });
    let searcher = HybridSearcher::new(
        backends,
        SearchSettings {
            timeouts: StageTimeouts {
                sparse: Some(Duration::from_millis(20)),
                dense: None,
                rerank: None,
            },
            ..settings(0.5)
        },
    )
    .unwrap();

    let err = searcher.search(&SearchQuery::new("query")).await.unwrap_err();
    assert_eq!(err.stage(), Some(SearchStage::Sparse));
    assert!(err.to_string().contains("timed out"));
}

#[tokio::test]
async fn test_rerank_timeout_and_fallback() {
    let store = corpus(3);
    let rerank_timeout = StageTimeouts {
        sparse: None,
        dense: None,
        rerank: Some(Duration::from_millis(20)),
    };
    let slow = || {
        backends(
            &store,
            vec![3.0, 1.0, 0.0],
            FixedDense::new(&store, vec![("0", 0.9)]),
            Arc::new(SlowEncoder {
                delay: Duration::from_millis(400),
            }),
        )
    };

    let strict = HybridSearcher::new(
        slow(),
        SearchSettings {
            timeouts: rerank_timeout,
            ..settings(0.5)
        },
    )
    .unwrap();
    let err = strict.search(&SearchQuery::new("query")).await.unwrap_err();
    assert!(matches!(err, SearchError::RerankBackendUnavailable(_)));
    assert!(err.to_string().contains("timed out"));

    let lenient = HybridSearcher::new(
        slow(),
        SearchSettings {
            timeouts: rerank_timeout,
            fallback_to_fusion: true,
            ..settings(0.5)
        },
    )
    .unwrap();
    let results = lenient.search(&SearchQuery::new("query")).await.unwrap();
    let ids: Vec<ChunkId> = results.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![ChunkId(0), ChunkId(1)]);
    assert!(results.iter().all(|r| r.score == r.fusion_score));
}

#[tokio::test]
async fn test_rerank_failure_and_fallback() {
    let store = corpus(3);
    let strict = HybridSearcher::new(
        backends(
            &store,
            vec![3.0, 1.0, 0.0],
            FixedDense::new(&store, vec![("0", 0.9)]),
            Arc::new(FailingEncoder),
        ),
        settings(0.5),
    )
    .unwrap();
    let err = strict.search(&SearchQuery::new("query")).await.unwrap_err();
    assert!(matches!(err, SearchError::RerankBackendUnavailable(_)));

    let lenient = HybridSearcher::new(
        backends(
            &store,
            vec![3.0, 1.0, 0.0],
            FixedDense::new(&store, vec![("0", 0.9)]),
            Arc::new(FailingEncoder),
        ),
        SearchSettings {
            fallback_to_fusion: true,
            ..settings(0.5)
        },
    )
    .unwrap();
    let results = lenient.search(&SearchQuery::new("query")).await.unwrap();
    assert_eq!(results[0].id, ChunkId(0));
    assert!(results.iter().all(|r| r.score == r.fusion_score));
}

#[tokio::test]
async fn test_corpus_mismatch_rejected() {
    let store = corpus(3);
    let other = corpus(4);
    let mut backends = backends(
        &store,
        vec![0.0; 3],
        FixedDense::new(&store, vec![]),
        Arc::new(ConstantEncoder),
    );
    backends.lexical = Arc::new(FixedLexical {
        scores: vec![0.0; 4],
        fingerprint: other.fingerprint(),
    });

    match HybridSearcher::new(backends, settings(0.5)).err() {
        Some(SearchError::CorpusMismatch { stage, expected, .. }) => {
            assert_eq!(stage, SearchStage::Sparse);
            assert_eq!(expected, store.fingerprint());
        }
        _ => panic!("expected corpus mismatch"),
    }
}

#[tokio::test]
async fn test_misaligned_lexical_scores() {
    let store = corpus(3);
    let searcher = HybridSearcher::new(
        backends(
            &store,
            vec![1.0, 2.0],
            FixedDense::new(&store, vec![]),
            Arc::new(ConstantEncoder),
        ),
        settings(0.5),
    )
    .unwrap();

    let err = searcher.search(&SearchQuery::new("query")).await.unwrap_err();
    assert_eq!(err.stage(), Some(SearchStage::Sparse));
}

#[tokio::test]
async fn test_no_hits_is_empty_result() {
    let store = corpus(3);
    let searcher = HybridSearcher::new(
        backends(
            &store,
            vec![0.0; 3],
            FixedDense::new(&store, vec![]),
            Arc::new(ConstantEncoder),
        ),
        settings(0.5),
    )
    .unwrap();

    let results = searcher.search(&SearchQuery::new("nothing")).await.unwrap();
    assert!(results.is_empty());
}

#[tokio::test]
async fn test_invalid_requests() {
    let store = corpus(3);
    let searcher = HybridSearcher::new(
        backends(
            &store,
            vec![1.0, 0.0, 0.0],
            FixedDense::new(&store, vec![]),
            Arc::new(ConstantEncoder),
        ),
        settings(0.5),
    )
    .unwrap();

    let err = searcher.search(&SearchQuery::new("   ")).await.unwrap_err();
    assert!(matches!(err, SearchError::InvalidQuery(_)));
    assert_eq!(err.stage(), None);

    let err = searcher
        .search(&SearchQuery::new("query").with_k(0))
        .await
        .unwrap_err();
    assert_eq!(err.stage(), Some(SearchStage::Rerank));

    let err = searcher
        .search(&SearchQuery::new("query").with_alpha(1.5))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SearchError::InvalidParameters {
            stage: SearchStage::Fuse,
            ..
        }
    ));
}

#[tokio::test]
async fn test_query_overrides_and_truncation() {
    let store = corpus(10);
    let scores: Vec<f32> = (0..10).map(|i| i as f32).collect();
    let searcher = HybridSearcher::new(
        backends(
            &store,
            scores,
            FixedDense::new(&store, vec![]),
            Arc::new(ConstantEncoder),
        ),
        settings(0.5),
    )
    .unwrap();

    let results = searcher
        .search(&SearchQuery::new("query").with_k(2).with_reranker_cutoff(4))
        .await
        .unwrap();
    let ids: Vec<ChunkId> = results.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![ChunkId(9), ChunkId(8)]);
}

#[tokio::test]
async fn test_concurrent_searches() {
    let store = corpus(5);
    let searcher = Arc::new(
        HybridSearcher::new(
            backends(
                &store,
                vec![0.0, 1.0, 2.0, 3.0, 4.0],
                FixedDense::new(&store, vec![("0", 0.9)]),
                Arc::new(ConstantEncoder),
            ),
            settings(0.5),
        )
        .unwrap(),
    );

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let searcher = Arc::clone(&searcher);
            tokio::spawn(async move {
                searcher
                    .search(&SearchQuery::new(format!("query {}", i)))
                    .await
            })
        })
        .collect();

    for handle in handles {
        let results = handle.await.unwrap().unwrap();
        assert_eq!(results.len(), 5);
        assert_eq!(results[0].id, ChunkId(4));
    }
}

#[tokio::test]
#[ignore] // Requires model download - run with: cargo test -- --ignored
async fn test_real_models_end_to_end() {
    use fusion_rank::config::Config;
    use fusion_rank::embedding::{FastEmbedProvider, IndexBuilder};
    use fusion_rank::retrieval::FastEmbedCrossEncoder;

    let store = Arc::new(ChunkStore::from_texts([
        "To bake an apple pie, preheat the oven and roll out the crust.",
        "Replace the car engine oil every 5000 miles.",
        "Datasets can be loaded from the hub with load_dataset.",
    ]));
    let config = Config::default();

    let embedder = Arc::new(FastEmbedProvider::new(&config.embedding.model).unwrap());
    let builder = IndexBuilder::new(embedder.clone(), 8);
    let (vectors, _) = builder
        .build_vector_index(&store, &config.indexing)
        .unwrap();
    let lexical = IndexBuilder::build_lexical(&store, &config).unwrap();
    let encoder = Arc::new(FastEmbedCrossEncoder::with_default_model().unwrap());

    let searcher = HybridSearcher::new(
        SearchBackends {
            store: Arc::clone(&store),
            lexical,
            dense: Arc::new(vectors),
            embedder,
            cross_encoder: encoder,
        },
        SearchSettings::from_config(&config).unwrap(),
    )
    .unwrap();

    let results = searcher
        .search(&SearchQuery::new("how to bake a pie"))
        .await
        .unwrap();
    assert_eq!(results[0].id, ChunkId(0));
}
