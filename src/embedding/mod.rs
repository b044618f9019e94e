mod batch;
mod bm25;
mod keyword_index;
/// Embedding & Indexing
///
/// Engines the retrieval core queries, built from a chunk store:
/// - EmbeddingProvider trait with a FastEmbed implementation
/// - Bm25Index (in-memory) or KeywordIndex (tantivy) for lexical scoring
/// - VectorIndex (HNSW) for dense similarity
/// - IndexBuilder to embed chunks in batches
mod provider;
mod vector_index;

pub use batch::{BuildReport, IndexBuildError, IndexBuilder};
pub use bm25::Bm25Index;
pub use keyword_index::{KeywordIndex, KeywordIndexError};
pub use provider::{
    supported_model, EmbeddingError, EmbeddingProvider, FastEmbedProvider,
    DEFAULT_EMBEDDING_MODEL,
};
pub use vector_index::{HnswParams, VectorIndex, VectorIndexError};
