/// Tantivy keyword index for full-text search
use crate::corpus::{ChunkStore, CorpusFingerprint};
use crate::retrieval::{EngineError, LexicalEngine};
use std::path::{Path, PathBuf};
use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::*;
use tantivy::{doc, Index, IndexReader, ReloadPolicy, TantivyError};
use thiserror::Error;

/// File next to the tantivy segments recording which corpus was indexed
const FINGERPRINT_FILE: &str = "corpus.fingerprint";

/// Writer heap budget
const WRITER_HEAP_BYTES: usize = 50_000_000;

#[derive(Error, Debug)]
pub enum KeywordIndexError {
    #[error("Index initialization failed: {0}")]
    InitializationError(String),

    #[error("Insert failed: {0}")]
    InsertError(String),

    #[error("Search failed: {0}")]
    SearchError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Tantivy error: {0}")]
    TantivyError(#[from] TantivyError),

    #[error("Query parsing error: {0}")]
    QueryParseError(String),
}

/// Tantivy keyword index over a chunk store
///
/// Each document stores the chunk ordinal, so scores come back aligned to the
/// store. The index directory is reused when its recorded fingerprint matches
/// the store and rebuilt otherwise.
pub struct KeywordIndex {
    index: Index,
    reader: IndexReader,
    id_field: Field,
    text_field: Field,
    doc_count: usize,
    fingerprint: CorpusFingerprint,
    index_path: PathBuf,
}

impl KeywordIndex {
    /// Open the index at `index_path`, rebuilding it if it was built from another corpus
    pub fn open_or_build(index_path: PathBuf, store: &ChunkStore) -> Result<Self, KeywordIndexError> {
        let expected = store.fingerprint();
        if index_path.join("meta.json").exists() {
            match Self::read_fingerprint(&index_path) {
                Some(found) if found == expected => {
                    let index = Self::open(index_path, expected)?;
                    if index.doc_count == store.len() {
                        tracing::debug!("Reusing keyword index at {:?}", index.index_path);
                        return Ok(index);
                    }
                    tracing::info!("Keyword index at {:?} is incomplete, rebuilding", index.index_path);
                    return Self::build(index.index_path, store);
                }
                _ => tracing::info!("Keyword index at {:?} is stale, rebuilding", index_path),
            }
        }
        Self::build(index_path, store)
    }

    /// Index every chunk of `store`, replacing any previous contents
    pub fn build(index_path: PathBuf, store: &ChunkStore) -> Result<Self, KeywordIndexError> {
        std::fs::create_dir_all(&index_path)?;

        let index = if index_path.join("meta.json").exists() {
            Index::open_in_dir(&index_path)
                .map_err(|e| KeywordIndexError::InitializationError(e.to_string()))?
        } else {
            let mut schema_builder = Schema::builder();
            schema_builder.add_u64_field("id", INDEXED | STORED);
            schema_builder.add_text_field("text", TEXT);
            Index::create_in_dir(&index_path, schema_builder.build())
                .map_err(|e| KeywordIndexError::InitializationError(e.to_string()))?
        };
        let (id_field, text_field) = Self::fields(&index.schema())?;

        let mut writer = index
            .writer(WRITER_HEAP_BYTES)
            .map_err(|e| KeywordIndexError::InitializationError(e.to_string()))?;
        writer
            .delete_all_documents()
            .map_err(|e| KeywordIndexError::InsertError(e.to_string()))?;

        for chunk in store.iter() {
            writer
                .add_document(doc!(
                    id_field => chunk.id.index() as u64,
                    text_field => chunk.indexed_text(),
                ))
                .map_err(|e| KeywordIndexError::InsertError(e.to_string()))?;
        }
        writer
            .commit()
            .map_err(|e| KeywordIndexError::InsertError(e.to_string()))?;

        std::fs::write(
            index_path.join(FINGERPRINT_FILE),
            store.fingerprint().to_hex(),
        )?;

        tracing::info!(
            "Built keyword index with {} chunks at {:?}",
            store.len(),
            index_path
        );

        let reader = Self::reader(&index)?;
        Ok(Self {
            index,
            reader,
            id_field,
            text_field,
            doc_count: store.len(),
            fingerprint: store.fingerprint(),
            index_path,
        })
    }

    fn open(index_path: PathBuf, fingerprint: CorpusFingerprint) -> Result<Self, KeywordIndexError> {
        let index = Index::open_in_dir(&index_path)
            .map_err(|e| KeywordIndexError::InitializationError(e.to_string()))?;
        let (id_field, text_field) = Self::fields(&index.schema())?;
        let reader = Self::reader(&index)?;
        let doc_count = reader.searcher().num_docs() as usize;

        Ok(Self {
            index,
            reader,
            id_field,
            text_field,
            doc_count,
            fingerprint,
            index_path,
        })
    }

    fn fields(schema: &Schema) -> Result<(Field, Field), KeywordIndexError> {
        let id_field = schema.get_field("id").map_err(|_| {
            KeywordIndexError::InitializationError("Missing 'id' field in schema".to_string())
        })?;
        let text_field = schema.get_field("text").map_err(|_| {
            KeywordIndexError::InitializationError("Missing 'text' field in schema".to_string())
        })?;
        Ok((id_field, text_field))
    }

    fn reader(index: &Index) -> Result<IndexReader, KeywordIndexError> {
        let reader: IndexReader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .map_err(|e| KeywordIndexError::InitializationError(e.to_string()))?;
        reader
            .reload()
            .map_err(|e| KeywordIndexError::InitializationError(e.to_string()))?;
        Ok(reader)
    }

    fn read_fingerprint(index_path: &Path) -> Option<CorpusFingerprint> {
        let hex = std::fs::read_to_string(index_path.join(FINGERPRINT_FILE)).ok()?;
        CorpusFingerprint::from_hex(hex.trim())
    }

    /// Score every chunk against the query tokens (BM25, tantivy flavour)
    ///
    /// Chunks with no matching term score 0.
    pub fn score_tokens(&self, tokens: &[String]) -> Result<Vec<f32>, KeywordIndexError> {
        let mut scores = vec![0.0; self.doc_count];
        if tokens.is_empty() || self.doc_count == 0 {
            return Ok(scores);
        }

        let searcher = self.reader.searcher();
        let query_parser = QueryParser::for_index(&self.index, vec![self.text_field]);
        let query = query_parser
            .parse_query(&tokens.join(" "))
            .map_err(|e| KeywordIndexError::QueryParseError(e.to_string()))?;

        let top_docs = searcher
            .search(&query, &TopDocs::with_limit(self.doc_count))
            .map_err(|e| KeywordIndexError::SearchError(e.to_string()))?;

        for (score, doc_address) in top_docs {
            let retrieved_doc: TantivyDocument = searcher
                .doc(doc_address)
                .map_err(|e| KeywordIndexError::SearchError(e.to_string()))?;

            let ordinal = retrieved_doc
                .get_first(self.id_field)
                .and_then(|v| v.as_u64())
                .ok_or_else(|| {
                    KeywordIndexError::SearchError("Missing or invalid ID field".to_string())
                })? as usize;

            match scores.get_mut(ordinal) {
                Some(slot) => *slot = score,
                None => {
                    return Err(KeywordIndexError::SearchError(format!(
                        "Document ordinal {} outside corpus of {}",
                        ordinal, self.doc_count
                    )))
                }
            }
        }

        Ok(scores)
    }

    /// Get the number of documents in the index
    pub fn len(&self) -> usize {
        self.doc_count
    }

    /// Check if index is empty
    pub fn is_empty(&self) -> bool {
        self.doc_count == 0
    }

    pub fn path(&self) -> &Path {
        &self.index_path
    }
}

impl LexicalEngine for KeywordIndex {
    fn score(&self, tokens: &[String]) -> Result<Vec<f32>, EngineError> {
        Ok(self.score_tokens(tokens)?)
    }

    fn corpus_fingerprint(&self) -> CorpusFingerprint {
        self.fingerprint
    }
}
