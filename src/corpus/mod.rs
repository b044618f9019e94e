//! Chunk store shared by every retrieval engine
//!
//! The store is the single source of truth for chunk ordering. Engines are
//! built from it and report its fingerprint so the searcher can refuse to fuse
//! results from engines that indexed a different corpus.

mod identifiers;

pub use identifiers::IdentifierMap;

use ahash::AHashSet;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{BufRead, BufReader};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CorpusError {
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    #[error("Invalid chunk record on line {line}: {source}")]
    InvalidRecord {
        line: usize,
        source: serde_json::Error,
    },

    #[error("Duplicate external id '{0}'")]
    DuplicateId(String),
}

/// Stable identifier of a chunk: its ordinal position in the [`ChunkStore`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkId(pub usize);

impl ChunkId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// BLAKE3 digest over the ordered external ids and indexed texts of a store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorpusFingerprint([u8; 32]);

impl CorpusFingerprint {
    pub fn to_hex(&self) -> String {
        blake3::Hash::from(self.0).to_hex().to_string()
    }

    pub fn from_hex(hex: &str) -> Option<Self> {
        blake3::Hash::from_hex(hex.trim())
            .ok()
            .map(|h| Self(*h.as_bytes()))
    }
}

impl fmt::Display for CorpusFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form is enough to tell corpora apart in logs
        write!(f, "{}", &self.to_hex()[..16])
    }
}

/// One line of a JSONL corpus file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// External identifier; defaults to the ordinal position
    #[serde(default)]
    pub id: Option<String>,

    /// Chunk text
    pub text: String,

    /// Optional situating context generated upstream
    #[serde(default)]
    pub context: Option<String>,
}

impl ChunkRecord {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: None,
            text: text.into(),
            context: None,
        }
    }
}

/// A chunk in the store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub external_id: String,
    pub text: String,
    pub context: Option<String>,
}

impl Chunk {
    /// Text seen by engines and the reranker: context-prefixed when available
    pub fn indexed_text(&self) -> String {
        match &self.context {
            Some(context) if !context.trim().is_empty() => {
                format!("{} \n\n {}", context, self.text)
            }
            _ => self.text.clone(),
        }
    }
}

/// Ordered, query-time-stable collection of chunks
#[derive(Debug, Clone)]
pub struct ChunkStore {
    chunks: Vec<Chunk>,
    fingerprint: CorpusFingerprint,
}

impl ChunkStore {
    /// Build a store from records, assigning ordinals in input order
    pub fn from_records(records: Vec<ChunkRecord>) -> Result<Self, CorpusError> {
        let mut seen = AHashSet::with_capacity(records.len());
        let mut chunks = Vec::with_capacity(records.len());

        for (ordinal, record) in records.into_iter().enumerate() {
            let external_id = record.id.unwrap_or_else(|| ordinal.to_string());
            if !seen.insert(external_id.clone()) {
                return Err(CorpusError::DuplicateId(external_id));
            }

            chunks.push(Chunk {
                id: ChunkId(ordinal),
                external_id,
                text: record.text,
                context: record.context,
            });
        }

        let fingerprint = Self::compute_fingerprint(&chunks);
        Ok(Self {
            chunks,
            fingerprint,
        })
    }

    /// Build a store from plain texts; external ids are the ordinals
    pub fn from_texts<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let chunks: Vec<Chunk> = texts
            .into_iter()
            .enumerate()
            .map(|(ordinal, text)| Chunk {
                id: ChunkId(ordinal),
                external_id: ordinal.to_string(),
                text: text.into(),
                context: None,
            })
            .collect();

        let fingerprint = Self::compute_fingerprint(&chunks);
        Self {
            chunks,
            fingerprint,
        }
    }

    /// Load a corpus file
    ///
    /// `.jsonl` files hold one [`ChunkRecord`] per line; any other file is read
    /// as one chunk per non-empty line.
    pub fn load(path: &Path) -> Result<Self, CorpusError> {
        let file = std::fs::File::open(path).map_err(|e| CorpusError::Io {
            source: e,
            context: format!("Failed to open corpus file: {:?}", path),
        })?;
        let reader = BufReader::new(file);
        let is_jsonl = path.extension().is_some_and(|ext| ext == "jsonl");

        let mut records = Vec::new();
        for (line_no, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| CorpusError::Io {
                source: e,
                context: format!("Failed to read corpus file: {:?}", path),
            })?;
            if line.trim().is_empty() {
                continue;
            }

            if is_jsonl {
                let record: ChunkRecord =
                    serde_json::from_str(&line).map_err(|e| CorpusError::InvalidRecord {
                        line: line_no + 1,
                        source: e,
                    })?;
                records.push(record);
            } else {
                records.push(ChunkRecord::new(line));
            }
        }

        let store = Self::from_records(records)?;
        tracing::info!(
            "Loaded {} chunks from {:?} (fingerprint {})",
            store.len(),
            path,
            store.fingerprint()
        );
        Ok(store)
    }

    fn compute_fingerprint(chunks: &[Chunk]) -> CorpusFingerprint {
        let mut hasher = blake3::Hasher::new();
        for chunk in chunks {
            hasher.update(chunk.external_id.as_bytes());
            hasher.update(&[0x1f]);
            hasher.update(chunk.indexed_text().as_bytes());
            hasher.update(&[0x1e]);
        }
        CorpusFingerprint(*hasher.finalize().as_bytes())
    }

    pub fn get(&self, id: ChunkId) -> Option<&Chunk> {
        self.chunks.get(id.index())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.iter()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn fingerprint(&self) -> CorpusFingerprint {
        self.fingerprint
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_ordinal_ids() {
        let store = ChunkStore::from_texts(["alpha", "beta", "gamma"]);

        assert_eq!(store.len(), 3);
        let chunk = store.get(ChunkId(1)).unwrap();
        assert_eq!(chunk.external_id, "1");
        assert_eq!(chunk.text, "beta");
        assert!(store.get(ChunkId(3)).is_none());
    }

    #[test]
    fn test_duplicate_external_id_rejected() {
        let mut a = ChunkRecord::new("one");
        a.id = Some("x".to_string());
        let mut b = ChunkRecord::new("two");
        b.id = Some("x".to_string());

        let result = ChunkStore::from_records(vec![a, b]);
        assert!(matches!(result, Err(CorpusError::DuplicateId(id)) if id == "x"));
    }

    #[test]
    fn test_fingerprint_tracks_order_and_content() {
        let a = ChunkStore::from_texts(["alpha", "beta"]);
        let b = ChunkStore::from_texts(["alpha", "beta"]);
        let reordered = ChunkStore::from_texts(["beta", "alpha"]);

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), reordered.fingerprint());

        let hex = a.fingerprint().to_hex();
        assert_eq!(CorpusFingerprint::from_hex(&hex), Some(a.fingerprint()));
    }

    #[test]
    fn test_indexed_text_with_context() {
        let record = ChunkRecord {
            id: None,
            text: "Install with pip.".to_string(),
            context: Some("From the installation guide.".to_string()),
        };
        let store = ChunkStore::from_records(vec![record]).unwrap();
        let chunk = store.get(ChunkId(0)).unwrap();

        assert_eq!(
            chunk.indexed_text(),
            "From the installation guide. \n\n Install with pip."
        );
    }

    #[test]
    fn test_load_jsonl() {
        let mut file = tempfile::Builder::new().suffix(".jsonl").tempfile().unwrap();
        writeln!(file, r#"{{"id": "doc-a", "text": "first chunk"}}"#).unwrap();
        writeln!(file).unwrap();
        writeln!(file, r#"{{"text": "second chunk", "context": "ctx"}}"#).unwrap();

        let store = ChunkStore::load(file.path()).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.get(ChunkId(0)).unwrap().external_id, "doc-a");
        // Ordinal counts records, not lines
        assert_eq!(store.get(ChunkId(1)).unwrap().external_id, "1");
    }

    #[test]
    fn test_load_plain_text() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "first line").unwrap();
        writeln!(file, "   ").unwrap();
        writeln!(file, "second line").unwrap();

        let store = ChunkStore::load(file.path()).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.get(ChunkId(1)).unwrap().text, "second line");
    }

    #[test]
    fn test_invalid_jsonl_line() {
        let mut file = tempfile::Builder::new().suffix(".jsonl").tempfile().unwrap();
        writeln!(file, r#"{{"text": "ok"}}"#).unwrap();
        writeln!(file, "not json").unwrap();

        let result = ChunkStore::load(file.path());
        assert!(matches!(result, Err(CorpusError::InvalidRecord { line: 2, .. })));
    }
}
