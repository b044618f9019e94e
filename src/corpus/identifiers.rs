//! Mapping from engine-level identifiers to chunk ids

use super::{ChunkId, ChunkStore};
use ahash::AHashMap;

/// Resolves external identifiers (as stored in the dense index) to [`ChunkId`]s
///
/// Built from the same [`ChunkStore`] whose fingerprint the engines were
/// checked against, so resolution never crosses corpora.
#[derive(Debug, Clone)]
pub struct IdentifierMap {
    by_external: AHashMap<String, ChunkId>,
}

impl IdentifierMap {
    pub fn from_store(store: &ChunkStore) -> Self {
        let by_external = store
            .iter()
            .map(|chunk| (chunk.external_id.clone(), chunk.id))
            .collect();

        Self { by_external }
    }

    pub fn resolve(&self, external_id: &str) -> Option<ChunkId> {
        self.by_external.get(external_id).copied()
    }

    pub fn len(&self) -> usize {
        self.by_external.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_external.is_empty()
    }
}
