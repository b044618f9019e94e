/// In-memory Okapi BM25 index
use crate::config::Bm25Config;
use crate::corpus::{ChunkStore, CorpusFingerprint};
use crate::retrieval::{tokenize, EngineError, LexicalEngine};
use ahash::AHashMap;

/// Okapi BM25 over the tokenized chunks of a store
///
/// Terms that occur in more than half of the chunks would get a negative IDF;
/// those are floored at `epsilon` times the average IDF instead.
pub struct Bm25Index {
    params: Bm25Config,
    term_freqs: Vec<AHashMap<String, u32>>,
    doc_lens: Vec<u32>,
    avg_doc_len: f32,
    idf: AHashMap<String, f32>,
    fingerprint: CorpusFingerprint,
}

impl Bm25Index {
    pub fn build(store: &ChunkStore, params: Bm25Config) -> Self {
        let mut term_freqs = Vec::with_capacity(store.len());
        let mut doc_lens = Vec::with_capacity(store.len());
        let mut doc_freqs: AHashMap<String, u32> = AHashMap::new();

        for chunk in store.iter() {
            let tokens = tokenize(&chunk.indexed_text());
            doc_lens.push(tokens.len() as u32);

            let mut freqs: AHashMap<String, u32> = AHashMap::new();
            for token in tokens {
                *freqs.entry(token).or_insert(0) += 1;
            }
            for term in freqs.keys() {
                *doc_freqs.entry(term.clone()).or_insert(0) += 1;
            }
            term_freqs.push(freqs);
        }

        let total_len: u64 = doc_lens.iter().map(|&l| l as u64).sum();
        let avg_doc_len = if doc_lens.is_empty() {
            0.0
        } else {
            total_len as f32 / doc_lens.len() as f32
        };

        let idf = Self::compute_idf(&doc_freqs, store.len(), params.epsilon);

        tracing::debug!(
            "Built BM25 index: {} chunks, {} terms, avg length {:.1}",
            store.len(),
            idf.len(),
            avg_doc_len
        );

        Self {
            params,
            term_freqs,
            doc_lens,
            avg_doc_len,
            idf,
            fingerprint: store.fingerprint(),
        }
    }

    fn compute_idf(
        doc_freqs: &AHashMap<String, u32>,
        corpus_size: usize,
        epsilon: f32,
    ) -> AHashMap<String, f32> {
        let n = corpus_size as f32;
        let mut idf = AHashMap::with_capacity(doc_freqs.len());
        let mut idf_sum = 0.0;
        let mut negative = Vec::new();

        for (term, &freq) in doc_freqs {
            let freq = freq as f32;
            let value = ((n - freq + 0.5) / (freq + 0.5)).ln();
            idf_sum += value;
            if value < 0.0 {
                negative.push(term.clone());
            }
            idf.insert(term.clone(), value);
        }

        if !idf.is_empty() {
            let floor = epsilon * idf_sum / idf.len() as f32;
            for term in negative {
                idf.insert(term, floor);
            }
        }
        idf
    }

    /// Score every chunk against the query tokens
    pub fn scores(&self, tokens: &[String]) -> Vec<f32> {
        let mut scores = vec![0.0; self.term_freqs.len()];
        if self.avg_doc_len <= 0.0 {
            return scores;
        }

        let Bm25Config { k1, b, .. } = self.params;
        for token in tokens {
            let Some(&idf) = self.idf.get(token) else {
                continue;
            };
            for (ordinal, freqs) in self.term_freqs.iter().enumerate() {
                let Some(&tf) = freqs.get(token) else {
                    continue;
                };
                let tf = tf as f32;
                let len_norm = 1.0 - b + b * self.doc_lens[ordinal] as f32 / self.avg_doc_len;
                scores[ordinal] += idf * (tf * (k1 + 1.0)) / (tf + k1 * len_norm);
            }
        }
        scores
    }

    pub fn len(&self) -> usize {
        self.term_freqs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.term_freqs.is_empty()
    }
}

impl LexicalEngine for Bm25Index {
    fn score(&self, tokens: &[String]) -> Result<Vec<f32>, EngineError> {
        Ok(self.scores(tokens))
    }

    fn corpus_fingerprint(&self) -> CorpusFingerprint {
        self.fingerprint
    }
}
