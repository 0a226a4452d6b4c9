//! In-memory BM25 inverted index over chunk text.

use std::collections::{HashMap, HashSet};

use hybridrag_core::config::Bm25Config;
use hybridrag_core::types::{Candidate, Chunk, ChunkId, RetrieverKind};

use crate::analyzer::Analyzer;

#[derive(Debug, Clone, Copy)]
struct DocStats {
    len: u32,
}

pub struct Bm25Index {
    params: Bm25Config,
    analyzer: Analyzer,
    /// term -> chunk -> term frequency
    postings: HashMap<String, HashMap<ChunkId, u32>>,
    /// Distinct terms per chunk, so removal only touches its own postings.
    doc_terms: HashMap<ChunkId, Vec<String>>,
    docs: HashMap<ChunkId, DocStats>,
    total_len: u64,
}

impl Bm25Index {
    pub fn new(params: Bm25Config) -> Self {
        Self {
            params,
            analyzer: Analyzer::new(),
            postings: HashMap::new(),
            doc_terms: HashMap::new(),
            docs: HashMap::new(),
            total_len: 0,
        }
    }

    pub fn analyzer(&self) -> &Analyzer { &self.analyzer }

    pub fn params(&self) -> &Bm25Config { &self.params }

    /// Number of indexed chunks.
    pub fn len(&self) -> usize { self.docs.len() }

    pub fn is_empty(&self) -> bool { self.docs.is_empty() }

    pub fn term_count(&self) -> usize { self.postings.len() }

    pub fn contains(&self, id: ChunkId) -> bool { self.docs.contains_key(&id) }

    /// Document frequency of an already-analyzed term.
    pub fn doc_freq(&self, term: &str) -> usize { self.postings.get(term).map_or(0, HashMap::len) }

    /// Index a chunk's text. Re-indexing an existing id replaces its postings.
    pub fn index(&mut self, chunk: &Chunk) {
        let tokens = self.analyzer.tokenize(&chunk.text);
        self.index_tokens(chunk.id, &tokens);
    }

    pub fn index_tokens(&mut self, id: ChunkId, tokens: &[String]) {
        if self.docs.contains_key(&id) {
            self.remove(id);
        }
        let mut tf: HashMap<&str, u32> = HashMap::new();
        for t in tokens {
            *tf.entry(t.as_str()).or_insert(0) += 1;
        }
        let mut terms = Vec::with_capacity(tf.len());
        for (term, freq) in tf {
            self.postings.entry(term.to_string()).or_default().insert(id, freq);
            terms.push(term.to_string());
        }
        let len = u32::try_from(tokens.len()).unwrap_or(u32::MAX);
        self.doc_terms.insert(id, terms);
        self.docs.insert(id, DocStats { len });
        self.total_len += u64::from(len);
    }

    /// Drop every posting of `id`. Returns whether the chunk was indexed.
    pub fn remove(&mut self, id: ChunkId) -> bool {
        let Some(stats) = self.docs.remove(&id) else { return false };
        self.total_len -= u64::from(stats.len);
        for term in self.doc_terms.remove(&id).unwrap_or_default() {
            if let Some(list) = self.postings.get_mut(&term) {
                list.remove(&id);
                if list.is_empty() {
                    self.postings.remove(&term);
                }
            }
        }
        true
    }

    /// Score every chunk containing at least one query token and return the
    /// top `k`, BM25 descending with ties broken by chunk id ascending.
    ///
    /// Repeated query tokens contribute once per occurrence. Scores are
    /// accumulated per chunk in query-token order so equal inputs always
    /// produce bit-identical scores.
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    pub fn search(&self, query_tokens: &[String], k: usize, allowed: Option<&HashSet<ChunkId>>) -> Vec<Candidate> {
        if k == 0 || self.docs.is_empty() {
            return Vec::new();
        }
        let n = self.docs.len() as f64;
        let avgdl = (self.total_len as f64 / n).max(f64::EPSILON);
        let k1 = f64::from(self.params.k1);
        let b = f64::from(self.params.b);

        let mut scores: HashMap<ChunkId, f64> = HashMap::new();
        for token in query_tokens {
            let Some(list) = self.postings.get(token) else { continue };
            let df = list.len() as f64;
            let idf = (1.0 + (n - df + 0.5) / (df + 0.5)).ln();
            for (&id, &tf) in list {
                if allowed.is_some_and(|set| !set.contains(&id)) {
                    continue;
                }
                let dl = f64::from(self.docs.get(&id).map_or(0, |d| d.len));
                let tf = f64::from(tf);
                let norm = tf + k1 * (1.0 - b + b * dl / avgdl);
                *scores.entry(id).or_insert(0.0) += idf * tf * (k1 + 1.0) / norm;
            }
        }

        let mut ranked: Vec<(ChunkId, f64)> = scores.into_iter().collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        ranked.truncate(k);
        ranked
            .into_iter()
            .map(|(chunk_id, score)| Candidate { chunk_id, score: score as f32, source: RetrieverKind::Lexical })
            .collect()
    }

    /// Analyze `text` and search.
    pub fn search_text(&self, text: &str, k: usize, allowed: Option<&HashSet<ChunkId>>) -> Vec<Candidate> {
        let tokens = self.analyzer.tokenize(text);
        self.search(&tokens, k, allowed)
    }
}
