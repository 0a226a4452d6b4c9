//! Exact in-memory vector index.
//!
//! The metric is fixed at construction. The dimension is fixed by
//! configuration or by the first upsert; vectors of any other length are
//! rejected. Cosine vectors are normalized on upsert so search is a dot
//! product for both metrics.

use std::collections::{HashMap, HashSet};

use hybridrag_core::error::{Error, Result};
use hybridrag_core::snapshot::StoredVector;
use hybridrag_core::types::{Candidate, ChunkId, Metric, RetrieverKind};

pub struct VectorIndex {
    metric: Metric,
    dim: Option<usize>,
    recall_tolerance: f32,
    vectors: HashMap<ChunkId, Vec<f32>>,
}

fn norm(v: &[f32]) -> f32 { v.iter().map(|x| x * x).sum::<f32>().sqrt() }

fn normalize(v: &mut [f32]) {
    let norm = norm(v);
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 { a.iter().zip(b).map(|(x, y)| x * y).sum() }

impl VectorIndex {
    pub fn new(metric: Metric, dim: Option<usize>) -> Self {
        Self { metric, dim, recall_tolerance: 0.0, vectors: HashMap::new() }
    }

    pub fn with_recall_tolerance(mut self, recall_tolerance: f32) -> Result<Self> {
        if !(0.0..=1.0).contains(&recall_tolerance) {
            return Err(Error::InvalidConfig(format!("recall_tolerance must be within [0, 1], got {recall_tolerance}")));
        }
        self.recall_tolerance = recall_tolerance;
        Ok(self)
    }

    pub fn metric(&self) -> Metric { self.metric }

    pub fn dim(&self) -> Option<usize> { self.dim }

    /// Exact search loses no recall, so any configured tolerance is met.
    pub fn recall_tolerance(&self) -> f32 { self.recall_tolerance }

    pub fn len(&self) -> usize { self.vectors.len() }

    pub fn is_empty(&self) -> bool { self.vectors.is_empty() }

    pub fn contains(&self, id: ChunkId) -> bool { self.vectors.contains_key(&id) }

    fn check_dim(&self, len: usize) -> Result<()> {
        match self.dim {
            Some(expected) if expected != len => Err(Error::DimensionMismatch { expected, actual: len }),
            _ if len == 0 => Err(Error::InvalidInput("empty embedding".into())),
            _ => Ok(()),
        }
    }

    pub fn upsert(&mut self, id: ChunkId, mut vector: Vec<f32>) -> Result<()> {
        self.check_dim(vector.len())?;
        if vector.iter().any(|x| !x.is_finite()) {
            return Err(Error::InvalidInput(format!("embedding for {id} contains non-finite values")));
        }
        self.dim.get_or_insert(vector.len());
        if self.metric == Metric::Cosine {
            normalize(&mut vector);
        }
        self.vectors.insert(id, vector);
        Ok(())
    }

    pub fn remove(&mut self, id: ChunkId) -> bool { self.vectors.remove(&id).is_some() }

    /// Top `k` by similarity descending, ties by chunk id ascending.
    ///
    /// Under cosine a zero-norm query has no direction and is rejected as
    /// `InvalidQuery` instead of scoring every chunk 0.
    pub fn search(&self, query: &[f32], k: usize, allowed: Option<&HashSet<ChunkId>>) -> Result<Vec<Candidate>> {
        self.check_dim(query.len())?;
        if self.metric == Metric::Cosine && norm(query) <= f32::EPSILON {
            return Err(Error::InvalidQuery("query embedding has zero norm".into()));
        }
        if k == 0 {
            return Ok(Vec::new());
        }
        let mut q = query.to_vec();
        if self.metric == Metric::Cosine {
            normalize(&mut q);
        }
        let mut scored: Vec<(ChunkId, f32)> = self
            .vectors
            .iter()
            .filter(|(id, _)| !allowed.is_some_and(|set| !set.contains(*id)))
            .map(|(&id, v)| (id, dot(&q, v)))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        scored.truncate(k);
        Ok(scored.into_iter().map(|(chunk_id, score)| Candidate { chunk_id, score, source: RetrieverKind::Vector }).collect())
    }

    /// Stored vectors ordered by chunk id, for snapshots.
    pub fn export(&self) -> Vec<StoredVector> {
        let mut out: Vec<StoredVector> =
            self.vectors.iter().map(|(&chunk_id, v)| StoredVector { chunk_id, vector: v.clone() }).collect();
        out.sort_by_key(|s| s.chunk_id);
        out
    }
}
