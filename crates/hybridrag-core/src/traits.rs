use std::collections::HashSet;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::error::Result;
use crate::types::{Candidate, ChunkId, RetrieverKind};

/// External text -> vector provider.
///
/// Implementations may call a local model or a remote API. Vectors returned
/// for one `embedder_id` must all have length `dim()`.
pub trait EmbeddingProvider: Send + Sync {
    /// Stable identifier for the provider/model (e.g. `hash:d384`).
    fn embedder_id(&self) -> &str;
    fn dim(&self) -> usize;
    fn embed<'a>(&'a self, text: &'a str) -> BoxFuture<'a, anyhow::Result<Vec<f32>>>;

    fn embed_batch<'a>(&'a self, texts: &'a [String]) -> BoxFuture<'a, anyhow::Result<Vec<Vec<f32>>>> {
        Box::pin(async move {
            let mut out = Vec::with_capacity(texts.len());
            for text in texts {
                out.push(self.embed(text).await?);
            }
            Ok(out)
        })
    }
}

/// What a retriever sees of a query.
#[derive(Debug, Clone)]
pub struct RetrievalQuery {
    pub text: String,
    /// When set, only these chunks may be returned.
    pub allowed: Option<Arc<HashSet<ChunkId>>>,
}

impl RetrievalQuery {
    pub fn new(text: impl Into<String>) -> Self { Self { text: text.into(), allowed: None } }

    pub fn admits(&self, id: ChunkId) -> bool {
        match &self.allowed {
            Some(set) => set.contains(&id),
            None => true,
        }
    }
}

/// Returns up to `k` candidates ranked best-first, ties broken by chunk id ascending.
pub trait Retriever: Send + Sync {
    fn kind(&self) -> RetrieverKind;
    fn search<'a>(&'a self, query: &'a RetrievalQuery, k: usize) -> BoxFuture<'a, Result<Vec<Candidate>>>;
}

/// Synchronous (query, chunk text) relevance model used for the second pass.
pub trait Reranker: Send + Sync {
    fn name(&self) -> &str;
    fn score(&self, query: &str, text: &str) -> anyhow::Result<f32>;
}
