use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::RwLock;

use hybridrag_core::error::{Error, Result};
use hybridrag_core::traits::{EmbeddingProvider, RetrievalQuery, Retriever};
use hybridrag_core::types::{Candidate, RetrieverKind};

use crate::index::VectorIndex;

async fn bounded<T>(
    embedder: &dyn EmbeddingProvider,
    timeout: Duration,
    call: impl std::future::Future<Output = anyhow::Result<T>>,
) -> Result<T> {
    let provider = embedder.embedder_id();
    match tokio::time::timeout(timeout, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(Error::provider(provider, &e)),
        Err(_) => Err(Error::ProviderTimeout {
            provider: provider.to_string(),
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }),
    }
}

/// Embed `text` through `embedder`, bounded by `timeout`.
pub async fn embed_with_timeout(embedder: &dyn EmbeddingProvider, text: &str, timeout: Duration) -> Result<Vec<f32>> {
    bounded(embedder, timeout, embedder.embed(text)).await
}

/// Embed `texts` in one provider call bounded by `timeout`. The provider must
/// return exactly one vector per text.
pub async fn embed_batch_with_timeout(
    embedder: &dyn EmbeddingProvider,
    texts: &[String],
    timeout: Duration,
) -> Result<Vec<Vec<f32>>> {
    let vectors = bounded(embedder, timeout, embedder.embed_batch(texts)).await?;
    if vectors.len() != texts.len() {
        return Err(Error::ProviderError {
            provider: embedder.embedder_id().to_string(),
            message: format!("returned {} vectors for {} texts", vectors.len(), texts.len()),
        });
    }
    Ok(vectors)
}

/// Semantic retriever: embeds the query, then scans the shared vector index.
///
/// No index lock is held while the provider call is in flight.
#[derive(Clone)]
pub struct VectorRetriever {
    index: Arc<RwLock<VectorIndex>>,
    embedder: Arc<dyn EmbeddingProvider>,
    timeout: Duration,
}

impl VectorRetriever {
    pub fn new(index: Arc<RwLock<VectorIndex>>, embedder: Arc<dyn EmbeddingProvider>, timeout: Duration) -> Self {
        Self { index, embedder, timeout }
    }

    pub fn index(&self) -> &Arc<RwLock<VectorIndex>> { &self.index }
}

impl Retriever for VectorRetriever {
    fn kind(&self) -> RetrieverKind { RetrieverKind::Vector }

    fn search<'a>(&'a self, query: &'a RetrievalQuery, k: usize) -> BoxFuture<'a, Result<Vec<Candidate>>> {
        Box::pin(async move {
            if self.index.read().await.is_empty() {
                return Err(Error::IndexUnavailable("vector index is empty (embeddings pending?)".into()));
            }
            let query_vec = embed_with_timeout(self.embedder.as_ref(), &query.text, self.timeout).await?;
            let hits = self.index.read().await.search(&query_vec, k, query.allowed.as_deref())?;
            tracing::debug!(hits = hits.len(), provider = self.embedder.embedder_id(), "vector search");
            Ok(hits)
        })
    }
}
