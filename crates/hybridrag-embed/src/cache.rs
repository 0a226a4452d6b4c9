//! In-memory embedding cache keyed by `(embedder_id, content_hash)`.
//!
//! Consulted before calling a provider and written through on misses, so
//! re-ingesting identical text or re-running backfill never re-embeds it.
//! Bounded by entry count with TinyLFU admission; idle entries expire.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use moka::sync::Cache;

use hybridrag_core::traits::EmbeddingProvider;

const TIME_TO_IDLE: Duration = Duration::from_secs(3600);

/// blake3 hex digest of chunk text.
pub fn content_hash(text: &str) -> String { blake3::hash(text.as_bytes()).to_hex().to_string() }

pub struct EmbeddingCache {
    entries: Cache<(String, String), Vec<f32>>,
}

impl EmbeddingCache {
    /// Holds at most `max_entries` vectors. Zero disables caching.
    pub fn new(max_entries: u64) -> Self {
        let entries = Cache::builder().max_capacity(max_entries).time_to_idle(TIME_TO_IDLE).build();
        Self { entries }
    }

    pub fn get(&self, embedder_id: &str, text: &str) -> Option<Vec<f32>> {
        self.entries.get(&(embedder_id.to_string(), content_hash(text)))
    }

    pub fn put(&self, embedder_id: &str, text: &str, vector: Vec<f32>) {
        self.entries.insert((embedder_id.to_string(), content_hash(text)), vector);
    }

    pub fn invalidate(&self, embedder_id: &str, text: &str) {
        self.entries.invalidate(&(embedder_id.to_string(), content_hash(text)));
    }

    pub fn capacity(&self) -> Option<u64> { self.entries.policy().max_capacity() }

    /// Entry count after pending evictions have been applied.
    pub fn len(&self) -> u64 {
        self.entries.run_pending_tasks();
        self.entries.entry_count()
    }

    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

/// Provider wrapper that serves repeated texts from an [`EmbeddingCache`].
pub struct CachedEmbedder {
    inner: Arc<dyn EmbeddingProvider>,
    cache: Arc<EmbeddingCache>,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn EmbeddingProvider>, cache: Arc<EmbeddingCache>) -> Self { Self { inner, cache } }

    pub fn cache(&self) -> &Arc<EmbeddingCache> { &self.cache }
}

impl EmbeddingProvider for CachedEmbedder {
    fn embedder_id(&self) -> &str { self.inner.embedder_id() }

    fn dim(&self) -> usize { self.inner.dim() }

    fn embed<'a>(&'a self, text: &'a str) -> BoxFuture<'a, anyhow::Result<Vec<f32>>> {
        Box::pin(async move {
            let id = self.inner.embedder_id();
            if let Some(hit) = self.cache.get(id, text) {
                return Ok(hit);
            }
            let vector = self.inner.embed(text).await?;
            self.cache.put(id, text, vector.clone());
            Ok(vector)
        })
    }

    fn embed_batch<'a>(&'a self, texts: &'a [String]) -> BoxFuture<'a, anyhow::Result<Vec<Vec<f32>>>> {
        Box::pin(async move {
            let id = self.inner.embedder_id();
            let mut out: Vec<Option<Vec<f32>>> = texts.iter().map(|t| self.cache.get(id, t)).collect();
            let missing: Vec<usize> = out.iter().enumerate().filter(|(_, v)| v.is_none()).map(|(i, _)| i).collect();
            if !missing.is_empty() {
                let batch: Vec<String> = missing.iter().map(|&i| texts[i].clone()).collect();
                let vectors = self.inner.embed_batch(&batch).await?;
                anyhow::ensure!(
                    vectors.len() == batch.len(),
                    "{id} returned {} vectors for {} texts",
                    vectors.len(),
                    batch.len()
                );
                for (i, vector) in missing.into_iter().zip(vectors) {
                    self.cache.put(id, &texts[i], vector.clone());
                    out[i] = Some(vector);
                }
            }
            tracing::debug!(texts = texts.len(), "embedded batch");
            Ok(out.into_iter().flatten().collect())
        })
    }
}
