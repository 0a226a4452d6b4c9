use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;

use hybridrag_core::traits::EmbeddingProvider;

/// Retries failed provider calls up to `max_retries` times with exponential
/// backoff (`base`, `2 * base`, `4 * base`, ...). The engine applies its own
/// timeout around the whole call, retries included.
pub struct RetryingEmbedder {
    inner: Arc<dyn EmbeddingProvider>,
    max_retries: u32,
    base: Duration,
}

impl RetryingEmbedder {
    pub fn new(inner: Arc<dyn EmbeddingProvider>, max_retries: u32, base: Duration) -> Self {
        Self { inner, max_retries, base }
    }

    fn delay(&self, attempt: u32) -> Duration { self.base.saturating_mul(1u32 << attempt.min(16)) }

    async fn retry<'a, T: Send>(
        &'a self,
        mut call: impl FnMut() -> BoxFuture<'a, anyhow::Result<T>> + Send + 'a,
    ) -> anyhow::Result<T> {
        let mut attempt = 0;
        loop {
            match call().await {
                Ok(v) => return Ok(v),
                Err(e) if attempt < self.max_retries => {
                    let delay = self.delay(attempt);
                    attempt += 1;
                    tracing::warn!(
                        provider = self.inner.embedder_id(),
                        error = %e,
                        "embedding failed, retrying in {}ms ({attempt}/{})",
                        delay.as_millis(),
                        self.max_retries
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl EmbeddingProvider for RetryingEmbedder {
    fn embedder_id(&self) -> &str { self.inner.embedder_id() }

    fn dim(&self) -> usize { self.inner.dim() }

    fn embed<'a>(&'a self, text: &'a str) -> BoxFuture<'a, anyhow::Result<Vec<f32>>> {
        Box::pin(self.retry(move || self.inner.embed(text)))
    }

    /// Retries the whole batch.
    fn embed_batch<'a>(&'a self, texts: &'a [String]) -> BoxFuture<'a, anyhow::Result<Vec<Vec<f32>>>> {
        Box::pin(self.retry(move || self.inner.embed_batch(texts)))
    }
}
