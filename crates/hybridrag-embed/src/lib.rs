//! hybridrag-embed
//!
//! Embedding providers behind `hybridrag_core::traits::EmbeddingProvider`:
//! a deterministic feature-hashing embedder, an optional candle model
//! (`--features candle`), plus a write-through cache and bounded retry.
pub mod cache;
#[cfg(feature = "candle")]
pub mod candle;
pub mod hash;
pub mod retry;

use std::sync::Arc;
use std::time::Duration;

use hybridrag_core::config::{EmbeddingBackend, EmbeddingConfig};
use hybridrag_core::traits::EmbeddingProvider;

pub use cache::{CachedEmbedder, EmbeddingCache};
pub use hash::HashEmbedder;
pub use retry::RetryingEmbedder;

/// Build the configured provider wrapped in bounded retry and a fresh cache
/// of `cache_capacity` entries.
pub fn build_provider(cfg: &EmbeddingConfig) -> anyhow::Result<Arc<dyn EmbeddingProvider>> {
    let base: Arc<dyn EmbeddingProvider> = match cfg.provider {
        EmbeddingBackend::Hash => Arc::new(HashEmbedder::new(cfg.dim)),
        EmbeddingBackend::Candle => load_candle(cfg)?,
    };
    tracing::info!(provider = base.embedder_id(), dim = base.dim(), "embedding provider ready");
    let retrying: Arc<dyn EmbeddingProvider> =
        Arc::new(RetryingEmbedder::new(base, cfg.max_retries, Duration::from_millis(cfg.retry_backoff_ms)));
    Ok(Arc::new(CachedEmbedder::new(retrying, Arc::new(EmbeddingCache::new(cfg.cache_capacity)))))
}

#[cfg(feature = "candle")]
fn load_candle(cfg: &EmbeddingConfig) -> anyhow::Result<Arc<dyn EmbeddingProvider>> {
    let dir = candle::CandleEmbedder::resolve_model_dir(cfg.model_dir.as_deref())?;
    let embedder = candle::CandleEmbedder::load(&dir)?;
    if embedder.dim() != cfg.dim {
        tracing::warn!(configured = cfg.dim, model = embedder.dim(), "embedding.dim ignored, using model dimension");
    }
    Ok(Arc::new(embedder))
}

#[cfg(not(feature = "candle"))]
fn load_candle(_cfg: &EmbeddingConfig) -> anyhow::Result<Arc<dyn EmbeddingProvider>> {
    anyhow::bail!("embedding.provider = \"candle\" requires building with --features candle")
}
