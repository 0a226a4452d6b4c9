use std::hash::{Hash, Hasher};

use futures::future::BoxFuture;
use twox_hash::XxHash64;

use hybridrag_core::traits::EmbeddingProvider;

/// Deterministic feature-hashing embedder.
///
/// Each lower-cased alphanumeric token is hashed with xxHash64 into one of
/// `dim` buckets; the bucket accumulates a hash-derived weight. The result is
/// L2-normalized. Needs no model files, so it backs tests and offline runs.
pub struct HashEmbedder {
    dim: usize,
    id: String,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self { Self { dim: dim.max(1), id: format!("hash:d{}", dim.max(1)) } }

    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0f32; self.dim];
        let tokens = text.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty());
        for token in tokens {
            let mut hasher = XxHash64::with_seed(0);
            token.to_lowercase().hash(&mut hasher);
            let h = hasher.finish();
            let idx = (h % self.dim as u64) as usize;
            let weight = 0.5 + f32::from(((h >> 32) & 0xFFFF) as u16) / f32::from(u16::MAX);
            v[idx] += weight;
        }
        l2_normalize(&mut v);
        v
    }
}

pub(crate) fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 1e-6 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

impl EmbeddingProvider for HashEmbedder {
    fn embedder_id(&self) -> &str { &self.id }

    fn dim(&self) -> usize { self.dim }

    fn embed<'a>(&'a self, text: &'a str) -> BoxFuture<'a, anyhow::Result<Vec<f32>>> {
        Box::pin(async move { Ok(self.embed_sync(text)) })
    }
}
