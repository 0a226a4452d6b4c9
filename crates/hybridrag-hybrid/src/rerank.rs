//! Second-pass re-ranking over the fused shortlist.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hybridrag_core::config::{RerankerBackend, RerankerConfig};
use hybridrag_core::error::{Error, Result};
use hybridrag_core::traits::Reranker;

/// Scores every chunk 0.0, so the fused order is kept.
pub struct PassthroughReranker;

impl Reranker for PassthroughReranker {
    fn name(&self) -> &str { "passthrough" }

    fn score(&self, _query: &str, _text: &str) -> anyhow::Result<f32> { Ok(0.0) }
}

/// Heuristic relevance: closeness of the chunk length to an ideal length,
/// blended with the share of query words that occur in the chunk.
#[derive(Debug, Clone)]
pub struct KeywordReranker {
    ideal_length: usize,
    length_weight: f32,
    keyword_weight: f32,
}

impl KeywordReranker {
    /// Weights are normalized to sum to 1.
    pub fn new(ideal_length: usize, length_weight: f32, keyword_weight: f32) -> Self {
        let total = length_weight + keyword_weight;
        let (length_weight, keyword_weight) =
            if total > 0.0 { (length_weight / total, keyword_weight / total) } else { (0.5, 0.5) };
        Self { ideal_length: ideal_length.max(1), length_weight, keyword_weight }
    }

    #[allow(clippy::cast_precision_loss)]
    fn length_score(&self, text: &str) -> f32 {
        let len = text.chars().count();
        let diff = len.abs_diff(self.ideal_length) as f32;
        (1.0 - diff / self.ideal_length as f32).max(0.0)
    }

    #[allow(clippy::cast_precision_loss)]
    fn keyword_score(query: &str, text: &str) -> f32 {
        let query_words = words(query);
        if query_words.is_empty() {
            return 0.0;
        }
        let text_words = words(text);
        let overlap = query_words.intersection(&text_words).count();
        overlap as f32 / query_words.len() as f32
    }
}

fn words(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()).map(str::to_lowercase).collect()
}

impl Reranker for KeywordReranker {
    fn name(&self) -> &str { "heuristic" }

    fn score(&self, query: &str, text: &str) -> anyhow::Result<f32> {
        Ok(self.length_weight * self.length_score(text) + self.keyword_weight * Self::keyword_score(query, text))
    }
}

pub fn build_reranker(cfg: &RerankerConfig) -> Arc<dyn Reranker> {
    match cfg.backend {
        RerankerBackend::Passthrough => Arc::new(PassthroughReranker),
        RerankerBackend::Heuristic => {
            Arc::new(KeywordReranker::new(cfg.ideal_length, cfg.length_weight, cfg.keyword_weight))
        }
    }
}

/// Sets the flag when the awaiting side goes away, finished or not.
struct AbandonOnDrop(Arc<AtomicBool>);

impl Drop for AbandonOnDrop {
    fn drop(&mut self) { self.0.store(true, Ordering::Relaxed); }
}

/// Score `texts` against `query` on the blocking pool, bounded by `timeout`.
///
/// The timeout covers the whole shortlist. When it fires, or the returned
/// future is dropped, the result is discarded and the blocking scorer stops
/// before its next text; a `score` call already running is not interrupted.
/// Non-finite scores count as a failure.
pub async fn score_shortlist(
    reranker: Arc<dyn Reranker>,
    query: String,
    texts: Vec<String>,
    timeout: Duration,
) -> Result<Vec<f32>> {
    let name = reranker.name().to_string();
    let task_name = name.clone();
    let abandoned = Arc::new(AtomicBool::new(false));
    let _guard = AbandonOnDrop(Arc::clone(&abandoned));
    let task = tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<f32>> {
        let mut scores = Vec::with_capacity(texts.len());
        for text in &texts {
            anyhow::ensure!(!abandoned.load(Ordering::Relaxed), "{task_name} abandoned after {} texts", scores.len());
            let s = reranker.score(&query, text)?;
            anyhow::ensure!(s.is_finite(), "{task_name} produced a non-finite score");
            scores.push(s);
        }
        Ok(scores)
    });
    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(Ok(scores))) => Ok(scores),
        Ok(Ok(Err(e))) => Err(Error::provider(name, &e)),
        Ok(Err(join)) => Err(Error::ProviderError { provider: name, message: join.to_string() }),
        Err(_) => Err(Error::ProviderTimeout {
            provider: name,
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }),
    }
}

/// Positions into the shortlist ordered by re-rank score descending, ties by
/// fused position (the shortlist is already in fused order).
pub fn rerank_order(scores: &[f32]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]).then(a.cmp(&b)));
    order
}
