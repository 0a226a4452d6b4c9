use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hybridrag_core::config::{RerankerBackend, RerankerConfig};
use hybridrag_core::store::ChunkStore;
use hybridrag_core::traits::Reranker;
use hybridrag_core::types::{ChunkId, NewChunk, NewDocument, Provenance, RankedResult, SourceType};
use hybridrag_core::Error;
use hybridrag_hybrid::rerank::{rerank_order, score_shortlist};
use hybridrag_hybrid::{build_reranker, CitationAssembler, KeywordReranker};

#[test]
fn keyword_reranker_blends_length_and_overlap() {
    let r = KeywordReranker::new(10, 0.2, 0.3);
    let full = r.score("solar power", "solar power").unwrap();
    assert!((r.score("Solar, power!", "power solar").unwrap() - full).abs() < 1e-6);
    let partial = r.score("solar power", "solar wind").unwrap();
    let none = r.score("solar power", "tidal flows").unwrap();
    assert!(full > partial && partial > none);
    assert!(r.score("", "anything").unwrap() >= 0.0);
}

#[test]
fn configured_backend_is_built() {
    let cfg = RerankerConfig { backend: RerankerBackend::Heuristic, ..RerankerConfig::default() };
    assert_eq!(build_reranker(&cfg).name(), "heuristic");
    assert_eq!(build_reranker(&RerankerConfig::default()).name(), "passthrough");
}

#[test]
fn rerank_order_breaks_ties_by_fused_position() {
    assert_eq!(rerank_order(&[0.0, 0.0, 0.0]), vec![0, 1, 2]);
    assert_eq!(rerank_order(&[0.1, 0.9, 0.1]), vec![1, 0, 2]);
}

struct Sleepy;

impl Reranker for Sleepy {
    fn name(&self) -> &str { "sleepy" }
    fn score(&self, _query: &str, _text: &str) -> anyhow::Result<f32> {
        std::thread::sleep(Duration::from_millis(300));
        Ok(1.0)
    }
}

struct NotANumber;

impl Reranker for NotANumber {
    fn name(&self) -> &str { "nan" }
    fn score(&self, _query: &str, _text: &str) -> anyhow::Result<f32> { Ok(f32::NAN) }
}

#[tokio::test]
async fn shortlist_scoring_is_bounded_and_checked() {
    let err = score_shortlist(Arc::new(Sleepy), "q".into(), vec!["a".into()], Duration::from_millis(20))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ProviderTimeout { timeout_ms: 20, .. }));

    let err = score_shortlist(Arc::new(NotANumber), "q".into(), vec!["a".into()], Duration::from_secs(1))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ProviderError { .. }));
}

/// Counts scored texts, 40ms each.
struct Counting(Arc<AtomicUsize>);

impl Reranker for Counting {
    fn name(&self) -> &str { "counting" }
    fn score(&self, _query: &str, _text: &str) -> anyhow::Result<f32> {
        std::thread::sleep(Duration::from_millis(40));
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(1.0)
    }
}

#[tokio::test]
async fn timed_out_scorer_stops_before_the_rest_of_the_shortlist() {
    let scored = Arc::new(AtomicUsize::new(0));
    let texts: Vec<String> = (0..20).map(|i| format!("text {i}")).collect();
    let err = score_shortlist(Arc::new(Counting(scored.clone())), "q".into(), texts, Duration::from_millis(60))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ProviderTimeout { .. }));

    tokio::time::sleep(Duration::from_millis(300)).await;
    let after = scored.load(Ordering::SeqCst);
    assert!(after < 5, "scorer kept going after the timeout: {after} texts");
}

fn ranked(ids: &[u64], store: &ChunkStore) -> Vec<RankedResult> {
    ids.iter()
        .enumerate()
        .map(|(i, &id)| RankedResult {
            chunk_id: ChunkId(id),
            document_id: store.chunk(ChunkId(id)).unwrap().document_id,
            fused_score: 0.0,
            provenance: Provenance { lexical_rank: None, vector_rank: None, fused_rank: i + 1, rerank_score: None },
        })
        .collect()
}

fn sample_store() -> ChunkStore {
    let mut store = ChunkStore::new();
    // chunk 0 (10 chars), chunk 1 (30 chars) in report.txt; chunk 2 (8 chars) on the web
    store
        .insert(
            NewDocument::new(SourceType::File, "data/report.txt"),
            vec![NewChunk::new("aaaaaaaaaa", 0), NewChunk::new("b".repeat(30), 12)],
        )
        .unwrap();
    let web = NewDocument::new(SourceType::Web, "https://example.com/a").with_title("Example");
    store.insert(web, vec![NewChunk::new("ccccccc\u{e9}", 0)]).unwrap();
    store
}

#[test]
fn overflowing_chunk_is_skipped_and_later_ones_still_fit() {
    let store = sample_store();
    let ctx = CitationAssembler::new(20).assemble(&ranked(&[0, 1, 2], &store), &store);

    assert_eq!(ctx.blocks.iter().map(|b| b.chunk_id.0).collect::<Vec<_>>(), vec![0, 2]);
    assert_eq!(ctx.skipped, vec![ChunkId(1)]);
    assert_eq!(ctx.used_chars, 18, "counted in characters, not bytes");
    assert!(ctx.used_chars <= 20);
    assert_eq!(ctx.blocks[1].marker, "[2]");
    assert_eq!(ctx.citations.len(), 2);
    assert_eq!(ctx.citations[1].label, "Example");
}

#[test]
fn chunks_of_one_document_share_a_citation() {
    let store = sample_store();
    let ctx = CitationAssembler::new(1_000).assemble(&ranked(&[1, 2, 0], &store), &store);

    assert_eq!(ctx.citations.len(), 2);
    assert_eq!(ctx.citations[0].label, "report.txt");
    assert_eq!(ctx.citations[0].markers, vec!["[1]", "[3]"]);
    assert_eq!(ctx.citations[1].markers, vec!["[2]"]);

    let payload = serde_json::to_value(ctx.payload()).unwrap();
    assert_eq!(payload["contextBlocks"][1]["marker"], "[2]");
    assert_eq!(payload["citations"]["[3]"]["docId"], 0);
    assert_eq!(payload["citations"]["[2]"]["locator"], "https://example.com/a");

    let rendered = ctx.render();
    assert!(rendered.starts_with("[1] "));
    assert!(rendered.contains("[1][3] report.txt (data/report.txt)"));
}
