use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use hybridrag_core::config::EngineConfig;
use hybridrag_core::data_processor::SourceDocument;
use hybridrag_core::traits::{EmbeddingProvider, Reranker, RetrievalQuery, Retriever};
use hybridrag_core::types::{Candidate, ChunkId, DocumentId, NewChunk, NewDocument, QueryFilters, RetrieverKind, SourceType};
use hybridrag_core::Error;
use hybridrag_embed::HashEmbedder;
use hybridrag_hybrid::{Degradation, EngineBuilder, HybridEngine, QueryRequest, RerankStatus, RetrievalMode};

const C1: &str = "revenue grew 20 percent in Q3";
const C2: &str = "the CEO announced new revenue targets";
const C3: &str = "weather forecast for Tuesday";

/// Two-concept embedder: a finance axis and a weather axis.
struct ConceptEmbedder;

impl ConceptEmbedder {
    fn vector(text: &str) -> Vec<f32> {
        const FINANCE: &[&str] = &["revenue", "q3", "ceo", "growth", "grew", "targets", "percent"];
        const WEATHER: &[&str] = &["weather", "forecast", "tuesday", "rain"];
        let mut v = vec![0.0f32, 0.0];
        for word in text.split_whitespace().map(str::to_lowercase) {
            if FINANCE.contains(&word.as_str()) {
                v[0] += 1.0;
            }
            if WEATHER.contains(&word.as_str()) {
                v[1] += 1.0;
            }
        }
        v
    }
}

impl EmbeddingProvider for ConceptEmbedder {
    fn embedder_id(&self) -> &str { "concept:d2" }
    fn dim(&self) -> usize { 2 }
    fn embed<'a>(&'a self, text: &'a str) -> BoxFuture<'a, anyhow::Result<Vec<f32>>> {
        Box::pin(async move { Ok(Self::vector(text)) })
    }
}

/// Concept vectors, but the first `failures` provider calls fail.
struct FlakyEmbedder {
    failures: usize,
    calls: AtomicUsize,
}

impl EmbeddingProvider for FlakyEmbedder {
    fn embedder_id(&self) -> &str { "concept:d2" }
    fn dim(&self) -> usize { 2 }
    fn embed<'a>(&'a self, text: &'a str) -> BoxFuture<'a, anyhow::Result<Vec<f32>>> {
        Box::pin(async move {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                anyhow::bail!("provider offline");
            }
            Ok(ConceptEmbedder::vector(text))
        })
    }
}

/// Records the size of every batch call.
#[derive(Default)]
struct BatchRecorder {
    batches: std::sync::Mutex<Vec<usize>>,
}

impl EmbeddingProvider for BatchRecorder {
    fn embedder_id(&self) -> &str { "concept:d2" }
    fn dim(&self) -> usize { 2 }
    fn embed<'a>(&'a self, text: &'a str) -> BoxFuture<'a, anyhow::Result<Vec<f32>>> {
        Box::pin(async move { Ok(ConceptEmbedder::vector(text)) })
    }
    fn embed_batch<'a>(&'a self, texts: &'a [String]) -> BoxFuture<'a, anyhow::Result<Vec<Vec<f32>>>> {
        self.batches.lock().unwrap().push(texts.len());
        Box::pin(async move { Ok(texts.iter().map(|t| ConceptEmbedder::vector(t)).collect()) })
    }
}

struct HangingEmbedder;

impl EmbeddingProvider for HangingEmbedder {
    fn embedder_id(&self) -> &str { "hanging:d2" }
    fn dim(&self) -> usize { 2 }
    fn embed<'a>(&'a self, _text: &'a str) -> BoxFuture<'a, anyhow::Result<Vec<f32>>> {
        Box::pin(async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(vec![1.0, 0.0])
        })
    }
}

struct FailingReranker;

impl Reranker for FailingReranker {
    fn name(&self) -> &str { "failing" }
    fn score(&self, _query: &str, _text: &str) -> anyhow::Result<f32> { anyhow::bail!("model crashed") }
}

struct SlowReranker;

impl Reranker for SlowReranker {
    fn name(&self) -> &str { "slow" }
    fn score(&self, _query: &str, _text: &str) -> anyhow::Result<f32> {
        std::thread::sleep(Duration::from_millis(200));
        Ok(0.0)
    }
}

struct FailingRetriever(RetrieverKind);

impl Retriever for FailingRetriever {
    fn kind(&self) -> RetrieverKind { self.0 }
    fn search<'a>(&'a self, _query: &'a RetrievalQuery, _k: usize) -> BoxFuture<'a, hybridrag_core::Result<Vec<Candidate>>> {
        Box::pin(async { Err(Error::IndexUnavailable("offline".into())) })
    }
}

fn builder() -> EngineBuilder { HybridEngine::builder(EngineConfig::default()).embedder(Arc::new(ConceptEmbedder)) }

/// C1, C2 and C3 each in their own document; returns the engine and document ids.
async fn three_chunk_corpus(builder: EngineBuilder) -> (HybridEngine, Vec<DocumentId>) {
    let engine = builder.build().unwrap();
    let mut docs = Vec::new();
    for (locator, text) in [("reports/q3.txt", C1), ("https://example.com/press", C2), ("weather.txt", C3)] {
        let source_type = if locator.starts_with("http") { SourceType::Web } else { SourceType::File };
        let submission = engine.submit(NewDocument::new(source_type, locator), vec![NewChunk::new(text, 0)]).await.unwrap();
        docs.push(submission.document_id);
        assert_eq!(submission.embedded().await.unwrap(), 1);
    }
    (engine, docs)
}

fn chunk_order(response: &hybridrag_hybrid::QueryResponse) -> Vec<u64> {
    response.results.iter().map(|r| r.chunk_id.0).collect()
}

#[tokio::test]
async fn three_chunk_example_ranks_and_cites() {
    let (engine, docs) = three_chunk_corpus(builder()).await;

    let response = engine.query(QueryRequest::new("Q3 revenue growth").with_k(3)).await.unwrap();
    assert_eq!(chunk_order(&response), vec![0, 1, 2], "C1 first, C3 last");
    assert!(!response.degraded);
    assert_eq!(response.rerank, RerankStatus::Applied { backend: "passthrough".into() });

    let first = &response.results[0].provenance;
    assert_eq!((first.lexical_rank, first.vector_rank, first.fused_rank), (Some(1), Some(1), 1));
    assert_eq!(response.results[2].provenance.lexical_rank, None, "C3 shares no terms with the query");

    let top_two = engine.query(QueryRequest::new("Q3 revenue growth").with_k(2)).await.unwrap();
    let cited: Vec<DocumentId> = top_two.context.citations.iter().map(|c| c.document_id).collect();
    assert_eq!(cited, vec![docs[0], docs[1]]);
    assert_eq!(top_two.context.payload().context_blocks[0].text, C1);
}

#[tokio::test]
async fn failing_reranker_keeps_fused_order_and_degrades() {
    let (engine, _) = three_chunk_corpus(builder().reranker(Arc::new(FailingReranker))).await;
    let response = engine.query(QueryRequest::new("Q3 revenue growth").with_k(3)).await.unwrap();

    assert_eq!(chunk_order(&response), vec![0, 1, 2]);
    assert!(response.degraded);
    assert!(matches!(response.rerank, RerankStatus::Failed { .. }));
    assert!(matches!(response.degradations.as_slice(), [Degradation::RerankFailed { .. }]));
    assert!(response.results.iter().all(|r| r.provenance.rerank_score.is_none()));
}

#[tokio::test]
async fn heuristic_reranker_scores_are_reported() {
    let mut config = EngineConfig::default();
    config.reranker.backend = hybridrag_core::config::RerankerBackend::Heuristic;
    let (engine, _) =
        three_chunk_corpus(HybridEngine::builder(config).embedder(Arc::new(ConceptEmbedder))).await;
    let response = engine.query(QueryRequest::new("revenue").with_k(3)).await.unwrap();
    assert_eq!(response.rerank, RerankStatus::Applied { backend: "heuristic".into() });
    assert!(response.results.iter().all(|r| r.provenance.rerank_score.is_some()));
}

#[tokio::test]
async fn one_failing_retriever_degrades_both_failing_errors() {
    let lexical_down = builder().lexical_retriever(Arc::new(FailingRetriever(RetrieverKind::Lexical)));
    let (engine, _) = three_chunk_corpus(lexical_down).await;
    let response = engine.query(QueryRequest::new("Q3 revenue growth").with_k(3)).await.unwrap();
    assert!(response.degraded);
    assert!(matches!(
        response.degradations.as_slice(),
        [Degradation::RetrieverFailed { retriever: RetrieverKind::Lexical, .. }]
    ));
    assert_eq!(response.results.len(), 3, "vector results survive");
    assert!(response.results.iter().all(|r| r.provenance.lexical_rank.is_none()));

    let err = engine.query(QueryRequest::new("revenue").with_mode(RetrievalMode::Lexical)).await.unwrap_err();
    assert!(matches!(err, Error::IndexUnavailable(_)));

    let both_down = builder()
        .lexical_retriever(Arc::new(FailingRetriever(RetrieverKind::Lexical)))
        .vector_retriever(Arc::new(FailingRetriever(RetrieverKind::Vector)));
    let (engine, _) = three_chunk_corpus(both_down).await;
    let err = engine.query(QueryRequest::new("Q3 revenue growth")).await.unwrap_err();
    assert!(matches!(err, Error::IndexUnavailable(_)));
}

#[tokio::test]
async fn invalid_queries_and_empty_corpus_fail_fast() {
    let engine = builder().build().unwrap();
    assert!(matches!(engine.query(QueryRequest::new("anything")).await, Err(Error::EmptyCorpus)));
    assert!(matches!(engine.query(QueryRequest::new("   ")).await, Err(Error::InvalidQuery(_))));

    let (engine, _) = three_chunk_corpus(builder()).await;
    assert!(matches!(engine.query(QueryRequest::new("revenue").with_k(0)).await, Err(Error::InvalidQuery(_))));
    assert!(matches!(engine.query(QueryRequest::new("revenue").with_k(51)).await, Err(Error::InvalidQuery(_))));
}

#[tokio::test]
async fn queries_without_searchable_terms_are_rejected() {
    let (engine, _) = three_chunk_corpus(builder()).await;
    for text in ["???", "-- !! --", "\u{2026}"] {
        let err = engine.query(QueryRequest::new(text).with_k(3)).await.unwrap_err();
        assert!(matches!(err, Error::InvalidQuery(_)), "{text:?} gave {err:?}");
    }

    let hashed = HybridEngine::builder(EngineConfig::default()).embedder(Arc::new(HashEmbedder::new(8)));
    let (engine, _) = three_chunk_corpus(hashed).await;
    assert!(matches!(engine.query(QueryRequest::new("???")).await, Err(Error::InvalidQuery(_))));

    // Stop words only: still a valid query, answered by the vector side alone.
    let response = engine.query(QueryRequest::new("the and of").with_k(3)).await.unwrap();
    assert!(!response.degraded);
    assert!(response.results.iter().all(|r| r.provenance.lexical_rank.is_none()));
}

#[tokio::test]
async fn failed_background_embedding_degrades_until_backfill() {
    let flaky = Arc::new(FlakyEmbedder { failures: 1, calls: AtomicUsize::new(0) });
    let engine = HybridEngine::builder(EngineConfig::default()).embedder(flaky.clone()).build().unwrap();

    let submission = engine.submit(NewDocument::new(SourceType::File, "q3.txt"), vec![NewChunk::new(C1, 0)]).await.unwrap();
    let err = submission.embedded().await.unwrap_err();
    assert!(matches!(err, Error::ProviderError { .. }), "{err:?}");
    let stats = engine.stats().await;
    assert_eq!((stats.lexical_chunks, stats.vector_chunks), (1, 0), "chunk stays lexical-only");

    let response = engine.query(QueryRequest::new("Q3 revenue growth")).await.unwrap();
    assert_eq!(chunk_order(&response), vec![0]);
    assert!(response.degraded);
    assert!(matches!(
        response.degradations.as_slice(),
        [Degradation::RetrieverFailed { retriever: RetrieverKind::Vector, .. }]
    ));

    assert_eq!(engine.backfill_embeddings().await.unwrap(), 1);
    assert_eq!(engine.stats().await.vector_chunks, 1);
    let response = engine.query(QueryRequest::new("Q3 revenue growth")).await.unwrap();
    assert!(!response.degraded);
    assert_eq!(response.results[0].provenance.vector_rank, Some(1));
    assert_eq!(flaky.calls.load(Ordering::SeqCst), 3, "failed ingest, backfill, query");
}

#[tokio::test]
async fn ingest_embeds_in_configured_batches() {
    let mut config = EngineConfig::default();
    config.embedding.batch_size = 2;
    let recorder = Arc::new(BatchRecorder::default());
    let engine = HybridEngine::builder(config).embedder(recorder.clone()).build().unwrap();

    let chunks: Vec<NewChunk> = [C1, C2, C3, "rain on Tuesday", "Q3 targets"]
        .iter()
        .enumerate()
        .map(|(i, t)| NewChunk::new(*t, i * 40))
        .collect();
    let submission = engine.submit(NewDocument::new(SourceType::File, "all.txt"), chunks).await.unwrap();
    assert_eq!(submission.embedded().await.unwrap(), 5);
    assert_eq!(*recorder.batches.lock().unwrap(), vec![2, 2, 1]);
}

#[tokio::test]
async fn embedding_timeout_surfaces_through_the_submission() {
    let mut config = EngineConfig::default();
    config.vector.embed_timeout_ms = 50;
    let engine = HybridEngine::builder(config).embedder(Arc::new(HangingEmbedder)).build().unwrap();
    let submission = engine.submit(NewDocument::new(SourceType::File, "w.txt"), vec![NewChunk::new(C3, 0)]).await.unwrap();
    assert!(matches!(submission.embedded().await, Err(Error::ProviderTimeout { timeout_ms: 50, .. })));
    assert_eq!(engine.stats().await.vector_chunks, 0);

    let lexical = engine.query(QueryRequest::new("weather").with_mode(RetrievalMode::Lexical)).await.unwrap();
    assert_eq!(chunk_order(&lexical), vec![0]);
}

#[tokio::test]
async fn removal_is_visible_to_the_next_query() {
    let (engine, docs) = three_chunk_corpus(builder()).await;
    let removed = engine.remove_chunk(ChunkId(0)).await.unwrap();
    assert_eq!(removed.text, C1);

    let response = engine.query(QueryRequest::new("Q3 revenue growth").with_k(3)).await.unwrap();
    assert!(!chunk_order(&response).contains(&0));
    let stats = engine.stats().await;
    assert_eq!((stats.chunks, stats.lexical_chunks, stats.vector_chunks), (2, 2, 2));

    let (_, chunks) = engine.remove_document(docs[2]).await.unwrap();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunk_order(&engine.query(QueryRequest::new("weather forecast")).await.unwrap()), vec![1]);
    assert!(matches!(engine.remove_chunk(ChunkId(0)).await, Err(Error::NotFound(_))));
}

#[tokio::test]
async fn reingesting_identical_text_leaves_other_chunks_intact() {
    let (engine, _) = three_chunk_corpus(builder()).await;
    let again = engine.submit(NewDocument::new(SourceType::File, "copy.txt"), vec![NewChunk::new(C1, 0)]).await.unwrap();
    assert_eq!(again.chunk_ids, vec![ChunkId(3)]);
    again.embedded().await.unwrap();

    let order = chunk_order(&engine.query(QueryRequest::new("Q3 revenue growth").with_k(4)).await.unwrap());
    assert_eq!(order.len(), 4);
    assert_eq!((order[0], order[3]), (0, 2));

    let response = engine.query(QueryRequest::new("CEO targets").with_k(1)).await.unwrap();
    assert_eq!(chunk_order(&response), vec![1]);
    let stats = engine.stats().await;
    assert_eq!((stats.lexical_chunks, stats.vector_chunks), (4, 4));
}

#[tokio::test]
async fn filters_restrict_candidates_before_retrieval() {
    let (engine, docs) = three_chunk_corpus(builder()).await;

    let web_only = QueryFilters::default().with_source_type(SourceType::Web);
    let response = engine.query(QueryRequest::new("revenue").with_filters(web_only)).await.unwrap();
    assert_eq!(chunk_order(&response), vec![1]);

    let by_doc = QueryFilters::default().with_document(docs[2]);
    let response = engine.query(QueryRequest::new("revenue").with_filters(by_doc)).await.unwrap();
    assert_eq!(chunk_order(&response), vec![2], "vector side still ranks the only admitted chunk");

    let nothing = QueryFilters::default().with_document(DocumentId(99));
    let response = engine.query(QueryRequest::new("revenue").with_filters(nothing)).await.unwrap();
    assert!(response.results.is_empty());
    assert!(!response.degraded);
}

#[tokio::test]
async fn context_budget_is_respected() {
    let mut config = EngineConfig::default();
    config.citation.context_budget = 60;
    let (engine, _) = three_chunk_corpus(HybridEngine::builder(config).embedder(Arc::new(ConceptEmbedder))).await;

    let response = engine.query(QueryRequest::new("Q3 revenue growth").with_k(3)).await.unwrap();
    let ctx = &response.context;
    assert_eq!(ctx.blocks.iter().map(|b| b.chunk_id.0).collect::<Vec<_>>(), vec![0, 2]);
    assert_eq!(ctx.skipped, vec![ChunkId(1)]);
    assert!(ctx.used_chars <= 60);
    assert_eq!(response.results.len(), 3, "ranking is unaffected by the budget");
}

#[tokio::test]
async fn compare_modes_runs_every_mode() {
    let (engine, _) = three_chunk_corpus(builder()).await;
    let runs = engine.compare_modes(&QueryRequest::new("Q3 revenue growth").with_k(3)).await;
    assert_eq!(runs.len(), 3);
    for (mode, outcome) in &runs {
        let response = outcome.as_ref().unwrap();
        assert_eq!(response.mode, *mode);
        assert_eq!(response.results[0].chunk_id, ChunkId(0));
    }
    let lexical = runs.iter().find(|(m, _)| *m == RetrievalMode::Lexical).unwrap().1.as_ref().unwrap();
    assert_eq!(chunk_order(lexical), vec![0, 1]);
}

#[tokio::test]
async fn cancellation_drops_the_in_flight_rerank() {
    let (engine, _) = three_chunk_corpus(builder().reranker(Arc::new(SlowReranker))).await;
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });
    let err = engine.query_with_cancellation(QueryRequest::new("revenue"), &cancel).await.unwrap_err();
    assert!(matches!(err, Error::Cancelled));

    let already = CancellationToken::new();
    already.cancel();
    let err = engine.query_with_cancellation(QueryRequest::new("revenue"), &already).await.unwrap_err();
    assert!(matches!(err, Error::Cancelled));
}

#[tokio::test]
async fn snapshot_restores_store_and_matching_vectors() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("engine.json");
    let (engine, _) = three_chunk_corpus(builder()).await;
    engine.remove_chunk(ChunkId(2)).await.unwrap();
    engine.save_snapshot(&path).await.unwrap();

    let restored = builder().restore_from(&path).unwrap().build().unwrap();
    let stats = restored.stats().await;
    assert_eq!((stats.documents, stats.chunks, stats.lexical_chunks, stats.vector_chunks), (3, 2, 2, 2));
    let response = restored.query(QueryRequest::new("Q3 revenue growth")).await.unwrap();
    assert_eq!(chunk_order(&response), vec![0, 1]);

    let next = restored.submit(NewDocument::new(SourceType::File, "new.txt"), vec![NewChunk::new("rain", 0)]).await.unwrap();
    assert_eq!(next.chunk_ids, vec![ChunkId(3)], "ids are not reused after reload");

    // A different embedder invalidates stored vectors until backfill.
    let other = HybridEngine::builder(EngineConfig::default())
        .embedder(Arc::new(HashEmbedder::new(8)))
        .restore_from(&path)
        .unwrap()
        .build()
        .unwrap();
    assert_eq!(other.stats().await.vector_chunks, 0);
    assert_eq!(other.backfill_embeddings().await.unwrap(), 2);
    assert_eq!(other.backfill_embeddings().await.unwrap(), 0);
    assert_eq!(other.stats().await.vector_chunks, 2);
}

#[tokio::test]
async fn batch_submission_indexes_everything() {
    let engine = builder().build().unwrap();
    let sources = vec![
        SourceDocument { document: NewDocument::new(SourceType::File, "a.txt"), chunks: vec![NewChunk::new(C1, 0)] },
        SourceDocument {
            document: NewDocument::new(SourceType::Structured, "b.csv"),
            chunks: vec![NewChunk::new(C2, 0).with_tag("column", "notes"), NewChunk::new(C3, 40)],
        },
    ];
    let batch = engine.submit_batch(sources).await.unwrap();
    assert_eq!(batch.chunk_count(), 3);
    assert_eq!(batch.embedded().await.unwrap(), 3);

    let stats = engine.stats().await;
    assert_eq!(stats.documents, 2);
    assert_eq!(stats.chunks_by_source.get(&SourceType::Structured), Some(&2));

    let bad = vec![
        SourceDocument { document: NewDocument::new(SourceType::File, "ok.txt"), chunks: vec![NewChunk::new("fine", 0)] },
        SourceDocument { document: NewDocument::new(SourceType::File, ""), chunks: vec![] },
    ];
    assert!(matches!(engine.submit_batch(bad).await, Err(Error::InvalidInput(_))));
    assert_eq!(engine.stats().await.documents, 2, "nothing stored from a rejected batch");
}
