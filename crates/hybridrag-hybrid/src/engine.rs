//! Engine facade: owns the chunk store and both indexes, orchestrates ingest
//! and the query pipeline (retrieve, fuse, re-rank, cite).
//!
//! Locks are always taken in the order store, lexical index, vector index.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use hybridrag_core::config::EngineConfig;
use hybridrag_core::data_processor::SourceDocument;
use hybridrag_core::error::{Error, Result};
use hybridrag_core::snapshot::{Snapshot, SNAPSHOT_VERSION};
use hybridrag_core::store::ChunkStore;
use hybridrag_core::traits::{EmbeddingProvider, Reranker, RetrievalQuery, Retriever};
use hybridrag_core::types::{
    Candidate, Chunk, ChunkId, Document, DocumentId, Metric, NewChunk, NewDocument, Provenance, QueryFilters,
    RankedResult, RetrieverKind, SourceType,
};
use hybridrag_text::{Analyzer, Bm25Index, LexicalRetriever};
use hybridrag_vector::{embed_batch_with_timeout, VectorIndex, VectorRetriever};

use crate::citation::{AssembledContext, CitationAssembler};
use crate::fusion::{reciprocal_rank_fusion, FusedCandidate};
use crate::rerank::{build_reranker, rerank_order, score_shortlist};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalMode {
    #[default]
    Hybrid,
    Lexical,
    Vector,
}

impl RetrievalMode {
    pub const ALL: [Self; 3] = [Self::Hybrid, Self::Lexical, Self::Vector];
}

impl fmt::Display for RetrievalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Hybrid => "hybrid",
            Self::Lexical => "lexical",
            Self::Vector => "vector",
        })
    }
}

impl FromStr for RetrievalMode {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hybrid" => Ok(Self::Hybrid),
            "lexical" | "bm25" => Ok(Self::Lexical),
            "vector" | "semantic" => Ok(Self::Vector),
            other => Err(format!("unknown retrieval mode '{other}' (expected hybrid, lexical or vector)")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub text: String,
    /// Result count; the configured default when `None`.
    pub k: Option<usize>,
    pub filters: QueryFilters,
    pub mode: RetrievalMode,
}

impl QueryRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into(), k: None, filters: QueryFilters::default(), mode: RetrievalMode::Hybrid }
    }

    #[must_use]
    pub fn with_k(mut self, k: usize) -> Self {
        self.k = Some(k);
        self
    }

    #[must_use]
    pub fn with_filters(mut self, filters: QueryFilters) -> Self {
        self.filters = filters;
        self
    }

    #[must_use]
    pub fn with_mode(mut self, mode: RetrievalMode) -> Self {
        self.mode = mode;
        self
    }
}

/// A condition under which the response is still usable but not complete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Degradation {
    RetrieverFailed { retriever: RetrieverKind, reason: String },
    RerankFailed { reason: String },
}

impl fmt::Display for Degradation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RetrieverFailed { retriever, reason } => write!(f, "{retriever} retriever failed: {reason}"),
            Self::RerankFailed { reason } => write!(f, "re-rank failed, results unranked: {reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RerankStatus {
    Applied { backend: String },
    Disabled,
    /// Nothing to re-rank.
    Skipped,
    /// Results are in fused order.
    Failed { reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub mode: RetrievalMode,
    pub results: Vec<RankedResult>,
    pub context: AssembledContext,
    pub degraded: bool,
    pub degradations: Vec<Degradation>,
    pub rerank: RerankStatus,
}

impl QueryResponse {
    fn empty(mode: RetrievalMode) -> Self {
        Self {
            mode,
            results: Vec::new(),
            context: AssembledContext::default(),
            degraded: false,
            degradations: Vec::new(),
            rerank: RerankStatus::Skipped,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStats {
    pub documents: usize,
    pub chunks: usize,
    pub chunks_by_source: BTreeMap<SourceType, usize>,
    pub lexical_chunks: usize,
    pub lexical_terms: usize,
    pub vector_chunks: usize,
    pub embedder_id: String,
    pub metric: Metric,
}

type EmbedTask = JoinHandle<Result<usize>>;

async fn join_embed_task(handle: EmbedTask) -> Result<usize> {
    handle
        .await
        .map_err(|e| Error::ProviderError { provider: "embedding task".into(), message: e.to_string() })?
}

/// Ids assigned to one submitted document plus a handle on its pending embeddings.
#[derive(Debug)]
pub struct Submission {
    pub document_id: DocumentId,
    pub chunk_ids: Vec<ChunkId>,
    handle: EmbedTask,
}

impl Submission {
    /// Wait for the vector index update; returns the number of vectors stored.
    pub async fn embedded(self) -> Result<usize> { join_embed_task(self.handle).await }
}

#[derive(Debug)]
pub struct BatchSubmission {
    pub documents: Vec<(DocumentId, Vec<ChunkId>)>,
    handle: EmbedTask,
}

impl BatchSubmission {
    pub fn chunk_count(&self) -> usize { self.documents.iter().map(|(_, c)| c.len()).sum() }

    pub async fn embedded(self) -> Result<usize> { join_embed_task(self.handle).await }
}

pub struct EngineBuilder {
    config: EngineConfig,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    reranker: Option<Arc<dyn Reranker>>,
    lexical: Option<Arc<dyn Retriever>>,
    vector: Option<Arc<dyn Retriever>>,
    snapshot: Option<Snapshot>,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self { config, embedder: None, reranker: None, lexical: None, vector: None, snapshot: None }
    }

    #[must_use]
    pub fn embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    #[must_use]
    pub fn reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    /// Replace the built-in BM25 retriever (the index is still maintained).
    #[must_use]
    pub fn lexical_retriever(mut self, retriever: Arc<dyn Retriever>) -> Self {
        self.lexical = Some(retriever);
        self
    }

    /// Replace the built-in vector retriever (the index is still maintained).
    #[must_use]
    pub fn vector_retriever(mut self, retriever: Arc<dyn Retriever>) -> Self {
        self.vector = Some(retriever);
        self
    }

    #[must_use]
    pub fn snapshot(mut self, snapshot: Snapshot) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    /// Restore from `path` if a snapshot has been saved there.
    pub fn restore_from(mut self, path: &Path) -> Result<Self> {
        self.snapshot = Snapshot::load(path)?;
        if self.snapshot.is_none() {
            tracing::info!(path = %path.display(), "no snapshot, starting empty");
        }
        Ok(self)
    }

    pub fn build(self) -> Result<HybridEngine> {
        let config = self.config;
        config.validate()?;
        let embedder = match self.embedder {
            Some(e) => e,
            None => hybridrag_embed::build_provider(&config.embedding)
                .map_err(|e| Error::InvalidConfig(format!("embedding provider: {e:#}")))?,
        };
        let reranker = self.reranker.unwrap_or_else(|| build_reranker(&config.reranker));

        let mut store = ChunkStore::new();
        let mut lexical_index = Bm25Index::new(config.bm25.clone());
        let mut vector_index = VectorIndex::new(config.vector.metric, Some(embedder.dim()))
            .with_recall_tolerance(config.vector.recall_tolerance)?;

        if let Some(snapshot) = self.snapshot {
            store = snapshot.store;
            for chunk in store.chunks() {
                lexical_index.index(chunk);
            }
            let compatible = snapshot.embedder_id.as_deref() == Some(embedder.embedder_id())
                && snapshot.metric == config.vector.metric;
            if compatible {
                for stored in snapshot.vectors {
                    if !store.contains_chunk(stored.chunk_id) {
                        continue;
                    }
                    if let Err(e) = vector_index.upsert(stored.chunk_id, stored.vector) {
                        tracing::warn!(chunk = %stored.chunk_id, error = %e, "dropping stored vector");
                    }
                }
            } else if !snapshot.vectors.is_empty() {
                tracing::warn!(
                    stored = ?snapshot.embedder_id,
                    current = embedder.embedder_id(),
                    "snapshot vectors come from a different embedder or metric; run backfill"
                );
            }
            tracing::info!(
                documents = store.document_count(),
                chunks = store.chunk_count(),
                vectors = vector_index.len(),
                "engine restored from snapshot"
            );
        }

        let lexical_index = Arc::new(RwLock::new(lexical_index));
        let vector_index = Arc::new(RwLock::new(vector_index));
        let embed_timeout = Duration::from_millis(config.vector.embed_timeout_ms);
        let lexical: Arc<dyn Retriever> = match self.lexical {
            Some(r) => r,
            None => Arc::new(LexicalRetriever::new(Arc::clone(&lexical_index))),
        };
        let vector: Arc<dyn Retriever> = match self.vector {
            Some(r) => r,
            None => Arc::new(VectorRetriever::new(Arc::clone(&vector_index), Arc::clone(&embedder), embed_timeout)),
        };

        Ok(HybridEngine {
            assembler: CitationAssembler::new(config.citation.context_budget),
            analyzer: Analyzer::new(),
            config,
            store: Arc::new(RwLock::new(store)),
            lexical_index,
            vector_index,
            lexical,
            vector,
            embedder,
            reranker,
        })
    }
}

pub struct HybridEngine {
    config: EngineConfig,
    store: Arc<RwLock<ChunkStore>>,
    lexical_index: Arc<RwLock<Bm25Index>>,
    vector_index: Arc<RwLock<VectorIndex>>,
    lexical: Arc<dyn Retriever>,
    vector: Arc<dyn Retriever>,
    embedder: Arc<dyn EmbeddingProvider>,
    reranker: Arc<dyn Reranker>,
    assembler: CitationAssembler,
    analyzer: Analyzer,
}

impl HybridEngine {
    pub fn builder(config: EngineConfig) -> EngineBuilder { EngineBuilder::new(config) }

    /// Load-or-create from the configured snapshot path with configured providers.
    pub fn open(config: EngineConfig) -> Result<Self> {
        let path = config.storage.snapshot_path();
        EngineBuilder::new(config).restore_from(&path)?.build()
    }

    pub fn config(&self) -> &EngineConfig { &self.config }

    pub fn embedder_id(&self) -> &str { self.embedder.embedder_id() }

    fn embed_timeout(&self) -> Duration { Duration::from_millis(self.config.vector.embed_timeout_ms) }

    /// Store a document, index its chunks lexically right away and embed them
    /// in the background. Await [`Submission::embedded`] to observe the
    /// vector index update.
    #[tracing::instrument(skip_all, fields(locator = %document.locator, chunks = chunks.len()))]
    pub async fn submit(&self, document: NewDocument, chunks: Vec<NewChunk>) -> Result<Submission> {
        let (document_id, chunk_ids, pending) = {
            let mut store = self.store.write().await;
            let mut lexical = self.lexical_index.write().await;
            let (document_id, chunk_ids) = store.insert(document, chunks)?;
            let pending = index_new_chunks(&store, &mut lexical, &chunk_ids);
            (document_id, chunk_ids, pending)
        };
        tracing::info!(document = %document_id, chunks = chunk_ids.len(), "document stored");
        let handle = self.spawn_embedding(pending);
        Ok(Submission { document_id, chunk_ids, handle })
    }

    /// Submit many documents under a single acquisition of each writer lock.
    /// Every document is validated before any is stored.
    pub async fn submit_batch(&self, sources: Vec<SourceDocument>) -> Result<BatchSubmission> {
        for s in &sources {
            ChunkStore::validate(&s.document, &s.chunks)?;
        }
        let (documents, pending) = {
            let mut store = self.store.write().await;
            let mut lexical = self.lexical_index.write().await;
            let mut documents = Vec::with_capacity(sources.len());
            let mut pending = Vec::new();
            for s in sources {
                let (document_id, chunk_ids) = store.insert(s.document, s.chunks)?;
                pending.extend(index_new_chunks(&store, &mut lexical, &chunk_ids));
                documents.push((document_id, chunk_ids));
            }
            (documents, pending)
        };
        tracing::info!(documents = documents.len(), chunks = pending.len(), "batch stored");
        let handle = self.spawn_embedding(pending);
        Ok(BatchSubmission { documents, handle })
    }

    fn spawn_embedding(&self, pending: Vec<(ChunkId, String)>) -> EmbedTask {
        let embedder = Arc::clone(&self.embedder);
        let store = Arc::clone(&self.store);
        let vector_index = Arc::clone(&self.vector_index);
        let batch_size = self.config.embedding.batch_size;
        let timeout = self.embed_timeout();
        tokio::spawn(async move {
            let result =
                embed_and_upsert(embedder.as_ref(), &store, &vector_index, pending, batch_size, timeout).await;
            if let Err(e) = &result {
                tracing::warn!(error = %e, "background embedding failed; chunks stay lexical-only until backfill");
            }
            result
        })
    }

    /// Embed every stored chunk that has no vector yet.
    #[tracing::instrument(skip_all)]
    pub async fn backfill_embeddings(&self) -> Result<usize> {
        let pending: Vec<(ChunkId, String)> = {
            let store = self.store.read().await;
            let vectors = self.vector_index.read().await;
            store.chunks().filter(|c| !vectors.contains(c.id)).map(|c| (c.id, c.text.clone())).collect()
        };
        if pending.is_empty() {
            return Ok(0);
        }
        tracing::info!(pending = pending.len(), provider = self.embedder.embedder_id(), "backfilling embeddings");
        embed_and_upsert(
            self.embedder.as_ref(),
            &self.store,
            &self.vector_index,
            pending,
            self.config.embedding.batch_size,
            self.embed_timeout(),
        )
        .await
    }

    /// Remove one chunk from the store and both indexes.
    pub async fn remove_chunk(&self, id: ChunkId) -> Result<Chunk> {
        let mut store = self.store.write().await;
        let mut lexical = self.lexical_index.write().await;
        let mut vectors = self.vector_index.write().await;
        let chunk = store.remove_chunk(id).ok_or_else(|| Error::NotFound(id.to_string()))?;
        lexical.remove(id);
        vectors.remove(id);
        tracing::info!(chunk = %id, "chunk removed");
        Ok(chunk)
    }

    /// Remove a document and all of its chunks from the store and both indexes.
    pub async fn remove_document(&self, id: DocumentId) -> Result<(Document, Vec<Chunk>)> {
        let mut store = self.store.write().await;
        let mut lexical = self.lexical_index.write().await;
        let mut vectors = self.vector_index.write().await;
        let (document, chunks) = store.remove_document(id).ok_or_else(|| Error::NotFound(id.to_string()))?;
        for c in &chunks {
            lexical.remove(c.id);
            vectors.remove(c.id);
        }
        tracing::info!(document = %id, chunks = chunks.len(), "document removed");
        Ok((document, chunks))
    }

    pub async fn query(&self, request: QueryRequest) -> Result<QueryResponse> {
        self.query_with_cancellation(request, &CancellationToken::new()).await
    }

    /// Run the full pipeline. Cancelling `cancel` drops any in-flight
    /// retrieval or re-rank call and returns [`Error::Cancelled`].
    #[tracing::instrument(skip_all, fields(mode = %request.mode, k = ?request.k))]
    pub async fn query_with_cancellation(
        &self,
        request: QueryRequest,
        cancel: &CancellationToken,
    ) -> Result<QueryResponse> {
        let QueryRequest { text, k, filters, mode } = request;
        if text.trim().is_empty() {
            return Err(Error::InvalidQuery("query text is empty".into()));
        }
        if !text.chars().any(char::is_alphanumeric) && self.analyzer.tokenize(&text).is_empty() {
            return Err(Error::InvalidQuery(format!("query text has no searchable terms: {text:?}")));
        }
        let max_k = self.config.search.max_k;
        let k = k.unwrap_or(self.config.search.default_k);
        if k == 0 || k > max_k {
            return Err(Error::InvalidQuery(format!("k must be within 1..={max_k}, got {k}")));
        }

        let allowed = {
            let store = self.store.read().await;
            if store.is_empty() {
                return Err(Error::EmptyCorpus);
            }
            store.matching_chunks(&filters)
        };
        if allowed.as_ref().is_some_and(HashSet::is_empty) {
            tracing::debug!("filters match no chunks");
            return Ok(QueryResponse::empty(mode));
        }
        let query = RetrievalQuery { text, allowed: allowed.map(Arc::new) };

        let mut degradations = Vec::new();
        let (lexical_hits, vector_hits) = self.retrieve(&query, mode, cancel, &mut degradations).await?;
        let fused = reciprocal_rank_fusion(&lexical_hits, &vector_hits, &self.config.fusion);
        tracing::debug!(lexical = lexical_hits.len(), vector = vector_hits.len(), fused = fused.len(), "fused");
        if fused.is_empty() {
            let mut response = QueryResponse::empty(mode);
            response.degraded = !degradations.is_empty();
            response.degradations = degradations;
            return Ok(response);
        }

        let (ordered, rerank) = self.rerank(&query.text, fused, cancel, &mut degradations).await?;

        let store = self.store.read().await;
        let results: Vec<RankedResult> = ordered
            .into_iter()
            .filter_map(|(fused_rank, cand, rerank_score)| {
                let chunk = store.chunk(cand.chunk_id)?;
                Some(RankedResult {
                    chunk_id: cand.chunk_id,
                    document_id: chunk.document_id,
                    fused_score: cand.score,
                    provenance: Provenance {
                        lexical_rank: cand.lexical_rank,
                        vector_rank: cand.vector_rank,
                        fused_rank,
                        rerank_score,
                    },
                })
            })
            .take(k)
            .collect();
        let context = self.assembler.assemble(&results, &store);
        drop(store);

        tracing::debug!(results = results.len(), blocks = context.blocks.len(), "query complete");
        Ok(QueryResponse { mode, results, context, degraded: !degradations.is_empty(), degradations, rerank })
    }

    async fn retrieve(
        &self,
        query: &RetrievalQuery,
        mode: RetrievalMode,
        cancel: &CancellationToken,
        degradations: &mut Vec<Degradation>,
    ) -> Result<(Vec<Candidate>, Vec<Candidate>)> {
        let width = self.config.fusion.width;
        match mode {
            RetrievalMode::Hybrid => {
                let (lexical, vector) = tokio::select! {
                    biased;
                    () = cancel.cancelled() => return Err(Error::Cancelled),
                    pair = futures::future::join(self.lexical.search(query, width), self.vector.search(query, width)) => pair,
                };
                match (lexical, vector) {
                    (Ok(l), Ok(v)) => Ok((l, v)),
                    (Ok(l), Err(e)) => {
                        degrade_retriever(degradations, RetrieverKind::Vector, &e);
                        Ok((l, Vec::new()))
                    }
                    (Err(e), Ok(v)) => {
                        degrade_retriever(degradations, RetrieverKind::Lexical, &e);
                        Ok((Vec::new(), v))
                    }
                    (Err(le), Err(ve)) => {
                        tracing::warn!(lexical = %le, vector = %ve, "both retrievers failed");
                        Err(Error::IndexUnavailable(format!("lexical: {le}; vector: {ve}")))
                    }
                }
            }
            RetrievalMode::Lexical | RetrievalMode::Vector => {
                let retriever = if mode == RetrievalMode::Lexical { &self.lexical } else { &self.vector };
                let hits = tokio::select! {
                    biased;
                    () = cancel.cancelled() => return Err(Error::Cancelled),
                    hits = retriever.search(query, width) => hits,
                };
                let hits = hits.map_err(|e| {
                    tracing::warn!(retriever = %retriever.kind(), error = %e, "retriever failed");
                    Error::IndexUnavailable(format!("{} retriever: {e}", retriever.kind()))
                })?;
                Ok(if mode == RetrievalMode::Lexical { (hits, Vec::new()) } else { (Vec::new(), hits) })
            }
        }
    }

    /// Returns `(fused_rank, candidate, rerank_score)` in final order.
    async fn rerank(
        &self,
        query: &str,
        fused: Vec<FusedCandidate>,
        cancel: &CancellationToken,
        degradations: &mut Vec<Degradation>,
    ) -> Result<(Vec<(usize, FusedCandidate, Option<f32>)>, RerankStatus)> {
        let in_fused_order = |fused: Vec<FusedCandidate>| -> Vec<(usize, FusedCandidate, Option<f32>)> {
            fused.into_iter().enumerate().map(|(i, c)| (i + 1, c, None)).collect()
        };
        if !self.config.reranker.enabled {
            return Ok((in_fused_order(fused), RerankStatus::Disabled));
        }

        let texts: Vec<String> = {
            let store = self.store.read().await;
            fused.iter().map(|c| store.chunk(c.chunk_id).map(|ch| ch.text.clone()).unwrap_or_default()).collect()
        };
        let timeout = Duration::from_millis(self.config.reranker.timeout_ms);
        let scored = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Error::Cancelled),
            scored = score_shortlist(Arc::clone(&self.reranker), query.to_string(), texts, timeout) => scored,
        };
        match scored {
            Ok(scores) => {
                let mut slots: Vec<Option<FusedCandidate>> = fused.into_iter().map(Some).collect();
                let ordered = rerank_order(&scores)
                    .into_iter()
                    .filter_map(|i| slots[i].take().map(|c| (i + 1, c, Some(scores[i]))))
                    .collect();
                Ok((ordered, RerankStatus::Applied { backend: self.reranker.name().to_string() }))
            }
            Err(e) => {
                tracing::warn!(reranker = self.reranker.name(), error = %e, "re-rank failed, keeping fused order");
                let reason = e.to_string();
                degradations.push(Degradation::RerankFailed { reason: reason.clone() });
                Ok((in_fused_order(fused), RerankStatus::Failed { reason }))
            }
        }
    }

    /// Run the same request in every retrieval mode.
    pub async fn compare_modes(&self, request: &QueryRequest) -> Vec<(RetrievalMode, Result<QueryResponse>)> {
        let mut out = Vec::with_capacity(RetrievalMode::ALL.len());
        for mode in RetrievalMode::ALL {
            let response = self.query(request.clone().with_mode(mode)).await;
            out.push((mode, response));
        }
        out
    }

    pub async fn stats(&self) -> EngineStats {
        let store = self.store.read().await;
        let lexical = self.lexical_index.read().await;
        let vectors = self.vector_index.read().await;
        EngineStats {
            documents: store.document_count(),
            chunks: store.chunk_count(),
            chunks_by_source: store.chunk_count_by_source(),
            lexical_chunks: lexical.len(),
            lexical_terms: lexical.term_count(),
            vector_chunks: vectors.len(),
            embedder_id: self.embedder.embedder_id().to_string(),
            metric: vectors.metric(),
        }
    }

    pub async fn snapshot(&self) -> Snapshot {
        let store = self.store.read().await;
        let vectors = self.vector_index.read().await;
        Snapshot {
            version: SNAPSHOT_VERSION,
            store: store.clone(),
            embedder_id: Some(self.embedder.embedder_id().to_string()),
            metric: vectors.metric(),
            vectors: vectors.export(),
        }
    }

    pub async fn save_snapshot(&self, path: &Path) -> Result<()> {
        let snapshot = self.snapshot().await;
        let path: PathBuf = path.to_path_buf();
        tokio::task::spawn_blocking(move || snapshot.save(&path))
            .await
            .map_err(|e| Error::Persistence(e.to_string()))?
    }
}

fn degrade_retriever(degradations: &mut Vec<Degradation>, retriever: RetrieverKind, err: &Error) {
    tracing::warn!(retriever = %retriever, error = %err, "retriever failed, continuing with the other");
    degradations.push(Degradation::RetrieverFailed { retriever, reason: err.to_string() });
}

fn index_new_chunks(store: &ChunkStore, lexical: &mut Bm25Index, ids: &[ChunkId]) -> Vec<(ChunkId, String)> {
    let mut pending = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(chunk) = store.chunk(*id) {
            lexical.index(chunk);
            pending.push((chunk.id, chunk.text.clone()));
        }
    }
    pending
}

/// Embed `pending` outside any lock in batches of `batch_size`, each bounded
/// by `timeout`, then upsert the vectors of chunks that are still stored.
/// Stops at the first failed batch; vectors from earlier batches are kept.
async fn embed_and_upsert(
    embedder: &dyn EmbeddingProvider,
    store: &RwLock<ChunkStore>,
    vector_index: &RwLock<VectorIndex>,
    pending: Vec<(ChunkId, String)>,
    batch_size: usize,
    timeout: Duration,
) -> Result<usize> {
    let mut embedded = Vec::with_capacity(pending.len());
    let mut failure = None;
    for batch in pending.chunks(batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|(_, text)| text.clone()).collect();
        match embed_batch_with_timeout(embedder, &texts, timeout).await {
            Ok(vectors) => embedded.extend(batch.iter().map(|(id, _)| *id).zip(vectors)),
            Err(e) => {
                failure = Some(e);
                break;
            }
        }
    }

    let store = store.read().await;
    let mut vectors = vector_index.write().await;
    let mut stored = 0;
    for (id, v) in embedded {
        if !store.contains_chunk(id) {
            continue;
        }
        vectors.upsert(id, v)?;
        stored += 1;
    }
    drop(vectors);
    drop(store);
    tracing::debug!(stored, "vectors upserted");
    match failure {
        Some(e) => Err(e),
        None => Ok(stored),
    }
}
