//! hybridrag-hybrid
//!
//! Hybrid retrieval pipeline: reciprocal rank fusion of the lexical and
//! vector rankings, a pluggable re-rank pass and citation assembly, behind
//! the [`HybridEngine`] facade.
pub mod citation;
pub mod engine;
pub mod fusion;
pub mod rerank;

pub use citation::{AssembledContext, Citation, CitationAssembler, GenerationPayload};
pub use engine::{
    BatchSubmission, Degradation, EngineBuilder, EngineStats, HybridEngine, QueryRequest, QueryResponse, RerankStatus,
    RetrievalMode, Submission,
};
pub use fusion::{reciprocal_rank_fusion, FusedCandidate};
pub use rerank::{build_reranker, KeywordReranker, PassthroughReranker};
