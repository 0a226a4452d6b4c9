//! hybridrag-text
//!
//! Lexical side of hybrid retrieval: the shared analyzer, an in-memory BM25
//! index and the `Retriever` adapter over it.
pub mod analyzer;
pub mod index;
pub mod retriever;

pub use analyzer::Analyzer;
pub use index::Bm25Index;
pub use retriever::LexicalRetriever;
