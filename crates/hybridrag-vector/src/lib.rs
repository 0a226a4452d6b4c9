//! hybridrag-vector
//!
//! Semantic side of hybrid retrieval: an exact vector index (cosine or dot)
//! and a `Retriever` that embeds queries through an `EmbeddingProvider`.
pub mod index;
pub mod retriever;

pub use index::VectorIndex;
pub use retriever::{embed_batch_with_timeout, embed_with_timeout, VectorRetriever};
