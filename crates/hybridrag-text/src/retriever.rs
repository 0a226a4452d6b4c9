use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::RwLock;

use hybridrag_core::error::{Error, Result};
use hybridrag_core::traits::{RetrievalQuery, Retriever};
use hybridrag_core::types::{Candidate, RetrieverKind};

use crate::index::Bm25Index;

/// BM25 retriever sharing the engine's lexical index.
#[derive(Clone)]
pub struct LexicalRetriever {
    index: Arc<RwLock<Bm25Index>>,
}

impl LexicalRetriever {
    pub fn new(index: Arc<RwLock<Bm25Index>>) -> Self { Self { index } }

    pub fn index(&self) -> &Arc<RwLock<Bm25Index>> { &self.index }
}

impl Retriever for LexicalRetriever {
    fn kind(&self) -> RetrieverKind { RetrieverKind::Lexical }

    fn search<'a>(&'a self, query: &'a RetrievalQuery, k: usize) -> BoxFuture<'a, Result<Vec<Candidate>>> {
        Box::pin(async move {
            let index = self.index.read().await;
            if index.is_empty() {
                return Err(Error::IndexUnavailable("lexical index is empty".into()));
            }
            let tokens = index.analyzer().tokenize(&query.text);
            let hits = index.search(&tokens, k, query.allowed.as_deref());
            tracing::debug!(tokens = tokens.len(), hits = hits.len(), "lexical search");
            Ok(hits)
        })
    }
}
