use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// No chunks have been indexed yet.
    #[error("Corpus is empty: no chunks have been indexed")]
    EmptyCorpus,

    /// A retriever's backing structure cannot be queried.
    #[error("Index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("{provider} timed out after {timeout_ms} ms")]
    ProviderTimeout { provider: String, timeout_ms: u64 },

    #[error("{provider} failed: {message}")]
    ProviderError { provider: String, message: String },

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Persistence failed: {0}")]
    Persistence(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn provider(provider: impl Into<String>, err: &anyhow::Error) -> Self {
        Self::ProviderError { provider: provider.into(), message: format!("{err:#}") }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
