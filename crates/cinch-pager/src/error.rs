//! Error type shared by the buffer, the page store, and both paging engines.

/// Result alias for paging operations.
pub type Result<T> = std::result::Result<T, PagingError>;

/// Errors surfaced by paging operations.
///
/// Most degraded states (tiny messages, dimension mismatches, empty
/// retrieval, missing snapshots) are handled internally with a log line and
/// never reach the caller. What remains here are failures the caller must
/// see: a page that could not be written, or a capability that could not run.
#[derive(Debug, thiserror::Error)]
pub enum PagingError {
    /// Reading or writing the storage directory failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A page or snapshot could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The injected embedding capability failed.
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// An embedding had the wrong number of components.
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    Dimension { expected: usize, actual: usize },

    /// A configuration value is out of range.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl PagingError {
    pub fn embedding(msg: impl Into<String>) -> Self {
        PagingError::Embedding(msg.into())
    }
}

impl From<reqwest::Error> for PagingError {
    fn from(err: reqwest::Error) -> Self {
        PagingError::Embedding(err.to_string())
    }
}
