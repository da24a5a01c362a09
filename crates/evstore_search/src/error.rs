//! Error types for the search sink.

use thiserror::Error;

/// Result type for search sink operations.
pub type SearchResult<T> = Result<T, SearchError>;

/// Errors that can occur while mirroring events into a search index.
#[derive(Error, Debug)]
pub enum SearchError {
    /// The client could not complete the request at all.
    #[error("search client error: {0}")]
    Client(String),

    /// The index answered with a failure status for one item.
    #[error("rejected with status {status}: {reason}")]
    Rejected {
        /// HTTP-style status code.
        status: u16,
        /// Error type and reason reported by the index.
        reason: String,
    },

    /// The indexer stopped before the request reached a terminal state.
    #[error("indexer closed")]
    Closed,

    /// A document or bulk body could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid indexer configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl SearchError {
    /// Creates a client error.
    pub fn client(message: impl Into<String>) -> Self {
        Self::Client(message.into())
    }

    /// Creates a rejection.
    pub fn rejected(status: u16, reason: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            reason: reason.into(),
        }
    }

    /// Returns true if the index already existed when it was created.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::Rejected { reason, .. } if reason.contains("resource_already_exists_exception"))
    }

    /// Returns true if this error is a not-found rejection.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Rejected { status: 404, .. })
    }
}
