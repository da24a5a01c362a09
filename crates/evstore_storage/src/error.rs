//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The underlying engine reported a failure.
    #[error("engine error: {0}")]
    Engine(String),

    /// Stored bytes do not have the expected layout.
    #[error("storage corrupted: {0}")]
    Corrupted(String),

    /// The pointer counter has no values left.
    #[error("pointer sequence exhausted")]
    SequenceExhausted,

    /// Another handle holds the database open.
    #[error("database is locked by another handle")]
    Locked,

    /// A tuning option has an unusable value.
    #[error("invalid tuning option {key}: {value}")]
    InvalidTuning {
        /// Option name.
        key: String,
        /// Offending value.
        value: String,
    },
}

impl StorageError {
    /// Create an engine error from any displayable failure.
    pub fn engine(err: impl std::fmt::Display) -> Self {
        Self::Engine(err.to_string())
    }
}
