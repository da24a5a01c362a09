//! Error types for evstore core.

use evstore_codec::EventId;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in evstore core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] evstore_storage::StorageError),

    /// Record codec error.
    #[error("codec error: {0}")]
    Codec(#[from] evstore_codec::CodecError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A record field is outside the storable range.
    #[error("invalid event: {message}")]
    Validation {
        /// Which bound was violated.
        message: String,
    },

    /// An event with the same id is already stored.
    #[error("duplicate event {id}")]
    DuplicateEvent {
        /// Id of the rejected event.
        id: EventId,
    },

    /// No event with this id is stored.
    #[error("event not found: {id}")]
    NotFound {
        /// The id that was looked up.
        id: EventId,
    },

    /// The data directory stayed locked for the whole open timeout.
    #[error("database at {} still locked after {waited:?}", path.display())]
    ResourceLocked {
        /// Data directory path.
        path: PathBuf,
        /// How long the open waited.
        waited: Duration,
    },

    /// A migration step failed; its writes were discarded.
    #[error("migration failed: {message}")]
    MigrationFailed {
        /// Description of the failure.
        message: String,
    },

    /// The stored layout is newer than this build understands.
    #[error("unsupported layout version {found}, newest known is {supported}")]
    UnsupportedVersion {
        /// Version marker found in storage.
        found: u64,
        /// Newest version this build can migrate to.
        supported: u64,
    },

    /// The operation was cancelled before commit.
    #[error("operation cancelled")]
    Cancelled,

    /// Invalid database format or directory layout.
    #[error("invalid database format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },
}

impl CoreError {
    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates a migration failed error.
    pub fn migration_failed(message: impl Into<String>) -> Self {
        Self::MigrationFailed {
            message: message.into(),
        }
    }

    /// Returns true if the event was rejected as already stored.
    #[must_use]
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::DuplicateEvent { .. })
    }

    /// Returns true if the targeted event is not stored.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns true if the write did not land and retrying the same event
    /// cannot make it land as new: a duplicate, or a save cancelled by the
    /// caller.
    #[must_use]
    pub fn is_not_stored(&self) -> bool {
        matches!(self, Self::DuplicateEvent { .. } | Self::Cancelled)
    }
}
