//! Store configuration.

use evstore_storage::Tuning;
use std::time::Duration;

/// Which engine backs an opened store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    /// Volatile, prefix-partitioned in-memory map.
    Memory,
    /// Persistent redb file inside the data directory.
    #[default]
    Redb,
}

/// Configuration for opening a store.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether to create the data directory if it doesn't exist.
    pub create_if_missing: bool,

    /// Upper bound on the number of events a single scan returns.
    pub max_limit: usize,

    /// How long to wait for another handle to release the data directory.
    pub open_timeout: Duration,

    /// Engine used by [`crate::EventStore::open`].
    pub backend: BackendKind,

    /// Opaque engine options, passed through to the backend.
    pub tuning: Tuning,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            max_limit: 500,
            open_timeout: Duration::from_secs(20),
            backend: BackendKind::Redb,
            tuning: Tuning::new(),
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the data directory if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets the scan result cap.
    #[must_use]
    pub const fn max_limit(mut self, limit: usize) -> Self {
        self.max_limit = limit;
        self
    }

    /// Sets the lock wait timeout.
    #[must_use]
    pub const fn open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = timeout;
        self
    }

    /// Sets the backing engine.
    #[must_use]
    pub const fn backend(mut self, kind: BackendKind) -> Self {
        self.backend = kind;
        self
    }

    /// Adds one engine tuning option.
    #[must_use]
    pub fn tuning(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tuning.insert(key.into(), value.into());
        self
    }
}
