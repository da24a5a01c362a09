//! Configuration for the bulk indexer.

use crate::error::{SearchError, SearchResult};
use std::time::Duration;

/// Configuration for a [`BulkIndexer`](crate::BulkIndexer).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexerConfig {
    /// Target index name.
    pub index: String,
    /// Number of queued requests that triggers a flush.
    pub batch_size: usize,
    /// Upper bound on how long a request waits in a partial batch.
    pub flush_interval: Duration,
    /// Number of concurrent bulk requests.
    pub workers: usize,
}

impl IndexerConfig {
    /// Creates a configuration for `index` with default tuning.
    pub fn new(index: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            batch_size: 256,
            flush_interval: Duration::from_secs(3),
            workers: 2,
        }
    }

    /// Sets the batch size.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Sets the flush interval.
    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Sets the number of workers.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Checks that every setting is usable.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` naming the first bad setting.
    pub fn validate(&self) -> SearchResult<()> {
        if self.index.is_empty() {
            return Err(SearchError::InvalidConfig("index name is empty".into()));
        }
        if self.batch_size == 0 {
            return Err(SearchError::InvalidConfig("batch_size must be positive".into()));
        }
        if self.workers == 0 {
            return Err(SearchError::InvalidConfig("workers must be positive".into()));
        }
        if self.flush_interval.is_zero() {
            return Err(SearchError::InvalidConfig(
                "flush_interval must be positive".into(),
            ));
        }
        Ok(())
    }
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self::new("events")
    }
}
