//! A store that mirrors committed writes into the search index.

use crate::error::SearchError;
use crate::indexer::BulkIndexer;
use evstore_codec::Event;
use evstore_core::{CoreError, CoreResult, EventStore};
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinError;
use tracing::warn;

/// Errors from a mirrored write.
#[derive(Error, Debug)]
pub enum MirrorError {
    /// The transactional write failed; nothing was sent to the sink.
    #[error("store error: {0}")]
    Store(#[from] CoreError),

    /// The write committed but the search index did not accept it.
    #[error("committed, but search sink failed: {0}")]
    Sink(#[source] SearchError),

    /// The blocking store call did not run to completion.
    #[error("store task failed: {0}")]
    Task(#[from] JoinError),
}

impl MirrorError {
    /// Returns true if the primary write is durable despite this error.
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Sink(_))
    }
}

/// Runs every save and delete against the store, then against the sink.
///
/// The store is the source of truth: the sink only sees writes that
/// committed, and a sink failure never undoes one.
#[derive(Debug)]
pub struct MirroredStore {
    store: Arc<EventStore>,
    sink: BulkIndexer,
}

impl MirroredStore {
    /// Pairs a store with a running indexer.
    pub fn new(store: EventStore, sink: BulkIndexer) -> Self {
        Self {
            store: Arc::new(store),
            sink,
        }
    }

    /// The underlying store, for reads and scans.
    pub fn store(&self) -> &EventStore {
        &self.store
    }

    /// The indexer.
    pub fn sink(&self) -> &BulkIndexer {
        &self.sink
    }

    /// Runs a store call on the blocking pool.
    async fn run_blocking<F>(&self, op: F) -> Result<(), MirrorError>
    where
        F: FnOnce(&EventStore) -> CoreResult<()> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || op(&store)).await??;
        Ok(())
    }

    /// Saves `event`, then waits for it to be indexed.
    ///
    /// # Errors
    ///
    /// Returns `Store` if the save failed (duplicates included) and `Sink`
    /// if only the indexing failed.
    pub async fn save(&self, event: &Event) -> Result<(), MirrorError> {
        let owned = event.clone();
        self.run_blocking(move |store| store.save(&owned)).await?;
        self.sink.index(event).await.map_err(|e| {
            warn!("event {} stored but not indexed: {}", event.id, e);
            MirrorError::Sink(e)
        })
    }

    /// Deletes `event`, then waits for its document to be removed.
    ///
    /// # Errors
    ///
    /// Returns `Store` if the delete failed and `Sink` if only the document
    /// removal failed.
    pub async fn delete(&self, event: &Event) -> Result<(), MirrorError> {
        let owned = event.clone();
        self.run_blocking(move |store| store.delete(&owned)).await?;
        self.sink.delete(&event.id).await.map_err(|e| {
            warn!("event {} deleted but still indexed: {}", event.id, e);
            MirrorError::Sink(e)
        })
    }

    /// Drains the indexer and closes the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails to close.
    pub async fn close(self) -> Result<(), MirrorError> {
        self.sink.close().await;
        match Arc::try_unwrap(self.store) {
            Ok(store) => store.close()?,
            Err(shared) => shared.flush()?,
        }
        Ok(())
    }
}
