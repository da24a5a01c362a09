//! # evstore Search
//!
//! Asynchronous full-text search sink for evstore.
//!
//! This crate provides:
//! - The search document for an event and the index mapping
//! - The NDJSON bulk body builder
//! - [`BulkIndexer`], a batching indexer with concurrent workers
//! - [`MirroredStore`], which follows every committed write into the index
//!
//! ## Architecture
//!
//! The event store is authoritative. The search index is a derived,
//! best-effort view:
//! 1. The transactional write commits first
//! 2. The event is queued on the indexer, which answers with a [`SinkTicket`]
//! 3. Batches are sent by `workers` tasks through a [`SearchClient`]
//!
//! ## Key Invariants
//!
//! - Documents are keyed by the hex event id, so re-indexing is an upsert
//! - Encrypted direct messages (kind 4) are never full-text searchable
//! - Deleting a missing document succeeds
//! - A sink failure never rolls back a committed write

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod client;
mod config;
mod document;
mod error;
mod indexer;
mod mirror;

pub use client::{MemorySearchClient, SearchClient};
pub use config::IndexerConfig;
pub use document::{
    bulk_body, index_mapping, BulkAction, BulkItemError, BulkItemResponse, IndexedEvent,
    ENCRYPTED_DM_KIND,
};
pub use error::{SearchError, SearchResult};
pub use indexer::{BulkIndexer, IndexerStats, SinkTicket};
pub use mirror::{MirrorError, MirroredStore};
