//! # evstore Core
//!
//! Write path, secondary indexes and layout management for evstore.
//!
//! This crate provides:
//! - [`EventStore`], which stores each event once and makes it reachable
//!   through seven index families inside one atomic transaction
//! - The index key codec ([`index_keys`]) and single-family [`IndexScan`]s
//! - A migration runner that versions the stored layout
//! - Data directory locking and store [`Config`]
//!
//! Engines plug in through [`evstore_storage::KvBackend`]; nothing in this
//! crate depends on a particular engine's behavior.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cancel;
mod config;
mod dir;
mod error;
mod index;
pub mod migration;
mod store;

pub use cancel::CancelToken;
pub use config::{BackendKind, Config};
pub use dir::DataDir;
pub use error::{CoreError, CoreResult};
pub use index::{
    classify_tag, find_pointer, id_key, index_keys, put_index_entries, remove_index_entries,
    validate, IndexFamily, IndexKey, IndexScan, TagValue, MAX_CREATED_AT, MAX_KIND,
    MAX_TAG_VALUE_LEN,
};
pub use migration::{
    Migration, MigrationContext, MigrationInfo, MigrationManager, MigrationResult,
    MigrationRunResult, MigrationVersion, RebuildIndexes,
};
pub use store::{write_event, EventStore};

/// Crate version, reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
