//! # evstore Storage
//!
//! Ordered key-value backends for the event store.
//!
//! This crate is the lowest layer of the store. Backends hold opaque byte
//! keys and values, partitioned into named address spaces, and offer
//! serialized write transactions with atomic commit. They know nothing about
//! events or index layouts.
//!
//! ## Design Principles
//!
//! - One capability contract ([`KvBackend`]) for every engine
//! - Range scans are callback-driven so cursors never outlive a call
//! - Record pointers are allocated by the backend and never reused
//! - Must be `Send + Sync` for concurrent access
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For testing and ephemeral storage
//! - [`RedbBackend`] - Persistent storage on redb
//!
//! ## Example
//!
//! ```rust
//! use evstore_storage::{Direction, InMemoryBackend, KeyRange, KvBackend, Space};
//! use std::ops::ControlFlow;
//!
//! let backend = InMemoryBackend::new();
//! let mut txn = backend.begin_write().unwrap();
//! let ptr = txn.next_pointer().unwrap();
//! txn.put(Space::Raw, ptr.as_bytes(), b"record").unwrap();
//! txn.commit().unwrap();
//!
//! let read = backend.begin_read().unwrap();
//! let mut n = 0;
//! read.scan(Space::Raw, &KeyRange::all(), Direction::Forward, &mut |_, _| {
//!     n += 1;
//!     ControlFlow::Continue(())
//! })
//! .unwrap();
//! assert_eq!(n, 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod memory;
mod redb_backend;

pub use backend::{
    prefix_successor, Direction, KeyRange, KvBackend, Pointer, ReadTxn, Space, Tuning, Visitor,
    WriteTxn, SERIAL_KEY,
};
pub use error::{StorageError, StorageResult};
pub use memory::InMemoryBackend;
pub use redb_backend::{RedbBackend, TUNING_CACHE_SIZE, TUNING_DURABILITY};
