//! Test fixtures and store helpers.
//!
//! Provides deterministic events and convenience functions for setting up
//! test stores.

use evstore_codec::{Event, EventId, PublicKey, Signature, Tag};
use evstore_core::{Config, EventStore};
use serde_json::json;
use sha2::{Digest, Sha256, Sha512};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Creation time used by default in fixtures.
pub const BASE_TIME: u64 = 1_700_000_000;

/// A test store with automatic cleanup.
pub struct TestStore {
    /// The store instance.
    pub store: EventStore,
    /// The temporary directory (kept alive to prevent cleanup).
    temp_dir: Option<TempDir>,
}

impl TestStore {
    /// Creates a new in-memory test store.
    pub fn memory() -> Self {
        Self {
            store: EventStore::open_in_memory().expect("Failed to open in-memory store"),
            temp_dir: None,
        }
    }

    /// Creates a new redb-backed store in a temporary directory.
    pub fn redb() -> Self {
        Self::redb_with(Config::default())
    }

    /// Creates a new redb-backed store with `config`.
    pub fn redb_with(config: Config) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = EventStore::open(&temp_dir.path().join("store"), config)
            .expect("Failed to open redb store");
        Self {
            store,
            temp_dir: Some(temp_dir),
        }
    }

    /// Returns the data directory if on disk, None if in-memory.
    pub fn path(&self) -> Option<PathBuf> {
        self.temp_dir.as_ref().map(|d| d.path().join("store"))
    }

    /// Closes the store and keeps its directory alive for a reopen.
    pub fn close(self) -> Option<TempDir> {
        self.store.close().expect("Failed to close store");
        self.temp_dir
    }
}

impl std::ops::Deref for TestStore {
    type Target = EventStore;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

/// Runs a test with a temporary in-memory store.
///
/// # Example
///
/// ```rust
/// use evstore_testkit::{event, with_temp_store};
///
/// with_temp_store(|store| {
///     store.save(&event(1)).unwrap();
///     assert!(store.contains(&event(1).id).unwrap());
/// });
/// ```
pub fn with_temp_store<F, R>(f: F) -> R
where
    F: FnOnce(&EventStore) -> R,
{
    let test_store = TestStore::memory();
    f(&test_store.store)
}

/// Runs a test with a temporary redb store and its data directory.
pub fn with_redb_store<F, R>(f: F) -> R
where
    F: FnOnce(&EventStore, &Path) -> R,
{
    let test_store = TestStore::redb();
    let path = test_store.path().expect("redb store should have a path");
    f(&test_store.store, &path)
}

/// Deterministic author key for `seed`.
pub fn author(seed: u8) -> PublicKey {
    let mut key = [0u8; 32];
    key.copy_from_slice(&Sha256::digest([b'a', seed]));
    PublicKey::from_bytes(key)
}

/// Builds events whose id is derived from their content, so equal inputs
/// always produce equal events.
#[derive(Debug, Clone)]
pub struct EventBuilder {
    pubkey: PublicKey,
    created_at: u64,
    kind: u32,
    tags: Vec<Tag>,
    content: String,
}

impl Default for EventBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBuilder {
    /// Starts a kind 1 note by author 0 at [`BASE_TIME`].
    pub fn new() -> Self {
        Self {
            pubkey: author(0),
            created_at: BASE_TIME,
            kind: 1,
            tags: Vec::new(),
            content: String::new(),
        }
    }

    /// Sets the author.
    pub fn pubkey(mut self, pubkey: PublicKey) -> Self {
        self.pubkey = pubkey;
        self
    }

    /// Sets the creation time.
    pub fn created_at(mut self, created_at: u64) -> Self {
        self.created_at = created_at;
        self
    }

    /// Sets the kind.
    pub fn kind(mut self, kind: u32) -> Self {
        self.kind = kind;
        self
    }

    /// Appends a two-element tag.
    pub fn tag(mut self, name: &str, value: &str) -> Self {
        self.tags.push(vec![name.to_owned(), value.to_owned()]);
        self
    }

    /// Appends an arbitrary tag.
    pub fn raw_tag(mut self, tag: Tag) -> Self {
        self.tags.push(tag);
        self
    }

    /// Sets the content.
    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    /// Builds the event. The id hashes the canonical serialization and the
    /// signature is a stand-in derived from the id.
    pub fn build(self) -> Event {
        let canonical = json!([
            0,
            self.pubkey.to_hex(),
            self.created_at,
            self.kind,
            self.tags,
            self.content
        ]);
        let mut id = [0u8; 32];
        id.copy_from_slice(&Sha256::digest(canonical.to_string().as_bytes()));
        let mut sig = [0u8; 64];
        sig.copy_from_slice(&Sha512::digest(id));
        Event {
            id: EventId::from_bytes(id),
            pubkey: self.pubkey,
            created_at: self.created_at,
            kind: self.kind,
            tags: self.tags,
            content: self.content,
            sig: Signature::from_bytes(sig),
        }
    }
}

/// A distinct kind 1 note for `seed`, created `seed` seconds after
/// [`BASE_TIME`].
pub fn event(seed: u64) -> Event {
    EventBuilder::new()
        .created_at(BASE_TIME + seed)
        .content(format!("note {seed}"))
        .build()
}

/// `count` distinct notes with increasing creation times.
pub fn events(count: u64) -> Vec<Event> {
    (0..count).map(event).collect()
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// Creates a store holding `count` events spread over three authors,
    /// kinds 1 and 7, and a shared `t` tag.
    pub fn populated_store(count: u64) -> TestStore {
        let test_store = TestStore::memory();
        for ev in mixed_events(count) {
            test_store.store.save(&ev).expect("Failed to save event");
        }
        test_store
    }

    /// The events saved by [`populated_store`].
    pub fn mixed_events(count: u64) -> Vec<Event> {
        (0..count)
            .map(|i| {
                EventBuilder::new()
                    .pubkey(author((i % 3) as u8))
                    .kind(if i % 2 == 0 { 1 } else { 7 })
                    .created_at(BASE_TIME + i)
                    .tag("t", "fixture")
                    .content(format!("mixed {i}"))
                    .build()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evstore_core::IndexScan;

    #[test]
    fn builder_is_deterministic() {
        let a = EventBuilder::new().content("x").tag("t", "y").build();
        let b = EventBuilder::new().content("x").tag("t", "y").build();
        assert_eq!(a, b);
        let c = EventBuilder::new().content("x").tag("t", "z").build();
        assert_ne!(a.id, c.id);
    }

    #[test]
    fn events_are_distinct() {
        let all = events(50);
        let mut ids: Vec<_> = all.iter().map(|e| e.id).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 50);
    }

    #[test]
    fn with_temp_store_works() {
        with_temp_store(|store| {
            store.save(&event(1)).unwrap();
            assert!(store.contains(&event(1).id).unwrap());
        });
    }

    #[test]
    fn populated_scenario() {
        let test_store = scenarios::populated_store(12);
        let notes = test_store.scan(&IndexScan::kind(1)).unwrap();
        assert_eq!(notes.len(), 6);
        let by_author = test_store.scan(&IndexScan::pubkey(&author(0))).unwrap();
        assert_eq!(by_author.len(), 4);
    }

    #[test]
    fn redb_store_has_path() {
        with_redb_store(|store, path| {
            store.save(&event(2)).unwrap();
            assert!(path.exists());
        });
    }
}
