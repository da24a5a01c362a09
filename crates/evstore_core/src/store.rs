//! The event store handle.

use crate::cancel::CancelToken;
use crate::config::{BackendKind, Config};
use crate::dir::DataDir;
use crate::error::{CoreError, CoreResult};
use crate::index::{
    find_pointer, id_key, put_index_entries, remove_index_entries, validate, IndexScan,
};
use crate::migration::{MigrationManager, MigrationRunResult};
use evstore_codec::{decode_event, encode_event, Event, EventId};
use evstore_storage::{
    InMemoryBackend, KvBackend, Pointer, RedbBackend, Space, StorageError, WriteTxn,
};
use std::ops::ControlFlow;
use std::path::Path;
use tracing::{debug, info, instrument, warn};

/// An open event store.
///
/// Owns its backend and, for on-disk stores, the data directory lock. There
/// is no global handle: open one explicitly and drop or [`close`] it.
///
/// [`close`]: EventStore::close
///
/// # Example
///
/// ```rust
/// use evstore_codec::{Event, EventId, PublicKey, Signature};
/// use evstore_core::{EventStore, IndexScan};
///
/// let store = EventStore::open_in_memory().unwrap();
/// let event = Event {
///     id: EventId::from_bytes([1; 32]),
///     pubkey: PublicKey::from_bytes([2; 32]),
///     created_at: 1_700_000_000,
///     kind: 1,
///     tags: vec![],
///     content: "hello".into(),
///     sig: Signature::from_bytes([3; 64]),
/// };
///
/// store.save(&event).unwrap();
/// assert!(store.save(&event).unwrap_err().is_duplicate());
/// assert_eq!(store.scan(&IndexScan::kind(1)).unwrap(), vec![event]);
/// ```
pub struct EventStore {
    backend: Box<dyn KvBackend>,
    config: Config,
    migrations: MigrationRunResult,
    dir: Option<DataDir>,
}

impl std::fmt::Debug for EventStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStore")
            .field("backend", &self.backend.name())
            .field("dir", &self.dir.as_ref().map(DataDir::path))
            .field("version", &self.migrations.final_version)
            .finish()
    }
}

impl EventStore {
    /// Opens the store at `path` with the configured backend.
    ///
    /// For [`BackendKind::Redb`] this takes the directory lock (waiting up to
    /// [`Config::open_timeout`]) and opens `<path>/events.redb`. For
    /// [`BackendKind::Memory`] the path is ignored. Pending migrations run
    /// before the store is returned.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ResourceLocked`] if the directory stays locked,
    /// [`CoreError::UnsupportedVersion`] for a newer layout, or any storage
    /// or migration error.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn open(path: &Path, config: Config) -> CoreResult<Self> {
        match config.backend {
            BackendKind::Memory => Self::with_backend(Box::new(InMemoryBackend::new()), config),
            BackendKind::Redb => {
                let dir = DataDir::open(path, config.create_if_missing, config.open_timeout)?;
                let backend = RedbBackend::open(&dir.engine_path(), &config.tuning).map_err(
                    |e| match e {
                        StorageError::Locked => CoreError::ResourceLocked {
                            path: path.to_path_buf(),
                            waited: config.open_timeout,
                        },
                        other => CoreError::Storage(other),
                    },
                )?;
                let mut store = Self::open_with(
                    Box::new(backend),
                    config,
                    &MigrationManager::builtin(),
                )?;
                store.dir = Some(dir);
                Ok(store)
            }
        }
    }

    /// Opens a volatile store with default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the initial migration run fails.
    pub fn open_in_memory() -> CoreResult<Self> {
        Self::with_backend(
            Box::new(InMemoryBackend::new()),
            Config::default().backend(BackendKind::Memory),
        )
    }

    /// Wraps an existing backend, running the built-in migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if a migration fails.
    pub fn with_backend(backend: Box<dyn KvBackend>, config: Config) -> CoreResult<Self> {
        Self::open_with(backend, config, &MigrationManager::builtin())
    }

    /// Wraps an existing backend, running `migrations`.
    ///
    /// # Errors
    ///
    /// Returns an error if a migration fails.
    pub fn open_with(
        backend: Box<dyn KvBackend>,
        config: Config,
        migrations: &MigrationManager,
    ) -> CoreResult<Self> {
        let result = migrations.run_pending(backend.as_ref())?;
        info!(
            backend = backend.name(),
            version = result.final_version,
            applied = result.applied_count(),
            "event store opened"
        );
        Ok(Self {
            backend,
            config,
            migrations: result,
            dir: None,
        })
    }

    /// Returns the configuration the store was opened with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the backend.
    #[must_use]
    pub fn backend(&self) -> &dyn KvBackend {
        self.backend.as_ref()
    }

    /// Returns what the migration run at open did.
    #[must_use]
    pub fn migrations(&self) -> &MigrationRunResult {
        &self.migrations
    }

    /// Returns the data directory path for on-disk stores.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.dir.as_ref().map(DataDir::path)
    }

    /// Stores an event and all of its index entries atomically.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Validation`] for out-of-range fields (nothing is
    /// opened), [`CoreError::DuplicateEvent`] if the id is already stored, or
    /// a storage error. On any error nothing is written.
    pub fn save(&self, event: &Event) -> CoreResult<()> {
        self.save_with_cancel(event, &CancelToken::new())
    }

    /// Like [`EventStore::save`], aborting with [`CoreError::Cancelled`] if
    /// `cancel` is set before commit.
    ///
    /// # Errors
    ///
    /// See [`EventStore::save`].
    #[instrument(skip_all, fields(id = %event.id, kind = event.kind))]
    pub fn save_with_cancel(&self, event: &Event, cancel: &CancelToken) -> CoreResult<()> {
        validate(event)?;

        let mut txn = self.backend.begin_write()?;
        if find_pointer(&*txn, &event.id)?.is_some() {
            txn.abort();
            return Err(CoreError::DuplicateEvent { id: event.id });
        }

        let bytes = encode_event(event)?;
        let pointer = txn.next_pointer()?;
        txn.put(Space::Raw, pointer.as_bytes(), &bytes)?;
        let entries = put_index_entries(&mut *txn, event, &pointer)?;

        if cancel.is_cancelled() {
            txn.abort();
            return Err(CoreError::Cancelled);
        }
        txn.commit()?;

        debug!(pointer = pointer.counter(), entries, "saved event");
        Ok(())
    }

    /// Removes an event and all of its index entries atomically.
    ///
    /// Deleting an event that is not stored succeeds without writing.
    ///
    /// # Errors
    ///
    /// Returns a storage or codec error; nothing is removed in that case.
    pub fn delete(&self, event: &Event) -> CoreResult<()> {
        self.delete_with_cancel(event, &CancelToken::new())
    }

    /// Like [`EventStore::delete`], aborting with [`CoreError::Cancelled`] if
    /// `cancel` is set before commit.
    ///
    /// # Errors
    ///
    /// See [`EventStore::delete`].
    #[instrument(skip_all, fields(id = %event.id))]
    pub fn delete_with_cancel(&self, event: &Event, cancel: &CancelToken) -> CoreResult<()> {
        self.delete_inner(&event.id, Some(event), cancel).map(|_| ())
    }

    /// Removes the stored event with this id.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] if nothing is stored under `id`, or a
    /// storage or codec error; nothing is removed in either case.
    #[instrument(skip_all, fields(id = %id))]
    pub fn delete_by_id(&self, id: &EventId) -> CoreResult<()> {
        if self.delete_inner(id, None, &CancelToken::new())? {
            Ok(())
        } else {
            Err(CoreError::NotFound { id: *id })
        }
    }

    fn delete_inner(
        &self,
        id: &EventId,
        given: Option<&Event>,
        cancel: &CancelToken,
    ) -> CoreResult<bool> {
        let mut txn = self.backend.begin_write()?;
        let Some(pointer) = find_pointer(&*txn, id)? else {
            txn.abort();
            debug!("event not stored, nothing to delete");
            return Ok(false);
        };

        // Keys are recomputed from the stored record when it is readable.
        let stored = match txn.get(Space::Raw, pointer.as_bytes())? {
            Some(bytes) => Some(decode_event(&bytes)?),
            None => None,
        };
        let removed = match stored.as_ref().or(given) {
            Some(event) => remove_index_entries(&mut *txn, event, &pointer)?,
            None => {
                warn!(pointer = pointer.counter(), "id entry without a stored record");
                txn.delete(Space::Id, &id_key(id, &pointer))?;
                1
            }
        };
        txn.delete(Space::Raw, pointer.as_bytes())?;

        if cancel.is_cancelled() {
            txn.abort();
            return Err(CoreError::Cancelled);
        }
        txn.commit()?;

        debug!(pointer = pointer.counter(), removed, "deleted event");
        Ok(true)
    }

    /// Loads an event by id.
    ///
    /// # Errors
    ///
    /// Returns a storage or codec error.
    pub fn get(&self, id: &EventId) -> CoreResult<Option<Event>> {
        let read = self.backend.begin_read()?;
        let Some(pointer) = find_pointer(&*read, id)? else {
            return Ok(None);
        };
        match read.get(Space::Raw, pointer.as_bytes())? {
            Some(bytes) => Ok(Some(decode_event(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Returns true if an event with this id is stored.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub fn contains(&self, id: &EventId) -> CoreResult<bool> {
        let read = self.backend.begin_read()?;
        Ok(find_pointer(&*read, id)?.is_some())
    }

    /// Runs a single-family index scan.
    ///
    /// Results follow the scan direction and are capped at the smaller of
    /// the scan limit and [`Config::max_limit`].
    ///
    /// # Errors
    ///
    /// Returns a storage or codec error.
    #[instrument(skip_all, fields(family = ?scan.family()))]
    pub fn scan(&self, scan: &IndexScan) -> CoreResult<Vec<Event>> {
        let limit = scan.effective_limit(self.config.max_limit);
        if limit == 0 {
            return Ok(Vec::new());
        }

        let read = self.backend.begin_read()?;
        let mut pointers = Vec::new();
        read.scan(
            scan.family().space(),
            &scan.key_range(),
            scan.scan_direction(),
            &mut |key, value| {
                if scan.matches(key, value.len()) {
                    pointers.push(value.to_vec());
                    if pointers.len() >= limit {
                        return ControlFlow::Break(());
                    }
                }
                ControlFlow::Continue(())
            },
        )?;

        let mut events = Vec::with_capacity(pointers.len());
        for raw_pointer in pointers {
            let pointer = Pointer::from_bytes(&raw_pointer)?;
            match read.get(Space::Raw, pointer.as_bytes())? {
                Some(bytes) => events.push(decode_event(&bytes)?),
                None => warn!(pointer = pointer.counter(), "index entry without a stored record"),
            }
        }
        Ok(events)
    }

    /// Counts the entries of one space.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub fn count(&self, space: Space) -> CoreResult<usize> {
        let read = self.backend.begin_read()?;
        Ok(read.count(space)?)
    }

    /// Flushes the backend.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub fn flush(&self) -> CoreResult<()> {
        Ok(self.backend.flush()?)
    }

    /// Flushes and closes the store, releasing the directory lock.
    ///
    /// # Errors
    ///
    /// Returns a storage error from the final flush.
    pub fn close(self) -> CoreResult<()> {
        self.flush()?;
        debug!(backend = self.backend.name(), "event store closed");
        Ok(())
    }
}

/// Writes an event the way [`EventStore::save`] does, inside a caller-owned
/// transaction, skipping the duplicate check.
///
/// Used by bulk loaders that already know the ids are new.
///
/// # Errors
///
/// Returns a validation, codec or storage error; the caller must abort.
pub fn write_event<T: WriteTxn + ?Sized>(txn: &mut T, event: &Event) -> CoreResult<Pointer> {
    validate(event)?;
    let bytes = encode_event(event)?;
    let pointer = txn.next_pointer()?;
    txn.put(Space::Raw, pointer.as_bytes(), &bytes)?;
    put_index_entries(txn, event, &pointer)?;
    Ok(pointer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use evstore_codec::{PublicKey, Signature, Tag};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;
    use tempfile::tempdir;

    const HEX32: &str = "5c83da77af1dec6d7289834998ad7aafbd9e2191396d75ec3cc27f5a77226f36";

    fn event(seed: u8, kind: u32, created_at: u64, tags: Vec<Tag>) -> Event {
        Event {
            id: EventId::from_bytes([seed; 32]),
            pubkey: PublicKey::from_bytes([0xaa; 32]),
            created_at,
            kind,
            tags,
            content: format!("event {seed}"),
            sig: Signature::from_bytes([0; 64]),
        }
    }

    fn total_index_entries(store: &EventStore) -> usize {
        Space::ALL
            .iter()
            .filter(|s| !matches!(s, Space::Raw | Space::Settings))
            .map(|s| store.count(*s).unwrap())
            .sum()
    }

    #[test]
    fn save_writes_record_and_entries() {
        let store = EventStore::open_in_memory().unwrap();
        let ev = event(1, 1, 100, vec![vec!["t".into(), "bitcoin".into()]]);
        store.save(&ev).unwrap();

        assert_eq!(store.count(Space::Raw).unwrap(), 1);
        assert_eq!(total_index_entries(&store), 6);
        assert_eq!(store.get(&ev.id).unwrap(), Some(ev));
    }

    #[test]
    fn duplicate_save_is_rejected_and_stores_once() {
        let store = EventStore::open_in_memory().unwrap();
        let ev = event(1, 1, 100, vec![]);
        store.save(&ev).unwrap();

        let err = store.save(&ev).unwrap_err();
        assert!(matches!(err, CoreError::DuplicateEvent { id } if id == ev.id));
        assert_eq!(store.count(Space::Raw).unwrap(), 1);
        assert_eq!(total_index_entries(&store), 5);
    }

    #[test]
    fn out_of_range_fields_are_rejected() {
        let store = EventStore::open_in_memory().unwrap();
        assert!(matches!(
            store.save(&event(1, 70_000, 1, vec![])),
            Err(CoreError::Validation { .. })
        ));
        assert!(matches!(
            store.save(&event(1, 1, u64::from(u32::MAX) + 1, vec![])),
            Err(CoreError::Validation { .. })
        ));
        assert_eq!(store.count(Space::Raw).unwrap(), 0);
    }

    #[test]
    fn delete_removes_everything_and_is_idempotent() {
        let store = EventStore::open_in_memory().unwrap();
        let ev = event(1, 1, 100, vec![vec!["e".into(), HEX32.into()]]);
        store.save(&ev).unwrap();

        store.delete(&ev).unwrap();
        assert_eq!(store.count(Space::Raw).unwrap(), 0);
        assert_eq!(total_index_entries(&store), 0);

        store.delete(&ev).unwrap();
        let err = store.delete_by_id(&ev.id).unwrap_err();
        assert!(matches!(err, CoreError::NotFound { id } if id == ev.id));
        assert!(err.is_not_found());
    }

    #[test]
    fn delete_uses_stored_tags() {
        let store = EventStore::open_in_memory().unwrap();
        let ev = event(1, 1, 100, vec![vec!["t".into(), "nostr".into()]]);
        store.save(&ev).unwrap();

        let mut stale = ev.clone();
        stale.tags.clear();
        store.delete(&stale).unwrap();
        assert_eq!(store.count(Space::Tag).unwrap(), 0);
    }

    #[test]
    fn delete_by_id_loads_record() {
        let store = EventStore::open_in_memory().unwrap();
        let ev = event(2, 3, 100, vec![vec!["t".into(), "x".into()]]);
        store.save(&ev).unwrap();
        store.delete_by_id(&ev.id).unwrap();
        assert_eq!(total_index_entries(&store), 0);
        assert!(!store.contains(&ev.id).unwrap());
    }

    #[test]
    fn scan_orders_by_time() {
        let store = EventStore::open_in_memory().unwrap();
        for (seed, t) in [(1, 100), (2, 200), (3, 150)] {
            store.save(&event(seed, 1, t, vec![])).unwrap();
        }

        let times = |events: Vec<Event>| events.iter().map(|e| e.created_at).collect::<Vec<_>>();
        assert_eq!(
            times(store.scan(&IndexScan::created_at()).unwrap()),
            vec![100, 150, 200]
        );
        assert_eq!(
            times(store.scan(&IndexScan::kind(1).newest_first()).unwrap()),
            vec![200, 150, 100]
        );
        assert_eq!(
            times(store.scan(&IndexScan::kind(1).since(120).until(180)).unwrap()),
            vec![150]
        );
        assert_eq!(
            times(store.scan(&IndexScan::created_at().limit(2)).unwrap()),
            vec![100, 150]
        );
    }

    #[test]
    fn scan_limit_is_clamped_by_config() {
        let store = EventStore::with_backend(
            Box::new(InMemoryBackend::new()),
            Config::default().max_limit(2),
        )
        .unwrap();
        for seed in 1..=4 {
            store.save(&event(seed, 1, u64::from(seed), vec![])).unwrap();
        }
        assert_eq!(store.scan(&IndexScan::created_at().limit(10)).unwrap().len(), 2);
    }

    #[test]
    fn tag_scan_does_not_mix_prefix_values() {
        let store = EventStore::open_in_memory().unwrap();
        store
            .save(&event(1, 1, 10, vec![vec!["t".into(), "ab".into()]]))
            .unwrap();
        store
            .save(&event(2, 1, 10, vec![vec!["t".into(), "abc".into()]]))
            .unwrap();

        let found = store.scan(&IndexScan::tag_value("ab").unwrap()).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, EventId::from_bytes([1; 32]));

        store
            .save(&event(3, 1, 10, vec![vec!["e".into(), HEX32.into()]]))
            .unwrap();
        let long = store.scan(&IndexScan::tag_value(HEX32).unwrap()).unwrap();
        assert_eq!(long.len(), 1);
        assert_eq!(long[0].id, EventId::from_bytes([3; 32]));
    }

    #[test]
    fn cancelled_save_leaves_no_trace() {
        let store = EventStore::open_in_memory().unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();

        let err = store
            .save_with_cancel(&event(1, 1, 1, vec![]), &cancel)
            .unwrap_err();
        assert!(matches!(err, CoreError::Cancelled));
        assert_eq!(store.count(Space::Raw).unwrap(), 0);
        assert_eq!(total_index_entries(&store), 0);
    }

    #[test]
    fn concurrent_duplicate_saves_store_once() {
        let store = Arc::new(EventStore::open_in_memory().unwrap());
        let ev = event(9, 1, 1, vec![]);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                let ev = ev.clone();
                thread::spawn(move || store.save(&ev))
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(CoreError::is_duplicate));
        assert_eq!(store.count(Space::Raw).unwrap(), 1);
    }

    #[test]
    fn on_disk_store_persists_and_locks() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("events");
        let config = Config::default().open_timeout(Duration::from_millis(100));
        let ev = event(4, 7, 500, vec![]);

        {
            let store = EventStore::open(&path, config.clone()).unwrap();
            assert!(store.migrations().stamped_fresh);
            store.save(&ev).unwrap();

            let locked = EventStore::open(&path, config.clone());
            assert!(matches!(locked, Err(CoreError::ResourceLocked { .. })));
            store.close().unwrap();
        }

        let store = EventStore::open(&path, config).unwrap();
        assert!(!store.migrations().stamped_fresh);
        assert_eq!(store.migrations().applied_count(), 0);
        assert_eq!(store.get(&ev.id).unwrap(), Some(ev));
        assert_eq!(store.path(), Some(path.as_path()));
    }

    #[test]
    fn write_event_in_shared_transaction() {
        let backend = InMemoryBackend::new();
        {
            let mut txn = backend.begin_write().unwrap();
            write_event(&mut *txn, &event(1, 1, 1, vec![])).unwrap();
            write_event(&mut *txn, &event(2, 1, 2, vec![])).unwrap();
            txn.commit().unwrap();
        }
        let store = EventStore::with_backend(Box::new(backend), Config::default()).unwrap();
        assert_eq!(store.scan(&IndexScan::created_at()).unwrap().len(), 2);
    }
}
