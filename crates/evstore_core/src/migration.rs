//! Layout versioning and migrations.
//!
//! The stored layout carries a version marker (`settings["version"]`, a
//! big-endian `u64`). Opening a store runs every registered migration newer
//! than the marker, in version order.
//!
//! Migrations are:
//! - **Forward-only**: there is no rollback step
//! - **Transactional**: each runs in its own write transaction, which also
//!   advances the marker, so a crash never leaves a half-applied step
//! - **Run once**: a second run against the same store performs no writes
//!
//! A store with no marker and no records is new: it is stamped with the
//! latest version directly and nothing runs.
//!
//! ## Usage
//!
//! ```rust
//! use evstore_core::migration::{Migration, MigrationContext, MigrationManager};
//! use evstore_core::CoreResult;
//! use evstore_storage::{InMemoryBackend, Space};
//!
//! struct StampOrigin;
//! impl Migration for StampOrigin {
//!     fn version(&self) -> u64 { 2 }
//!     fn name(&self) -> &str { "stamp_origin" }
//!     fn up(&self, ctx: &mut MigrationContext<'_>) -> CoreResult<()> {
//!         ctx.put(Space::Settings, b"origin", b"import")
//!     }
//! }
//!
//! let mut manager = MigrationManager::builtin();
//! manager.register(Box::new(StampOrigin)).unwrap();
//!
//! let backend = InMemoryBackend::new();
//! let result = manager.run_pending(&backend).unwrap();
//! assert_eq!(result.final_version, 2);
//! ```

use crate::error::{CoreError, CoreResult};
use crate::index::index_keys;
use evstore_codec::decode_event;
use evstore_storage::{
    Direction, KeyRange, KvBackend, Pointer, ReadTxn, Space, Visitor, WriteTxn,
};
use std::collections::BTreeMap;
use std::ops::ControlFlow;
use tracing::{debug, info, instrument};

/// Version number for migrations.
pub type MigrationVersion = u64;

/// Settings key of the layout version marker.
pub const VERSION_KEY: &[u8] = b"version";

/// Information about a migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationInfo {
    /// Version number (unique, sequential).
    pub version: MigrationVersion,
    /// Human-readable name.
    pub name: String,
    /// Description of what this migration does.
    pub description: Option<String>,
}

/// Result of running a single migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationResult {
    /// The migration version that was run.
    pub version: MigrationVersion,
    /// The migration name.
    pub name: String,
    /// Number of puts and deletes the step issued.
    pub writes: usize,
}

/// Result of running all pending migrations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationRunResult {
    /// Migrations that were run, in order.
    pub migrations: Vec<MigrationResult>,
    /// Marker found before running (0 when absent).
    pub initial_version: MigrationVersion,
    /// Marker after running.
    pub final_version: MigrationVersion,
    /// True if the store was new and stamped without running anything.
    pub stamped_fresh: bool,
}

impl MigrationRunResult {
    /// Number of migrations applied.
    #[must_use]
    pub fn applied_count(&self) -> usize {
        self.migrations.len()
    }

    /// Total writes across every step, marker writes excluded.
    #[must_use]
    pub fn total_writes(&self) -> usize {
        self.migrations.iter().map(|m| m.writes).sum()
    }
}

/// Context passed to a migration step.
///
/// Wraps the step's write transaction and counts the writes made through it.
pub struct MigrationContext<'a> {
    txn: Box<dyn WriteTxn + 'a>,
    from_version: MigrationVersion,
    writes: usize,
}

impl<'a> MigrationContext<'a> {
    fn new(txn: Box<dyn WriteTxn + 'a>, from_version: MigrationVersion) -> Self {
        Self {
            txn,
            from_version,
            writes: 0,
        }
    }

    /// Marker value before this step.
    #[must_use]
    pub fn from_version(&self) -> MigrationVersion {
        self.from_version
    }

    /// Writes issued so far.
    #[must_use]
    pub fn writes(&self) -> usize {
        self.writes
    }

    /// Reads a value.
    ///
    /// # Errors
    ///
    /// Propagates storage errors.
    pub fn get(&self, space: Space, key: &[u8]) -> CoreResult<Option<Vec<u8>>> {
        Ok(self.txn.get(space, key)?)
    }

    /// Scans a range; see [`ReadTxn::scan`].
    ///
    /// # Errors
    ///
    /// Propagates storage errors.
    pub fn scan(
        &self,
        space: Space,
        range: &KeyRange,
        direction: Direction,
        visit: &mut Visitor<'_>,
    ) -> CoreResult<()> {
        Ok(self.txn.scan(space, range, direction, visit)?)
    }

    /// Stores a value.
    ///
    /// # Errors
    ///
    /// Propagates storage errors.
    pub fn put(&mut self, space: Space, key: &[u8], value: &[u8]) -> CoreResult<()> {
        self.txn.put(space, key, value)?;
        self.writes += 1;
        Ok(())
    }

    /// Removes a value.
    ///
    /// # Errors
    ///
    /// Propagates storage errors.
    pub fn delete(&mut self, space: Space, key: &[u8]) -> CoreResult<()> {
        self.txn.delete(space, key)?;
        self.writes += 1;
        Ok(())
    }

    fn into_txn(self) -> Box<dyn WriteTxn + 'a> {
        self.txn
    }
}

impl std::fmt::Debug for MigrationContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationContext")
            .field("from_version", &self.from_version)
            .field("writes", &self.writes)
            .finish_non_exhaustive()
    }
}

/// Trait for defining migrations.
pub trait Migration: Send + Sync {
    /// Returns the version number for this migration.
    ///
    /// Versions must be unique and sequential starting from 1.
    fn version(&self) -> MigrationVersion;

    /// Returns the name of this migration.
    fn name(&self) -> &str;

    /// Returns an optional description.
    fn description(&self) -> Option<&str> {
        None
    }

    /// Applies the migration inside the context's transaction.
    ///
    /// Returning an error discards every write the step made.
    fn up(&self, ctx: &mut MigrationContext<'_>) -> CoreResult<()>;
}

/// Recomputes and writes the index entries of every stored record.
///
/// Upgrades stores whose records were written without secondary indexes.
/// Rewriting entries that already exist is harmless.
#[derive(Debug, Default)]
pub struct RebuildIndexes;

impl Migration for RebuildIndexes {
    fn version(&self) -> MigrationVersion {
        1
    }

    fn name(&self) -> &str {
        "rebuild_indexes"
    }

    fn description(&self) -> Option<&str> {
        Some("write secondary index entries for every stored record")
    }

    fn up(&self, ctx: &mut MigrationContext<'_>) -> CoreResult<()> {
        let mut records = Vec::new();
        ctx.scan(
            Space::Raw,
            &KeyRange::all(),
            Direction::Forward,
            &mut |k, v| {
                records.push((k.to_vec(), v.to_vec()));
                ControlFlow::Continue(())
            },
        )?;

        for (key, bytes) in records {
            let pointer = Pointer::from_bytes(&key)?;
            let event = decode_event(&bytes)?;
            for entry in index_keys(&event, &pointer) {
                ctx.put(entry.family.space(), &entry.key, pointer.as_bytes())?;
            }
        }
        Ok(())
    }
}

/// Reads the version marker; `None` when absent.
///
/// # Errors
///
/// Returns [`CoreError::InvalidFormat`] if the marker is not 8 bytes.
pub fn read_version<T: ReadTxn + ?Sized>(txn: &T) -> CoreResult<Option<MigrationVersion>> {
    match txn.get(Space::Settings, VERSION_KEY)? {
        Some(bytes) => {
            let arr: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                CoreError::invalid_format(format!("version marker of {} bytes", bytes.len()))
            })?;
            Ok(Some(u64::from_be_bytes(arr)))
        }
        None => Ok(None),
    }
}

fn write_version<T: WriteTxn + ?Sized>(txn: &mut T, version: MigrationVersion) -> CoreResult<()> {
    txn.put(Space::Settings, VERSION_KEY, &version.to_be_bytes())?;
    Ok(())
}

/// Manages layout migrations.
pub struct MigrationManager {
    /// Registered migrations, keyed by version.
    migrations: BTreeMap<MigrationVersion, Box<dyn Migration>>,
}

impl std::fmt::Debug for MigrationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationManager")
            .field("versions", &self.migrations.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl MigrationManager {
    /// Creates a manager with no migrations.
    #[must_use]
    pub fn new() -> Self {
        Self {
            migrations: BTreeMap::new(),
        }
    }

    /// Creates a manager with the built-in migrations registered.
    #[must_use]
    pub fn builtin() -> Self {
        let mut migrations: BTreeMap<MigrationVersion, Box<dyn Migration>> = BTreeMap::new();
        migrations.insert(RebuildIndexes.version(), Box::new(RebuildIndexes));
        Self { migrations }
    }

    /// Registers a migration.
    ///
    /// # Errors
    ///
    /// Returns an error if a migration with the same version already exists.
    pub fn register(&mut self, migration: Box<dyn Migration>) -> CoreResult<()> {
        let version = migration.version();
        if self.migrations.contains_key(&version) {
            return Err(CoreError::migration_failed(format!(
                "migration version {version} already registered"
            )));
        }
        self.migrations.insert(version, migration);
        Ok(())
    }

    /// Returns the newest registered version, 0 if none.
    #[must_use]
    pub fn latest_version(&self) -> MigrationVersion {
        self.migrations.keys().next_back().copied().unwrap_or(0)
    }

    /// Returns list of registered migrations.
    #[must_use]
    pub fn list(&self) -> Vec<MigrationInfo> {
        self.migrations.values().map(|m| info_of(m.as_ref())).collect()
    }

    /// Returns migrations newer than `current`.
    #[must_use]
    pub fn pending(&self, current: MigrationVersion) -> Vec<MigrationInfo> {
        self.migrations
            .range(current.saturating_add(1)..)
            .map(|(_, m)| info_of(m.as_ref()))
            .collect()
    }

    /// Reads the marker of `backend`, 0 when absent.
    ///
    /// # Errors
    ///
    /// Propagates storage and format errors.
    pub fn current_version(&self, backend: &dyn KvBackend) -> CoreResult<MigrationVersion> {
        let read = backend.begin_read()?;
        Ok(read_version(&*read)?.unwrap_or(0))
    }

    /// Runs every pending migration against `backend`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnsupportedVersion`] if the stored marker is
    /// newer than [`MigrationManager::latest_version`], or
    /// [`CoreError::MigrationFailed`] when a step fails. Steps before the
    /// failing one stay applied.
    #[instrument(skip_all, fields(backend = backend.name()))]
    pub fn run_pending(&self, backend: &dyn KvBackend) -> CoreResult<MigrationRunResult> {
        let latest = self.latest_version();
        let (marker, empty) = {
            let read = backend.begin_read()?;
            let marker = read_version(&*read)?;
            let empty = read.first_with_prefix(Space::Raw, &[])?.is_none();
            (marker, empty)
        };

        if let Some(found) = marker {
            if found > latest {
                return Err(CoreError::UnsupportedVersion {
                    found,
                    supported: latest,
                });
            }
        }

        if marker.is_none() && empty {
            if latest > 0 {
                let mut txn = backend.begin_write()?;
                write_version(&mut *txn, latest)?;
                txn.commit()?;
            }
            debug!(version = latest, "stamped new store");
            return Ok(MigrationRunResult {
                migrations: Vec::new(),
                initial_version: 0,
                final_version: latest,
                stamped_fresh: true,
            });
        }

        let initial = marker.unwrap_or(0);
        let mut current = initial;
        let mut results = Vec::new();

        for (&version, migration) in self.migrations.range(initial.saturating_add(1)..) {
            let writes = apply_step(backend, migration.as_ref(), current, version).map_err(|e| {
                CoreError::migration_failed(format!("{} (v{version}): {e}", migration.name()))
            })?;

            info!(version, name = migration.name(), writes, "applied migration");
            current = version;
            results.push(MigrationResult {
                version,
                name: migration.name().to_string(),
                writes,
            });
        }

        Ok(MigrationRunResult {
            migrations: results,
            initial_version: initial,
            final_version: current,
            stamped_fresh: false,
        })
    }

    /// Validates that migrations are sequential with no gaps.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first gap.
    pub fn validate(&self) -> CoreResult<()> {
        for (expected, version) in (1u64..).zip(self.migrations.keys()) {
            if *version != expected {
                return Err(CoreError::migration_failed(format!(
                    "migration version gap: expected {expected}, got {version}"
                )));
            }
        }
        Ok(())
    }
}

/// Runs one step and advances the marker in the same transaction.
fn apply_step(
    backend: &dyn KvBackend,
    migration: &dyn Migration,
    current: MigrationVersion,
    version: MigrationVersion,
) -> CoreResult<usize> {
    let mut ctx = MigrationContext::new(backend.begin_write()?, current);
    migration.up(&mut ctx)?;
    let writes = ctx.writes();
    let mut txn = ctx.into_txn();
    write_version(&mut *txn, version)?;
    txn.commit()?;
    Ok(writes)
}

fn info_of(m: &dyn Migration) -> MigrationInfo {
    MigrationInfo {
        version: m.version(),
        name: m.name().to_string(),
        description: m.description().map(String::from),
    }
}

impl Default for MigrationManager {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexFamily;
    use evstore_codec::{encode_event, Event, EventId, PublicKey, Signature};
    use evstore_storage::InMemoryBackend;

    struct TestMigration {
        version: MigrationVersion,
        should_fail: bool,
    }

    impl Migration for TestMigration {
        fn version(&self) -> MigrationVersion {
            self.version
        }

        fn name(&self) -> &str {
            "test"
        }

        fn up(&self, ctx: &mut MigrationContext<'_>) -> CoreResult<()> {
            ctx.put(Space::Settings, format!("m{}", self.version).as_bytes(), b"1")?;
            if self.should_fail {
                return Err(CoreError::migration_failed("intentional failure"));
            }
            Ok(())
        }
    }

    fn make_migration(version: u64) -> Box<dyn Migration> {
        Box::new(TestMigration {
            version,
            should_fail: false,
        })
    }

    fn make_failing_migration(version: u64) -> Box<dyn Migration> {
        Box::new(TestMigration {
            version,
            should_fail: true,
        })
    }

    fn sample_event() -> Event {
        Event {
            id: EventId::from_bytes([5; 32]),
            pubkey: PublicKey::from_bytes([6; 32]),
            created_at: 1_000,
            kind: 1,
            tags: vec![vec!["t".into(), "rust".into()]],
            content: "legacy".into(),
            sig: Signature::from_bytes([7; 64]),
        }
    }

    /// A store with one record in the primary space and no indexes or marker.
    fn legacy_backend() -> InMemoryBackend {
        let backend = InMemoryBackend::new();
        let mut txn = backend.begin_write().unwrap();
        let ptr = txn.next_pointer().unwrap();
        txn.put(Space::Raw, ptr.as_bytes(), &encode_event(&sample_event()).unwrap())
            .unwrap();
        txn.commit().unwrap();
        backend
    }

    fn marker(backend: &dyn KvBackend) -> Option<u64> {
        let read = backend.begin_read().unwrap();
        read_version(&*read).unwrap()
    }

    #[test]
    fn duplicate_version_rejected() {
        let mut manager = MigrationManager::new();
        manager.register(make_migration(1)).unwrap();
        assert!(manager.register(make_migration(1)).is_err());
    }

    #[test]
    fn fresh_store_is_stamped_without_running() {
        let backend = InMemoryBackend::new();
        let mut manager = MigrationManager::builtin();
        manager.register(make_migration(2)).unwrap();

        let result = manager.run_pending(&backend).unwrap();
        assert!(result.stamped_fresh);
        assert_eq!(result.applied_count(), 0);
        assert_eq!(marker(&backend), Some(2));

        let read = backend.begin_read().unwrap();
        assert_eq!(read.get(Space::Settings, b"m2").unwrap(), None);
    }

    #[test]
    fn legacy_store_gets_indexes_rebuilt() {
        let backend = legacy_backend();
        let result = MigrationManager::builtin().run_pending(&backend).unwrap();

        assert_eq!(result.initial_version, 0);
        assert_eq!(result.final_version, 1);
        assert_eq!(result.applied_count(), 1);
        assert_eq!(result.total_writes(), 5 + 1);
        assert_eq!(marker(&backend), Some(1));

        let read = backend.begin_read().unwrap();
        assert_eq!(read.count(Space::Kind).unwrap(), 1);
        assert_eq!(read.count(Space::Tag).unwrap(), 1);
        assert!(read
            .first_with_prefix(Space::Id, &IndexFamily::prefix_for_id(&sample_event().id))
            .unwrap()
            .is_some());
    }

    #[test]
    fn second_run_writes_nothing() {
        let backend = legacy_backend();
        let manager = MigrationManager::builtin();
        manager.run_pending(&backend).unwrap();
        let before = backend.snapshot();

        let result = manager.run_pending(&backend).unwrap();
        assert_eq!(result.applied_count(), 0);
        assert_eq!(result.final_version, 1);
        assert_eq!(backend.snapshot(), before);
    }

    #[test]
    fn newer_marker_is_unsupported() {
        let backend = InMemoryBackend::new();
        let mut txn = backend.begin_write().unwrap();
        write_version(&mut *txn, 9).unwrap();
        txn.commit().unwrap();

        let err = MigrationManager::builtin().run_pending(&backend).unwrap_err();
        assert!(matches!(
            err,
            CoreError::UnsupportedVersion {
                found: 9,
                supported: 1
            }
        ));
    }

    #[test]
    fn failing_step_is_discarded_and_stops_the_run() {
        let backend = legacy_backend();
        let mut manager = MigrationManager::builtin();
        manager.register(make_failing_migration(2)).unwrap();
        manager.register(make_migration(3)).unwrap();

        let err = manager.run_pending(&backend).unwrap_err();
        assert!(matches!(err, CoreError::MigrationFailed { .. }));

        assert_eq!(marker(&backend), Some(1));
        let read = backend.begin_read().unwrap();
        assert_eq!(read.get(Space::Settings, b"m2").unwrap(), None);
        assert_eq!(read.get(Space::Settings, b"m3").unwrap(), None);
    }

    #[test]
    fn pending_lists_newer_versions() {
        let mut manager = MigrationManager::builtin();
        manager.register(make_migration(2)).unwrap();
        let pending = manager.pending(1);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].version, 2);
        assert_eq!(manager.list()[0].name, "rebuild_indexes");
    }

    #[test]
    fn validate_detects_gaps() {
        let mut manager = MigrationManager::builtin();
        assert!(manager.validate().is_ok());
        manager.register(make_migration(3)).unwrap();
        assert!(manager.validate().is_err());
    }
}
