//! Persistent backend on redb, one table per space.

use crate::backend::{
    Direction, KeyRange, KvBackend, Pointer, ReadTxn, Space, Tuning, Visitor, WriteTxn, SERIAL_KEY,
};
use crate::error::{StorageError, StorageResult};
use redb::{Database, DatabaseError, Durability, ReadableTable, TableDefinition};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Tuning key for the page cache size in bytes.
pub const TUNING_CACHE_SIZE: &str = "cache_size";
/// Tuning key for commit durability: `none`, `eventual`, `immediate` or `paranoid`.
pub const TUNING_DURABILITY: &str = "durability";

fn table(space: Space) -> TableDefinition<'static, &'static [u8], &'static [u8]> {
    TableDefinition::new(space.name())
}

fn engine(err: impl Into<redb::Error>) -> StorageError {
    StorageError::engine(err.into())
}

/// A persistent backend storing each [`Space`] in its own redb table.
///
/// Pointers are wide (8 bytes). The counter is stored in the settings table
/// and advanced inside the write transaction, so an aborted write leaves no
/// gap.
pub struct RedbBackend {
    db: Database,
    path: PathBuf,
    durability: Option<Durability>,
}

impl std::fmt::Debug for RedbBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbBackend")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl RedbBackend {
    /// Opens or creates the database file at `path`.
    ///
    /// Recognized tuning keys are [`TUNING_CACHE_SIZE`] and
    /// [`TUNING_DURABILITY`]; other keys are logged and ignored.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Locked`] if another handle has the file open,
    /// [`StorageError::InvalidTuning`] for unparseable tuning values, or an
    /// engine error.
    pub fn open(path: &Path, tuning: &Tuning) -> StorageResult<Self> {
        let mut cache_size = None;
        let mut durability = None;
        for (key, value) in tuning {
            match key.as_str() {
                TUNING_CACHE_SIZE => {
                    cache_size = Some(value.parse::<usize>().map_err(|_| {
                        StorageError::InvalidTuning {
                            key: key.clone(),
                            value: value.clone(),
                        }
                    })?);
                }
                TUNING_DURABILITY => durability = Some(parse_durability(key, value)?),
                _ => warn!(key = %key, "ignoring unknown tuning option"),
            }
        }

        let mut builder = Database::builder();
        if let Some(bytes) = cache_size {
            builder.set_cache_size(bytes);
        }
        let db = builder.create(path).map_err(|e| match e {
            DatabaseError::DatabaseAlreadyOpen => StorageError::Locked,
            other => engine(other),
        })?;

        let txn = db.begin_write().map_err(engine)?;
        for space in Space::ALL {
            txn.open_table(table(space)).map_err(engine)?;
        }
        txn.commit().map_err(engine)?;

        debug!(path = %path.display(), "opened redb backend");
        Ok(Self {
            db,
            path: path.to_path_buf(),
            durability,
        })
    }

    /// Returns the database file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn parse_durability(key: &str, value: &str) -> StorageResult<Durability> {
    match value {
        "none" => Ok(Durability::None),
        "eventual" => Ok(Durability::Eventual),
        "immediate" => Ok(Durability::Immediate),
        "paranoid" => Ok(Durability::Paranoid),
        _ => Err(StorageError::InvalidTuning {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

impl KvBackend for RedbBackend {
    fn name(&self) -> &'static str {
        "redb"
    }

    fn begin_read(&self) -> StorageResult<Box<dyn ReadTxn + '_>> {
        let txn = self.db.begin_read().map_err(engine)?;
        Ok(Box::new(RedbReadTxn { txn }))
    }

    fn begin_write(&self) -> StorageResult<Box<dyn WriteTxn + '_>> {
        let mut txn = self.db.begin_write().map_err(engine)?;
        if let Some(durability) = self.durability {
            txn.set_durability(durability);
        }
        Ok(Box::new(RedbWriteTxn { txn }))
    }
}

fn get_from<T>(table: &T, key: &[u8]) -> StorageResult<Option<Vec<u8>>>
where
    T: ReadableTable<&'static [u8], &'static [u8]>,
{
    Ok(table.get(key).map_err(engine)?.map(|v| v.value().to_vec()))
}

fn scan_table<T>(
    table: &T,
    range: &KeyRange,
    direction: Direction,
    visit: &mut Visitor<'_>,
) -> StorageResult<()>
where
    T: ReadableTable<&'static [u8], &'static [u8]>,
{
    if range.is_empty() {
        return Ok(());
    }
    let iter = table.range::<&[u8]>(range.as_bounds()).map_err(engine)?;
    match direction {
        Direction::Forward => {
            for entry in iter {
                let (k, v) = entry.map_err(engine)?;
                if visit(k.value(), v.value()).is_break() {
                    break;
                }
            }
        }
        Direction::Reverse => {
            for entry in iter.rev() {
                let (k, v) = entry.map_err(engine)?;
                if visit(k.value(), v.value()).is_break() {
                    break;
                }
            }
        }
    }
    Ok(())
}

struct RedbReadTxn {
    txn: redb::ReadTransaction,
}

impl ReadTxn for RedbReadTxn {
    fn get(&self, space: Space, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        let table = self.txn.open_table(table(space)).map_err(engine)?;
        get_from(&table, key)
    }

    fn scan(
        &self,
        space: Space,
        range: &KeyRange,
        direction: Direction,
        visit: &mut Visitor<'_>,
    ) -> StorageResult<()> {
        let table = self.txn.open_table(table(space)).map_err(engine)?;
        scan_table(&table, range, direction, visit)
    }
}

struct RedbWriteTxn {
    txn: redb::WriteTransaction,
}

impl ReadTxn for RedbWriteTxn {
    fn get(&self, space: Space, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        let table = self.txn.open_table(table(space)).map_err(engine)?;
        get_from(&table, key)
    }

    fn scan(
        &self,
        space: Space,
        range: &KeyRange,
        direction: Direction,
        visit: &mut Visitor<'_>,
    ) -> StorageResult<()> {
        let table = self.txn.open_table(table(space)).map_err(engine)?;
        scan_table(&table, range, direction, visit)
    }
}

impl WriteTxn for RedbWriteTxn {
    fn put(&mut self, space: Space, key: &[u8], value: &[u8]) -> StorageResult<()> {
        let mut table = self.txn.open_table(table(space)).map_err(engine)?;
        table.insert(key, value).map_err(engine)?;
        Ok(())
    }

    fn delete(&mut self, space: Space, key: &[u8]) -> StorageResult<()> {
        let mut table = self.txn.open_table(table(space)).map_err(engine)?;
        table.remove(key).map_err(engine)?;
        Ok(())
    }

    fn next_pointer(&mut self) -> StorageResult<Pointer> {
        let mut settings = self
            .txn
            .open_table(table(Space::Settings))
            .map_err(engine)?;
        let current = match get_from(&settings, SERIAL_KEY)? {
            Some(bytes) => {
                let arr: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                    StorageError::Corrupted(format!("serial counter of {} bytes", bytes.len()))
                })?;
                u64::from_be_bytes(arr)
            }
            None => 0,
        };
        let next = current
            .checked_add(1)
            .ok_or(StorageError::SequenceExhausted)?;
        settings
            .insert(SERIAL_KEY, next.to_be_bytes().as_slice())
            .map_err(engine)?;
        Ok(Pointer::wide(next))
    }

    fn commit(self: Box<Self>) -> StorageResult<()> {
        self.txn.commit().map_err(engine)
    }

    fn abort(self: Box<Self>) {
        if let Err(err) = self.txn.abort() {
            warn!(error = %err, "redb abort failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ops::ControlFlow;
    use tempfile::tempdir;

    fn open(dir: &Path) -> RedbBackend {
        RedbBackend::open(&dir.join("events.redb"), &Tuning::new()).unwrap()
    }

    #[test]
    fn put_get_across_reopen() {
        let dir = tempdir().unwrap();
        {
            let backend = open(dir.path());
            let mut txn = backend.begin_write().unwrap();
            txn.put(Space::Kind, b"k", b"v").unwrap();
            txn.commit().unwrap();
        }
        let backend = open(dir.path());
        let read = backend.begin_read().unwrap();
        assert_eq!(read.get(Space::Kind, b"k").unwrap(), Some(b"v".to_vec()));
        assert_eq!(read.get(Space::Pubkey, b"k").unwrap(), None);
    }

    #[test]
    fn second_open_reports_locked() {
        let dir = tempdir().unwrap();
        let _first = open(dir.path());
        let second = RedbBackend::open(&dir.path().join("events.redb"), &Tuning::new());
        assert!(matches!(second, Err(StorageError::Locked)));
    }

    #[test]
    fn pointers_are_gap_free_across_abort() {
        let dir = tempdir().unwrap();
        let backend = open(dir.path());

        let mut txn = backend.begin_write().unwrap();
        assert_eq!(txn.next_pointer().unwrap(), Pointer::wide(1));
        txn.abort();

        let mut txn = backend.begin_write().unwrap();
        assert_eq!(txn.next_pointer().unwrap(), Pointer::wide(1));
        assert_eq!(txn.next_pointer().unwrap(), Pointer::wide(2));
        txn.commit().unwrap();

        let mut txn = backend.begin_write().unwrap();
        assert_eq!(txn.next_pointer().unwrap(), Pointer::wide(3));
    }

    #[test]
    fn reverse_prefix_scan() {
        let dir = tempdir().unwrap();
        let backend = open(dir.path());
        let mut txn = backend.begin_write().unwrap();
        for k in [&[1u8, 1][..], &[1, 2], &[1, 3], &[2, 0]] {
            txn.put(Space::Tag, k, b"").unwrap();
        }
        txn.commit().unwrap();

        let read = backend.begin_read().unwrap();
        let mut keys = Vec::new();
        read.scan(Space::Tag, &KeyRange::prefix(&[1]), Direction::Reverse, &mut |k, _| {
            keys.push(k.to_vec());
            ControlFlow::Continue(())
        })
        .unwrap();
        assert_eq!(keys, vec![vec![1, 3], vec![1, 2], vec![1, 1]]);
    }

    #[test]
    fn tuning_options_are_validated() {
        let dir = tempdir().unwrap();
        let mut tuning = Tuning::new();
        tuning.insert(TUNING_DURABILITY.into(), "sometimes".into());
        let err = RedbBackend::open(&dir.path().join("events.redb"), &tuning).unwrap_err();
        assert!(matches!(err, StorageError::InvalidTuning { .. }));

        let mut tuning = Tuning::new();
        tuning.insert(TUNING_CACHE_SIZE.into(), "1048576".into());
        tuning.insert(TUNING_DURABILITY.into(), "eventual".into());
        tuning.insert("unknown".into(), "x".into());
        assert!(RedbBackend::open(&dir.path().join("events.redb"), &tuning).is_ok());
    }
}
