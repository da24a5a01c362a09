//! In-memory, prefix-partitioned backend.

use crate::backend::{
    Direction, KeyRange, KvBackend, Pointer, ReadTxn, Space, Visitor, WriteTxn, SERIAL_KEY,
};
use crate::error::{StorageError, StorageResult};
use parking_lot::{Mutex, MutexGuard, RwLock, RwLockReadGuard};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicU32, Ordering};

type Map = BTreeMap<Vec<u8>, Vec<u8>>;

/// An in-memory backend storing every space in one ordered map.
///
/// Physical keys are the one-byte [`Space::tag`] followed by the logical key,
/// so a range scan of one space never crosses into another. Pointers are
/// compact (5 bytes). The counter lives outside transactions: a pointer
/// handed out to an aborted write is never reused.
///
/// This backend is suitable for:
/// - Unit tests
/// - Integration tests
/// - Ephemeral stores that don't need persistence
///
/// # Example
///
/// ```rust
/// use evstore_storage::{InMemoryBackend, KvBackend, Space};
///
/// let backend = InMemoryBackend::new();
/// let mut txn = backend.begin_write().unwrap();
/// txn.put(Space::Raw, b"k", b"v").unwrap();
/// txn.commit().unwrap();
///
/// let read = backend.begin_read().unwrap();
/// assert_eq!(read.get(Space::Raw, b"k").unwrap(), Some(b"v".to_vec()));
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    data: RwLock<Map>,
    writer: Mutex<()>,
    serial: AtomicU32,
}

impl InMemoryBackend {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend from a previous [`InMemoryBackend::snapshot`].
    ///
    /// Useful for testing restart and recovery scenarios.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Corrupted`] if the stored counter is malformed.
    pub fn from_snapshot(data: Map) -> StorageResult<Self> {
        let serial = match data.get(&physical(Space::Settings, SERIAL_KEY)) {
            Some(bytes) => {
                let arr: [u8; 4] = bytes.as_slice().try_into().map_err(|_| {
                    StorageError::Corrupted(format!("serial counter of {} bytes", bytes.len()))
                })?;
                u32::from_be_bytes(arr)
            }
            None => 0,
        };
        Ok(Self {
            data: RwLock::new(data),
            writer: Mutex::new(()),
            serial: AtomicU32::new(serial),
        })
    }

    /// Returns a copy of every physical entry.
    #[must_use]
    pub fn snapshot(&self) -> Map {
        self.data.read().clone()
    }

    /// Returns the last pointer counter handed out.
    #[must_use]
    pub fn serial(&self) -> u32 {
        self.serial.load(Ordering::SeqCst)
    }
}

impl KvBackend for InMemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn begin_read(&self) -> StorageResult<Box<dyn ReadTxn + '_>> {
        Ok(Box::new(MemoryReadTxn {
            data: self.data.read(),
        }))
    }

    fn begin_write(&self) -> StorageResult<Box<dyn WriteTxn + '_>> {
        let guard = self.writer.lock();
        Ok(Box::new(MemoryWriteTxn {
            backend: self,
            _writer: guard,
            pending: BTreeMap::new(),
        }))
    }
}

fn physical(space: Space, key: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(key.len() + 1);
    out.push(space.tag());
    out.extend_from_slice(key);
    out
}

/// Maps a logical range to physical bounds confined to `space`.
fn physical_bounds(space: Space, range: &KeyRange) -> (Bound<Vec<u8>>, Bound<Vec<u8>>) {
    let start = match &range.start {
        Bound::Included(k) => Bound::Included(physical(space, k)),
        Bound::Excluded(k) => Bound::Excluded(physical(space, k)),
        Bound::Unbounded => Bound::Included(vec![space.tag()]),
    };
    let end = match &range.end {
        Bound::Included(k) => Bound::Included(physical(space, k)),
        Bound::Excluded(k) => Bound::Excluded(physical(space, k)),
        Bound::Unbounded => match space.tag().checked_add(1) {
            Some(next) => Bound::Excluded(vec![next]),
            None => Bound::Unbounded,
        },
    };
    (start, end)
}

fn visit_entries<'a>(
    entries: impl DoubleEndedIterator<Item = (&'a Vec<u8>, &'a Vec<u8>)>,
    direction: Direction,
    visit: &mut Visitor<'_>,
) {
    let mut step = |(k, v): (&Vec<u8>, &Vec<u8>)| visit(&k[1..], v.as_slice());
    match direction {
        Direction::Forward => {
            for entry in entries {
                if step(entry).is_break() {
                    break;
                }
            }
        }
        Direction::Reverse => {
            for entry in entries.rev() {
                if step(entry).is_break() {
                    break;
                }
            }
        }
    }
}

struct MemoryReadTxn<'a> {
    data: RwLockReadGuard<'a, Map>,
}

impl ReadTxn for MemoryReadTxn<'_> {
    fn get(&self, space: Space, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.data.get(&physical(space, key)).cloned())
    }

    fn scan(
        &self,
        space: Space,
        range: &KeyRange,
        direction: Direction,
        visit: &mut Visitor<'_>,
    ) -> StorageResult<()> {
        if range.is_empty() {
            return Ok(());
        }
        visit_entries(
            self.data.range(physical_bounds(space, range)),
            direction,
            visit,
        );
        Ok(())
    }
}

struct MemoryWriteTxn<'a> {
    backend: &'a InMemoryBackend,
    _writer: MutexGuard<'a, ()>,
    /// Physical key to new value; `None` marks a delete.
    pending: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl ReadTxn for MemoryWriteTxn<'_> {
    fn get(&self, space: Space, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        let key = physical(space, key);
        match self.pending.get(&key) {
            Some(value) => Ok(value.clone()),
            None => Ok(self.backend.data.read().get(&key).cloned()),
        }
    }

    fn scan(
        &self,
        space: Space,
        range: &KeyRange,
        direction: Direction,
        visit: &mut Visitor<'_>,
    ) -> StorageResult<()> {
        if range.is_empty() {
            return Ok(());
        }
        let bounds = physical_bounds(space, range);
        let mut merged: Map = self
            .backend
            .data
            .read()
            .range(bounds.clone())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (k, v) in self.pending.range(bounds) {
            match v {
                Some(v) => {
                    merged.insert(k.clone(), v.clone());
                }
                None => {
                    merged.remove(k);
                }
            }
        }
        visit_entries(merged.iter(), direction, visit);
        Ok(())
    }
}

impl WriteTxn for MemoryWriteTxn<'_> {
    fn put(&mut self, space: Space, key: &[u8], value: &[u8]) -> StorageResult<()> {
        self.pending.insert(physical(space, key), Some(value.to_vec()));
        Ok(())
    }

    fn delete(&mut self, space: Space, key: &[u8]) -> StorageResult<()> {
        self.pending.insert(physical(space, key), None);
        Ok(())
    }

    fn next_pointer(&mut self) -> StorageResult<Pointer> {
        let prev = self
            .backend
            .serial
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_add(1))
            .map_err(|_| StorageError::SequenceExhausted)?;
        let next = prev + 1;
        self.backend.data.write().insert(
            physical(Space::Settings, SERIAL_KEY),
            next.to_be_bytes().to_vec(),
        );
        Ok(Pointer::compact(next))
    }

    fn commit(self: Box<Self>) -> StorageResult<()> {
        let this = *self;
        let mut data = this.backend.data.write();
        for (k, v) in this.pending {
            match v {
                Some(v) => {
                    data.insert(k, v);
                }
                None => {
                    data.remove(&k);
                }
            }
        }
        Ok(())
    }

    fn abort(self: Box<Self>) {}
}
