//! Fault injection for write-path testing.
//!
//! [`FaultyBackend`] wraps any backend and fails writes on demand, so tests
//! can check that an interrupted save or delete leaves no trace.
//!
//! ## Usage
//!
//! ```rust
//! use evstore_core::{Config, EventStore};
//! use evstore_storage::{InMemoryBackend, Space};
//! use evstore_testkit::{event, FaultyBackend};
//!
//! let (backend, faults) = FaultyBackend::wrap(Box::new(InMemoryBackend::new()));
//! let store = EventStore::with_backend(Box::new(backend), Config::default()).unwrap();
//!
//! faults.fail_after_puts(3);
//! assert!(store.save(&event(1)).is_err());
//! assert_eq!(store.count(Space::Raw).unwrap(), 0);
//! ```

use evstore_storage::{
    Direction, KeyRange, KvBackend, Pointer, ReadTxn, Space, StorageError, StorageResult,
    Visitor, WriteTxn,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Shared switches controlling a [`FaultyBackend`].
#[derive(Debug)]
pub struct Faults {
    put_budget: AtomicUsize,
    puts: AtomicUsize,
    fail_commit: AtomicBool,
    fail_pointer: AtomicBool,
    injected: AtomicUsize,
}

impl Default for Faults {
    fn default() -> Self {
        Self {
            put_budget: AtomicUsize::new(usize::MAX),
            puts: AtomicUsize::new(0),
            fail_commit: AtomicBool::new(false),
            fail_pointer: AtomicBool::new(false),
            injected: AtomicUsize::new(0),
        }
    }
}

impl Faults {
    /// Lets `count` more puts succeed, then fails every later one.
    pub fn fail_after_puts(&self, count: usize) {
        self.puts.store(0, Ordering::SeqCst);
        self.put_budget.store(count, Ordering::SeqCst);
    }

    /// Sets whether commits fail.
    pub fn set_fail_commit(&self, fail: bool) {
        self.fail_commit.store(fail, Ordering::SeqCst);
    }

    /// Sets whether pointer allocation fails.
    pub fn set_fail_pointer(&self, fail: bool) {
        self.fail_pointer.store(fail, Ordering::SeqCst);
    }

    /// Clears every fault.
    pub fn reset(&self) {
        self.put_budget.store(usize::MAX, Ordering::SeqCst);
        self.puts.store(0, Ordering::SeqCst);
        self.fail_commit.store(false, Ordering::SeqCst);
        self.fail_pointer.store(false, Ordering::SeqCst);
    }

    /// Number of failures injected so far.
    pub fn injected(&self) -> usize {
        self.injected.load(Ordering::SeqCst)
    }

    fn inject(&self, what: &str) -> StorageError {
        self.injected.fetch_add(1, Ordering::SeqCst);
        StorageError::engine(format!("injected {what} failure"))
    }

    fn check_put(&self) -> StorageResult<()> {
        let done = self.puts.fetch_add(1, Ordering::SeqCst);
        if done >= self.put_budget.load(Ordering::SeqCst) {
            return Err(self.inject("put"));
        }
        Ok(())
    }
}

/// A backend wrapper that fails writes on demand.
pub struct FaultyBackend {
    inner: Box<dyn KvBackend>,
    faults: Arc<Faults>,
}

impl FaultyBackend {
    /// Wraps `inner` and returns the switches controlling it.
    pub fn wrap(inner: Box<dyn KvBackend>) -> (Self, Arc<Faults>) {
        let faults = Arc::new(Faults::default());
        (
            Self {
                inner,
                faults: Arc::clone(&faults),
            },
            faults,
        )
    }
}

impl KvBackend for FaultyBackend {
    fn name(&self) -> &'static str {
        "faulty"
    }

    fn begin_read(&self) -> StorageResult<Box<dyn ReadTxn + '_>> {
        self.inner.begin_read()
    }

    fn begin_write(&self) -> StorageResult<Box<dyn WriteTxn + '_>> {
        Ok(Box::new(FaultyWriteTxn {
            inner: self.inner.begin_write()?,
            faults: &self.faults,
        }))
    }

    fn flush(&self) -> StorageResult<()> {
        self.inner.flush()
    }
}

struct FaultyWriteTxn<'a> {
    inner: Box<dyn WriteTxn + 'a>,
    faults: &'a Faults,
}

impl ReadTxn for FaultyWriteTxn<'_> {
    fn get(&self, space: Space, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        self.inner.get(space, key)
    }

    fn scan(
        &self,
        space: Space,
        range: &KeyRange,
        direction: Direction,
        visit: &mut Visitor<'_>,
    ) -> StorageResult<()> {
        self.inner.scan(space, range, direction, visit)
    }
}

impl WriteTxn for FaultyWriteTxn<'_> {
    fn put(&mut self, space: Space, key: &[u8], value: &[u8]) -> StorageResult<()> {
        self.faults.check_put()?;
        self.inner.put(space, key, value)
    }

    fn delete(&mut self, space: Space, key: &[u8]) -> StorageResult<()> {
        self.inner.delete(space, key)
    }

    fn next_pointer(&mut self) -> StorageResult<Pointer> {
        if self.faults.fail_pointer.load(Ordering::SeqCst) {
            return Err(self.faults.inject("pointer"));
        }
        self.inner.next_pointer()
    }

    fn commit(self: Box<Self>) -> StorageResult<()> {
        if self.faults.fail_commit.load(Ordering::SeqCst) {
            let err = self.faults.inject("commit");
            self.inner.abort();
            return Err(err);
        }
        self.inner.commit()
    }

    fn abort(self: Box<Self>) {
        self.inner.abort();
    }
}
