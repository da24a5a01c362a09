//! Backend capability contract.
//!
//! Every engine adapter exposes the same small surface: ordered transactions
//! over byte-string keys, partitioned into named address spaces. Index
//! encoding and the write path live above this layer and never see engine
//! specifics.

use crate::error::{StorageError, StorageResult};
use std::collections::BTreeMap;
use std::ops::{Bound, ControlFlow};

/// Settings key holding the durable serial counter.
pub const SERIAL_KEY: &[u8] = b"serial";

/// Opaque, engine-specific tuning options passed through from configuration.
pub type Tuning = BTreeMap<String, String>;

/// A named address space within one backend.
///
/// Prefix-partitioned engines prepend [`Space::tag`] to every physical key;
/// table engines open one table per [`Space::name`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Space {
    /// Primary record storage, keyed by pointer.
    Raw = 0,
    /// Index by creation time.
    CreatedAt = 1,
    /// Index by event id.
    Id = 2,
    /// Index by kind and creation time.
    Kind = 3,
    /// Index by author and creation time.
    Pubkey = 4,
    /// Index by author, kind and creation time.
    PubkeyKind = 5,
    /// Index by short tag value and creation time.
    Tag = 6,
    /// Index by 32-byte tag value and creation time.
    Tag32 = 7,
    /// Internal settings: version marker and serial counter.
    Settings = 255,
}

impl Space {
    /// Every address space a backend must provide.
    pub const ALL: [Space; 9] = [
        Space::Raw,
        Space::CreatedAt,
        Space::Id,
        Space::Kind,
        Space::Pubkey,
        Space::PubkeyKind,
        Space::Tag,
        Space::Tag32,
        Space::Settings,
    ];

    /// The secondary index spaces.
    pub const INDEXES: [Space; 7] = [
        Space::CreatedAt,
        Space::Id,
        Space::Kind,
        Space::Pubkey,
        Space::PubkeyKind,
        Space::Tag,
        Space::Tag32,
    ];

    /// One-byte partition tag.
    #[must_use]
    pub const fn tag(self) -> u8 {
        self as u8
    }

    /// Stable name, used for table-per-space engines.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Space::Raw => "raw",
            Space::CreatedAt => "idx_created_at",
            Space::Id => "idx_id",
            Space::Kind => "idx_kind",
            Space::Pubkey => "idx_pubkey",
            Space::PubkeyKind => "idx_pubkey_kind",
            Space::Tag => "idx_tag",
            Space::Tag32 => "idx_tag32",
            Space::Settings => "settings",
        }
    }

    /// Looks up a space by its partition tag.
    #[must_use]
    pub fn from_tag(tag: u8) -> Option<Space> {
        Space::ALL.into_iter().find(|s| s.tag() == tag)
    }
}

/// Location of one stored record in [`Space::Raw`].
///
/// Allocation order is strictly increasing per backend instance and values
/// are never reused. Gaps are allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Pointer {
    /// One tag byte followed by a big-endian `u32` counter.
    Compact([u8; 5]),
    /// Big-endian `u64` counter.
    Wide([u8; 8]),
}

impl Pointer {
    /// Tag byte leading every compact pointer.
    pub const COMPACT_TAG: u8 = 0;

    /// Builds a compact pointer.
    #[must_use]
    pub fn compact(counter: u32) -> Self {
        let mut b = [0u8; 5];
        b[0] = Self::COMPACT_TAG;
        b[1..].copy_from_slice(&counter.to_be_bytes());
        Pointer::Compact(b)
    }

    /// Builds a wide pointer.
    #[must_use]
    pub fn wide(counter: u64) -> Self {
        Pointer::Wide(counter.to_be_bytes())
    }

    /// Parses a pointer from its stored bytes.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Corrupted`] for any length other than 5 or 8,
    /// or a 5-byte value without the compact tag.
    pub fn from_bytes(bytes: &[u8]) -> StorageResult<Self> {
        match bytes.len() {
            5 if bytes[0] == Self::COMPACT_TAG => {
                let mut b = [0u8; 5];
                b.copy_from_slice(bytes);
                Ok(Pointer::Compact(b))
            }
            8 => {
                let mut b = [0u8; 8];
                b.copy_from_slice(bytes);
                Ok(Pointer::Wide(b))
            }
            n => Err(StorageError::Corrupted(format!(
                "invalid pointer of {n} bytes"
            ))),
        }
    }

    /// Returns the stored bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Pointer::Compact(b) => b,
            Pointer::Wide(b) => b,
        }
    }

    /// Returns the numeric counter.
    #[must_use]
    pub fn counter(&self) -> u64 {
        match self {
            Pointer::Compact(b) => u64::from(u32::from_be_bytes([b[1], b[2], b[3], b[4]])),
            Pointer::Wide(b) => u64::from_be_bytes(*b),
        }
    }
}

/// Iteration direction for range scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// Ascending key order.
    #[default]
    Forward,
    /// Descending key order.
    Reverse,
}

/// A range of logical keys within one space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    /// Lower bound.
    pub start: Bound<Vec<u8>>,
    /// Upper bound.
    pub end: Bound<Vec<u8>>,
}

impl KeyRange {
    /// Every key in the space.
    #[must_use]
    pub fn all() -> Self {
        Self {
            start: Bound::Unbounded,
            end: Bound::Unbounded,
        }
    }

    /// Every key starting with `prefix`.
    #[must_use]
    pub fn prefix(prefix: &[u8]) -> Self {
        Self {
            start: Bound::Included(prefix.to_vec()),
            end: prefix_successor(prefix).map_or(Bound::Unbounded, Bound::Excluded),
        }
    }

    /// Keys in `[start, end]`.
    #[must_use]
    pub fn inclusive(start: Vec<u8>, end: Vec<u8>) -> Self {
        Self {
            start: Bound::Included(start),
            end: Bound::Included(end),
        }
    }

    /// Returns the bounds as borrowed slices.
    #[must_use]
    pub fn as_bounds(&self) -> (Bound<&[u8]>, Bound<&[u8]>) {
        (as_slice_bound(&self.start), as_slice_bound(&self.end))
    }

    /// Returns true if no key can fall in this range.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match (&self.start, &self.end) {
            (Bound::Included(s), Bound::Included(e)) => s > e,
            (Bound::Included(s) | Bound::Excluded(s), Bound::Excluded(e)) => s >= e,
            (Bound::Excluded(s), Bound::Included(e)) => s >= e,
            _ => false,
        }
    }

    /// Returns true if `key` falls in this range.
    #[must_use]
    pub fn contains(&self, key: &[u8]) -> bool {
        let above = match &self.start {
            Bound::Included(s) => key >= s.as_slice(),
            Bound::Excluded(s) => key > s.as_slice(),
            Bound::Unbounded => true,
        };
        let below = match &self.end {
            Bound::Included(e) => key <= e.as_slice(),
            Bound::Excluded(e) => key < e.as_slice(),
            Bound::Unbounded => true,
        };
        above && below
    }
}

fn as_slice_bound(bound: &Bound<Vec<u8>>) -> Bound<&[u8]> {
    match bound {
        Bound::Included(v) => Bound::Included(v.as_slice()),
        Bound::Excluded(v) => Bound::Excluded(v.as_slice()),
        Bound::Unbounded => Bound::Unbounded,
    }
}

/// Returns the smallest key greater than every key with the given prefix,
/// or `None` if the prefix is empty or all `0xff`.
#[must_use]
pub fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut out = prefix.to_vec();
    while let Some(last) = out.pop() {
        if last < u8::MAX {
            out.push(last + 1);
            return Some(out);
        }
    }
    None
}

/// Callback invoked for every `(key, value)` visited by a scan.
///
/// Return [`ControlFlow::Break`] to stop the scan early.
pub type Visitor<'a> = dyn FnMut(&[u8], &[u8]) -> ControlFlow<()> + 'a;

/// Read operations available inside any transaction.
pub trait ReadTxn {
    /// Reads the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine fails to read.
    fn get(&self, space: Space, key: &[u8]) -> StorageResult<Option<Vec<u8>>>;

    /// Visits the keys of `space` that fall in `range`, in `direction` order.
    ///
    /// The underlying cursor lives only for the duration of this call.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine fails while iterating.
    fn scan(
        &self,
        space: Space,
        range: &KeyRange,
        direction: Direction,
        visit: &mut Visitor<'_>,
    ) -> StorageResult<()>;

    /// Returns the first entry whose key starts with `prefix`.
    ///
    /// # Errors
    ///
    /// Propagates scan errors.
    fn first_with_prefix(
        &self,
        space: Space,
        prefix: &[u8],
    ) -> StorageResult<Option<(Vec<u8>, Vec<u8>)>> {
        let mut found = None;
        self.scan(
            space,
            &KeyRange::prefix(prefix),
            Direction::Forward,
            &mut |k, v| {
                found = Some((k.to_vec(), v.to_vec()));
                ControlFlow::Break(())
            },
        )?;
        Ok(found)
    }

    /// Counts the entries of a space.
    ///
    /// # Errors
    ///
    /// Propagates scan errors.
    fn count(&self, space: Space) -> StorageResult<usize> {
        let mut n = 0usize;
        self.scan(space, &KeyRange::all(), Direction::Forward, &mut |_, _| {
            n += 1;
            ControlFlow::Continue(())
        })?;
        Ok(n)
    }
}

/// A read-write transaction.
///
/// Writes are invisible to other transactions until [`WriteTxn::commit`].
/// Dropping the transaction without committing aborts it.
pub trait WriteTxn: ReadTxn {
    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine rejects the write.
    fn put(&mut self, space: Space, key: &[u8], value: &[u8]) -> StorageResult<()>;

    /// Removes `key` if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine rejects the delete.
    fn delete(&mut self, space: Space, key: &[u8]) -> StorageResult<()>;

    /// Allocates the next record pointer.
    ///
    /// Whether the allocation is rolled back on abort is engine-specific.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::SequenceExhausted`] when the counter range is
    /// used up, or an engine error.
    fn next_pointer(&mut self) -> StorageResult<Pointer>;

    /// Atomically applies every write made in this transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit fails; nothing is applied in that case.
    fn commit(self: Box<Self>) -> StorageResult<()>;

    /// Discards every write made in this transaction.
    fn abort(self: Box<Self>);
}

/// An embedded key-value engine adapter.
///
/// # Invariants
///
/// - Writers are serialized (at most one open write transaction)
/// - A committed transaction is visible in full or not at all
/// - Backends must be `Send + Sync` for concurrent access
///
/// # Implementors
///
/// - [`super::InMemoryBackend`] - prefix-partitioned, for tests and ephemeral stores
/// - [`super::RedbBackend`] - table-per-space persistent B+tree
pub trait KvBackend: Send + Sync {
    /// Short engine name, for logs.
    fn name(&self) -> &'static str;

    /// Begins a read transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot start a transaction.
    fn begin_read(&self) -> StorageResult<Box<dyn ReadTxn + '_>>;

    /// Begins a write transaction, blocking while another writer is active.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot start a transaction.
    fn begin_write(&self) -> StorageResult<Box<dyn WriteTxn + '_>>;

    /// Flushes engine buffers to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    fn flush(&self) -> StorageResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn space_tags_are_unique() {
        let mut tags: Vec<u8> = Space::ALL.iter().map(|s| s.tag()).collect();
        tags.sort_unstable();
        tags.dedup();
        assert_eq!(tags.len(), Space::ALL.len());
    }

    #[test]
    fn space_from_tag() {
        assert_eq!(Space::from_tag(6), Some(Space::Tag));
        assert_eq!(Space::from_tag(255), Some(Space::Settings));
        assert_eq!(Space::from_tag(42), None);
    }

    #[test]
    fn compact_pointer_layout() {
        let p = Pointer::compact(0x0102_0304);
        assert_eq!(p.as_bytes(), &[0, 1, 2, 3, 4]);
        assert_eq!(p.counter(), 0x0102_0304);
        assert_eq!(Pointer::from_bytes(p.as_bytes()).unwrap(), p);
    }

    #[test]
    fn wide_pointer_layout() {
        let p = Pointer::wide(258);
        assert_eq!(p.as_bytes(), &[0, 0, 0, 0, 0, 0, 1, 2]);
        assert_eq!(p.counter(), 258);
        assert_eq!(Pointer::from_bytes(p.as_bytes()).unwrap(), p);
    }

    #[test]
    fn pointer_byte_order_matches_counter_order() {
        assert!(Pointer::compact(255).as_bytes() < Pointer::compact(256).as_bytes());
        assert!(Pointer::wide(255).as_bytes() < Pointer::wide(256).as_bytes());
    }

    #[test]
    fn pointer_rejects_bad_lengths() {
        assert!(Pointer::from_bytes(&[0; 4]).is_err());
        assert!(Pointer::from_bytes(&[1, 0, 0, 0, 1]).is_err());
    }

    #[test]
    fn prefix_successor_cases() {
        assert_eq!(prefix_successor(b"ab"), Some(b"ac".to_vec()));
        assert_eq!(prefix_successor(&[1, 0xff]), Some(vec![2]));
        assert_eq!(prefix_successor(&[0xff, 0xff]), None);
        assert_eq!(prefix_successor(&[]), None);
    }

    #[test]
    fn prefix_range_contains() {
        let r = KeyRange::prefix(&[5, 1]);
        assert!(r.contains(&[5, 1]));
        assert!(r.contains(&[5, 1, 0xff, 0xff]));
        assert!(!r.contains(&[5, 2]));
        assert!(!r.contains(&[5]));
    }

    #[test]
    fn empty_range_detection() {
        assert!(KeyRange::inclusive(vec![2], vec![1]).is_empty());
        assert!(!KeyRange::inclusive(vec![1], vec![1]).is_empty());
        assert!(!KeyRange::all().is_empty());
    }

    proptest! {
        #[test]
        fn prefix_range_holds_exactly_extensions(
            prefix in prop::collection::vec(any::<u8>(), 0..6),
            key in prop::collection::vec(any::<u8>(), 0..8),
        ) {
            let range = KeyRange::prefix(&prefix);
            prop_assert_eq!(range.contains(&key), key.starts_with(&prefix));
        }
    }
}
