//! Single-family index scans.

use super::keys::IndexFamily;
use evstore_codec::PublicKey;
use evstore_storage::{prefix_successor, Direction, KeyRange};
use std::ops::Bound;

/// A time-bounded scan over one index family.
///
/// Built with one of the family constructors and refined with the
/// `#[must_use]` setters:
///
/// ```rust
/// use evstore_core::IndexScan;
///
/// let scan = IndexScan::kind(1).since(1_700_000_000).newest_first().limit(20);
/// assert_eq!(scan.effective_limit(500), 20);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexScan {
    family: IndexFamily,
    prefix: Vec<u8>,
    since: u32,
    until: u32,
    direction: Direction,
    limit: Option<usize>,
}

impl IndexScan {
    fn new(family: IndexFamily, prefix: Vec<u8>) -> Self {
        Self {
            family,
            prefix,
            since: 0,
            until: u32::MAX,
            direction: Direction::Forward,
            limit: None,
        }
    }

    /// Every event, by creation time.
    #[must_use]
    pub fn created_at() -> Self {
        Self::new(IndexFamily::CreatedAt, Vec::new())
    }

    /// Events of one kind.
    #[must_use]
    pub fn kind(kind: u16) -> Self {
        Self::new(IndexFamily::Kind, IndexFamily::prefix_for_kind(kind))
    }

    /// Events by one author.
    #[must_use]
    pub fn pubkey(pubkey: &PublicKey) -> Self {
        Self::new(IndexFamily::Pubkey, IndexFamily::prefix_for_pubkey(pubkey))
    }

    /// Events of one kind by one author.
    #[must_use]
    pub fn pubkey_kind(pubkey: &PublicKey, kind: u16) -> Self {
        Self::new(
            IndexFamily::PubkeyKind,
            IndexFamily::prefix_for_pubkey_kind(pubkey, kind),
        )
    }

    /// Events carrying a tag with this value.
    ///
    /// Returns `None` for values that are never indexed (empty or longer
    /// than 100 bytes).
    #[must_use]
    pub fn tag_value(value: &str) -> Option<Self> {
        IndexFamily::prefix_for_tag_value(value).map(|(family, prefix)| Self::new(family, prefix))
    }

    /// Lower creation time bound, inclusive.
    #[must_use]
    pub const fn since(mut self, since: u32) -> Self {
        self.since = since;
        self
    }

    /// Upper creation time bound, inclusive.
    #[must_use]
    pub const fn until(mut self, until: u32) -> Self {
        self.until = until;
        self
    }

    /// Iterates newest first.
    #[must_use]
    pub const fn newest_first(mut self) -> Self {
        self.direction = Direction::Reverse;
        self
    }

    /// Sets the iteration direction.
    #[must_use]
    pub const fn direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    /// Caps the number of results.
    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Scanned family.
    #[must_use]
    pub const fn family(&self) -> IndexFamily {
        self.family
    }

    /// Key prefix ahead of the creation time.
    #[must_use]
    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    /// Iteration direction.
    #[must_use]
    pub const fn scan_direction(&self) -> Direction {
        self.direction
    }

    /// Requested limit, clamped to `max`.
    #[must_use]
    pub fn effective_limit(&self, max: usize) -> usize {
        self.limit.map_or(max, |l| l.min(max))
    }

    /// Key range covering `prefix ‖ created_at[since..=until]`.
    #[must_use]
    pub fn key_range(&self) -> KeyRange {
        let mut start = self.prefix.clone();
        start.extend_from_slice(&self.since.to_be_bytes());
        let mut last = self.prefix.clone();
        last.extend_from_slice(&self.until.to_be_bytes());
        KeyRange {
            start: Bound::Included(start),
            end: prefix_successor(&last).map_or(Bound::Unbounded, Bound::Excluded),
        }
    }

    /// Returns true if a stored `key` whose value is a pointer of
    /// `pointer_len` bytes belongs to this scan.
    ///
    /// Variable-length tag values share a key space, so a scan for `"ab"`
    /// can meet keys written for `"abc"`; the exact length rules them out.
    #[must_use]
    pub fn matches(&self, key: &[u8], pointer_len: usize) -> bool {
        key.len() == self.prefix.len() + 4 + pointer_len && key.starts_with(&self.prefix)
    }
}
