//! Secondary index key layout.
//!
//! Every key is a concatenation of fixed-width big-endian fields followed by
//! the record pointer, so ascending byte order equals ascending numeric order
//! and two records never share a key:
//!
//! | Family        | Key                                   |
//! |---------------|---------------------------------------|
//! | `CreatedAt`   | created_at(4) ‖ ptr                   |
//! | `Id`          | id(32) ‖ ptr                          |
//! | `Kind`        | kind(2) ‖ created_at(4) ‖ ptr         |
//! | `Pubkey`      | pubkey(32) ‖ created_at(4) ‖ ptr      |
//! | `PubkeyKind`  | pubkey(32) ‖ kind(2) ‖ created_at(4) ‖ ptr |
//! | `Tag`         | value(1..=100) ‖ created_at(4) ‖ ptr  |
//! | `Tag32`       | value(32) ‖ created_at(4) ‖ ptr       |
//!
//! This layout is persisted; changing it requires a migration.

use crate::error::{CoreError, CoreResult};
use evstore_codec::{Event, EventId, PublicKey, Tag};
use evstore_storage::{Pointer, Space};

/// Largest storable kind.
pub const MAX_KIND: u32 = u16::MAX as u32;

/// Largest storable creation time.
pub const MAX_CREATED_AT: u64 = u32::MAX as u64;

/// Longest tag value that is indexed.
pub const MAX_TAG_VALUE_LEN: usize = 100;

/// One secondary index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IndexFamily {
    /// By creation time.
    CreatedAt,
    /// By event id.
    Id,
    /// By kind, then time.
    Kind,
    /// By author, then time.
    Pubkey,
    /// By author and kind, then time.
    PubkeyKind,
    /// By short tag value, then time.
    Tag,
    /// By 32-byte tag value, then time.
    Tag32,
}

impl IndexFamily {
    /// Address space holding this family.
    #[must_use]
    pub const fn space(self) -> Space {
        match self {
            IndexFamily::CreatedAt => Space::CreatedAt,
            IndexFamily::Id => Space::Id,
            IndexFamily::Kind => Space::Kind,
            IndexFamily::Pubkey => Space::Pubkey,
            IndexFamily::PubkeyKind => Space::PubkeyKind,
            IndexFamily::Tag => Space::Tag,
            IndexFamily::Tag32 => Space::Tag32,
        }
    }

    /// Scan prefix for one event id.
    #[must_use]
    pub fn prefix_for_id(id: &EventId) -> Vec<u8> {
        id.as_bytes().to_vec()
    }

    /// Scan prefix for one kind.
    #[must_use]
    pub fn prefix_for_kind(kind: u16) -> Vec<u8> {
        kind.to_be_bytes().to_vec()
    }

    /// Scan prefix for one author.
    #[must_use]
    pub fn prefix_for_pubkey(pubkey: &PublicKey) -> Vec<u8> {
        pubkey.as_bytes().to_vec()
    }

    /// Scan prefix for one author and kind.
    #[must_use]
    pub fn prefix_for_pubkey_kind(pubkey: &PublicKey, kind: u16) -> Vec<u8> {
        let mut k = Vec::with_capacity(PublicKey::LEN + 2);
        k.extend_from_slice(pubkey.as_bytes());
        k.extend_from_slice(&kind.to_be_bytes());
        k
    }

    /// Family and scan prefix for one tag value, classified the same way
    /// stored tags are. Returns `None` for values that are never indexed.
    #[must_use]
    pub fn prefix_for_tag_value(value: &str) -> Option<(IndexFamily, Vec<u8>)> {
        classify_value(value).map(|class| match class {
            TagValue::Short(v) => (IndexFamily::Tag, v.to_vec()),
            TagValue::Long(v) => (IndexFamily::Tag32, v.to_vec()),
        })
    }
}

/// One secondary index entry; the stored value is the pointer.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IndexKey {
    /// Target family.
    pub family: IndexFamily,
    /// Full key, pointer included.
    pub key: Vec<u8>,
}

/// How an indexable tag value is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagValue<'a> {
    /// UTF-8 bytes under [`IndexFamily::Tag`].
    Short(&'a [u8]),
    /// Decoded hex under [`IndexFamily::Tag32`].
    Long([u8; 32]),
}

/// Classifies a tag for indexing.
///
/// A tag is indexed only if it has at least two elements, its name is
/// exactly one byte long and its value is 1 to 100 bytes long. A value that
/// is hex for exactly 32 bytes is stored decoded.
#[must_use]
pub fn classify_tag(tag: &Tag) -> Option<TagValue<'_>> {
    let [name, value, ..] = tag.as_slice() else {
        return None;
    };
    if name.len() != 1 {
        return None;
    }
    classify_value(value)
}

fn classify_value(value: &str) -> Option<TagValue<'_>> {
    if value.is_empty() || value.len() > MAX_TAG_VALUE_LEN {
        return None;
    }
    let mut raw = [0u8; 32];
    if value.len() == 64 && hex::decode_to_slice(value, &mut raw).is_ok() {
        return Some(TagValue::Long(raw));
    }
    Some(TagValue::Short(value.as_bytes()))
}

/// Rejects events whose fields do not fit the key layout.
///
/// # Errors
///
/// Returns [`CoreError::Validation`] for a kind above [`MAX_KIND`] or a
/// creation time above [`MAX_CREATED_AT`].
pub fn validate(event: &Event) -> CoreResult<()> {
    if event.kind > MAX_KIND {
        return Err(CoreError::validation(format!(
            "kind {} exceeds {MAX_KIND}",
            event.kind
        )));
    }
    if event.created_at > MAX_CREATED_AT {
        return Err(CoreError::validation(format!(
            "created_at {} exceeds {MAX_CREATED_AT}",
            event.created_at
        )));
    }
    Ok(())
}

fn kind_bytes(event: &Event) -> [u8; 2] {
    u16::try_from(event.kind).unwrap_or(u16::MAX).to_be_bytes()
}

fn time_bytes(event: &Event) -> [u8; 4] {
    u32::try_from(event.created_at).unwrap_or(u32::MAX).to_be_bytes()
}

fn compose(parts: &[&[u8]]) -> Vec<u8> {
    let mut k = Vec::with_capacity(parts.iter().map(|p| p.len()).sum());
    for part in parts {
        k.extend_from_slice(part);
    }
    k
}

/// Key of the by-id entry for `id` stored at `pointer`.
#[must_use]
pub fn id_key(id: &EventId, pointer: &Pointer) -> Vec<u8> {
    compose(&[id.as_bytes(), pointer.as_bytes()])
}

/// Computes every index entry for `event` stored at `pointer`.
///
/// Returns the five fixed entries followed by one entry per eligible tag, in
/// tag order. Repeated tags yield repeated entries. Fields are expected to
/// have passed [`validate`]; out-of-range values saturate.
#[must_use]
pub fn index_keys(event: &Event, pointer: &Pointer) -> Vec<IndexKey> {
    let ptr = pointer.as_bytes();
    let kind = kind_bytes(event);
    let time = time_bytes(event);
    let pubkey = event.pubkey.as_bytes();

    let mut keys = Vec::with_capacity(5 + event.tags.len());
    keys.push(IndexKey {
        family: IndexFamily::Id,
        key: id_key(&event.id, pointer),
    });
    keys.push(IndexKey {
        family: IndexFamily::CreatedAt,
        key: compose(&[&time, ptr]),
    });
    keys.push(IndexKey {
        family: IndexFamily::Kind,
        key: compose(&[&kind, &time, ptr]),
    });
    keys.push(IndexKey {
        family: IndexFamily::Pubkey,
        key: compose(&[pubkey, &time, ptr]),
    });
    keys.push(IndexKey {
        family: IndexFamily::PubkeyKind,
        key: compose(&[pubkey, &kind, &time, ptr]),
    });

    for tag in &event.tags {
        match classify_tag(tag) {
            Some(TagValue::Short(v)) => keys.push(IndexKey {
                family: IndexFamily::Tag,
                key: compose(&[v, &time, ptr]),
            }),
            Some(TagValue::Long(v)) => keys.push(IndexKey {
                family: IndexFamily::Tag32,
                key: compose(&[&v, &time, ptr]),
            }),
            None => {}
        }
    }

    keys
}
