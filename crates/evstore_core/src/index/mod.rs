//! Secondary indexes over stored events.
//!
//! Indexes are internal access paths, not a query language. Each event is
//! stored once under its pointer and referenced from every family through
//! entries whose value is that pointer. Entries are:
//! - Computed purely from the event and its pointer
//! - Written and removed in the same transaction as the record
//! - Fully derivable from the primary space (see the `rebuild_indexes`
//!   migration)

mod keys;
mod scan;

pub use keys::{
    classify_tag, id_key, index_keys, validate, IndexFamily, IndexKey, TagValue, MAX_CREATED_AT,
    MAX_KIND, MAX_TAG_VALUE_LEN,
};
pub use scan::IndexScan;

use crate::error::CoreResult;
use evstore_codec::{Event, EventId};
use evstore_storage::{Pointer, ReadTxn, Space, StorageResult, WriteTxn};

/// Looks up the pointer stored for `id` through the by-id family.
///
/// # Errors
///
/// Returns an error if the scan fails or the stored pointer is malformed.
pub fn find_pointer<T: ReadTxn + ?Sized>(txn: &T, id: &EventId) -> CoreResult<Option<Pointer>> {
    match txn.first_with_prefix(Space::Id, &IndexFamily::prefix_for_id(id))? {
        Some((_, value)) => Ok(Some(Pointer::from_bytes(&value)?)),
        None => Ok(None),
    }
}

/// Writes every index entry of `event` at `pointer`. Returns the count.
///
/// # Errors
///
/// Returns the first storage error; the caller must abort the transaction.
pub fn put_index_entries<T: WriteTxn + ?Sized>(
    txn: &mut T,
    event: &Event,
    pointer: &Pointer,
) -> StorageResult<usize> {
    let keys = index_keys(event, pointer);
    for entry in &keys {
        txn.put(entry.family.space(), &entry.key, pointer.as_bytes())?;
    }
    Ok(keys.len())
}

/// Removes every index entry of `event` at `pointer`. Returns the count.
///
/// # Errors
///
/// Returns the first storage error; the caller must abort the transaction.
pub fn remove_index_entries<T: WriteTxn + ?Sized>(
    txn: &mut T,
    event: &Event,
    pointer: &Pointer,
) -> StorageResult<usize> {
    let keys = index_keys(event, pointer);
    for entry in &keys {
        txn.delete(entry.family.space(), &entry.key)?;
    }
    Ok(keys.len())
}
