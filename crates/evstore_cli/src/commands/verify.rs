//! Verify command implementation.
//!
//! Checks that every stored record decodes, that each of its index entries
//! exists and points back at it, and that no index entry points at a record
//! that is gone.

use super::open_raw;
use evstore_codec::decode_event;
use evstore_core::{index_keys, validate};
use evstore_storage::{Direction, KeyRange, KvBackend, Pointer, ReadTxn, Space};
use std::collections::BTreeSet;
use std::ops::ControlFlow;
use std::path::Path;
use std::time::Duration;

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Number of records checked.
    pub records_checked: usize,
    /// Number of valid records.
    pub valid_records: usize,
    /// Number of corrupt records.
    pub corrupt_records: usize,
    /// Index entries expected for the valid records.
    pub expected_entries: usize,
    /// Expected entries that were missing or pointed elsewhere.
    pub missing_entries: usize,
    /// Entries whose pointer has no record.
    pub orphan_entries: usize,
    /// List of errors found.
    pub errors: Vec<String>,
}

impl VerifyResult {
    /// Returns true if nothing is wrong.
    pub fn is_ok(&self) -> bool {
        self.corrupt_records == 0
            && self.missing_entries == 0
            && self.orphan_entries == 0
            && self.errors.is_empty()
    }
}

fn collect(
    txn: &dyn ReadTxn,
    space: Space,
) -> Result<Vec<(Vec<u8>, Vec<u8>)>, Box<dyn std::error::Error>> {
    let mut entries = Vec::new();
    txn.scan(space, &KeyRange::all(), Direction::Forward, &mut |k, v| {
        entries.push((k.to_vec(), v.to_vec()));
        ControlFlow::Continue(())
    })?;
    Ok(entries)
}

/// Checks every record and index entry of `backend`.
pub fn verify_backend(backend: &dyn KvBackend) -> Result<VerifyResult, Box<dyn std::error::Error>> {
    let txn = backend.begin_read()?;
    let mut result = VerifyResult::default();
    let mut pointers = BTreeSet::new();

    for (key, bytes) in collect(&*txn, Space::Raw)? {
        result.records_checked += 1;
        pointers.insert(key.clone());

        let pointer = match Pointer::from_bytes(&key) {
            Ok(p) => p,
            Err(e) => {
                result.corrupt_records += 1;
                result.errors.push(format!("bad pointer {}: {}", hex::encode(&key), e));
                continue;
            }
        };
        let event = match decode_event(&bytes).map_err(|e| e.to_string()).and_then(|ev| {
            validate(&ev).map_err(|e| e.to_string())?;
            Ok(ev)
        }) {
            Ok(ev) => ev,
            Err(e) => {
                result.corrupt_records += 1;
                result.errors.push(format!("record {}: {}", hex::encode(&key), e));
                continue;
            }
        };

        result.valid_records += 1;
        for entry in index_keys(&event, &pointer) {
            result.expected_entries += 1;
            let stored = txn.get(entry.family.space(), &entry.key)?;
            if stored.as_deref() != Some(pointer.as_bytes()) {
                result.missing_entries += 1;
                result.errors.push(format!(
                    "event {}: missing {} entry",
                    event.id,
                    entry.family.space().name()
                ));
            }
        }
    }

    for space in Space::INDEXES {
        for (key, value) in collect(&*txn, space)? {
            if !pointers.contains(&value) {
                result.orphan_entries += 1;
                result.errors.push(format!(
                    "{} entry {} points at missing record {}",
                    space.name(),
                    hex::encode(&key),
                    hex::encode(&value)
                ));
            }
        }
    }

    Ok(result)
}

/// Runs the verify command.
pub fn run(path: &Path, timeout: Duration) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying store at {:?}", path);
    println!();

    let raw = open_raw(path, timeout)?;
    let result = verify_backend(&raw.backend)?;
    print_result(&result);

    println!();
    if result.is_ok() {
        println!("✓ Store verification passed");
        Ok(())
    } else {
        println!("✗ Store verification failed");
        Err("Verification failed".into())
    }
}

fn print_result(result: &VerifyResult) {
    println!(
        "  Records checked: {}, valid: {}, corrupt: {}",
        result.records_checked, result.valid_records, result.corrupt_records
    );
    println!(
        "  Index entries expected: {}, missing: {}, orphaned: {}",
        result.expected_entries, result.missing_entries, result.orphan_entries
    );
    for error in &result.errors {
        println!("    ERROR: {}", error);
    }
}
