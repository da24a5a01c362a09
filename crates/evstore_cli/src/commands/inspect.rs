//! Inspect command implementation.

use super::open_raw;
use evstore_core::migration::read_version;
use evstore_storage::{KvBackend, ReadTxn, Space, SERIAL_KEY};
use serde::Serialize;
use std::path::Path;
use std::time::Duration;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Data directory.
    pub path: String,
    /// Engine file size in bytes.
    pub engine_size: u64,
    /// Layout version marker, if stamped.
    pub layout_version: Option<u64>,
    /// Last allocated pointer counter.
    pub serial: Option<u64>,
    /// Number of stored events.
    pub event_count: usize,
    /// Entry counts of every space.
    pub spaces: Vec<SpaceStats>,
}

/// Entry count of one space.
#[derive(Debug, Serialize)]
pub struct SpaceStats {
    /// Space name.
    pub name: &'static str,
    /// Number of entries.
    pub entries: usize,
}

/// Collects statistics for the store at `path`.
pub fn inspect(path: &Path, timeout: Duration) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let raw = open_raw(path, timeout)?;
    let engine_size = std::fs::metadata(raw.dir.engine_path())?.len();
    let txn = raw.backend.begin_read()?;

    let mut spaces = Vec::with_capacity(Space::ALL.len());
    for space in Space::ALL {
        spaces.push(SpaceStats {
            name: space.name(),
            entries: txn.count(space)?,
        });
    }

    Ok(InspectResult {
        path: path.display().to_string(),
        engine_size,
        layout_version: read_version(&*txn)?,
        serial: txn.get(Space::Settings, SERIAL_KEY)?.and_then(|b| decode_counter(&b)),
        event_count: txn.count(Space::Raw)?,
        spaces,
    })
}

fn decode_counter(bytes: &[u8]) -> Option<u64> {
    match bytes.len() {
        4 => bytes.try_into().ok().map(u32::from_be_bytes).map(u64::from),
        8 => bytes.try_into().ok().map(u64::from_be_bytes),
        _ => None,
    }
}

/// Runs the inspect command.
pub fn run(path: &Path, timeout: Duration, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let result = inspect(path, timeout)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("Store: {}", result.path);
    println!("================");
    println!("  Engine size: {} bytes", result.engine_size);
    match result.layout_version {
        Some(v) => println!("  Layout version: {}", v),
        None => println!("  Layout version: (unstamped)"),
    }
    if let Some(serial) = result.serial {
        println!("  Last pointer: {}", serial);
    }
    println!("  Events: {}", result.event_count);
    println!();
    println!("Spaces:");
    for space in &result.spaces {
        println!("  {:<16} {}", space.name, space.entries);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evstore_codec::{Event, EventId, PublicKey, Signature};
    use evstore_core::{Config, EventStore};

    #[test]
    fn inspect_counts_spaces() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");
        let store = EventStore::open(&path, Config::default()).unwrap();
        store
            .save(&Event {
                id: EventId::from_bytes([1; 32]),
                pubkey: PublicKey::from_bytes([2; 32]),
                created_at: 10,
                kind: 1,
                tags: vec![vec!["t".into(), "cli".into()]],
                content: String::new(),
                sig: Signature::from_bytes([0; 64]),
            })
            .unwrap();
        store.close().unwrap();

        let result = inspect(&path, Duration::from_secs(1)).unwrap();
        assert_eq!(result.event_count, 1);
        assert_eq!(result.layout_version, Some(1));
        assert_eq!(result.serial, Some(1));
        let tag = result.spaces.iter().find(|s| s.name == "idx_tag").unwrap();
        assert_eq!(tag.entries, 1);
    }

    #[test]
    fn missing_store_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(inspect(&dir.path().join("nope"), Duration::from_millis(10)).is_err());
    }
}
