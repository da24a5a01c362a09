//! CLI command implementations.

pub mod import;
pub mod inspect;
pub mod migrate;
pub mod verify;

use evstore_core::DataDir;
use evstore_storage::{RedbBackend, Tuning};
use std::path::Path;
use std::time::Duration;

/// An engine opened directly, without running migrations.
///
/// The directory lock is held for as long as this value lives.
pub struct RawStore {
    /// The engine inside the directory. Dropped before the lock.
    pub backend: RedbBackend,
    /// The locked data directory.
    pub dir: DataDir,
}

/// Opens the engine of an existing store at `path`.
pub fn open_raw(path: &Path, timeout: Duration) -> Result<RawStore, Box<dyn std::error::Error>> {
    let dir = DataDir::open(path, false, timeout)?;
    if dir.is_new() {
        return Err(format!("No store found at {:?}", path).into());
    }
    let backend = RedbBackend::open(&dir.engine_path(), &Tuning::new())?;
    Ok(RawStore { backend, dir })
}
