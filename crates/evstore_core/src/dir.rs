//! Data directory management.
//!
//! This module handles the file system layout of an on-disk store:
//!
//! ```text
//! <path>/
//! ├─ LOCK          # Advisory lock, one handle per directory
//! └─ events.redb   # Engine file
//! ```
//!
//! The LOCK file makes a directory a per-path singleton across processes.
//! Opening waits for a held lock up to a timeout instead of failing at once,
//! so a restarting process can take over from one that is shutting down.

use crate::error::{CoreError, CoreResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const LOCK_FILE: &str = "LOCK";
const ENGINE_FILE: &str = "events.redb";
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// An exclusively locked data directory.
///
/// The lock is released when this value is dropped.
#[derive(Debug)]
pub struct DataDir {
    /// Root directory path.
    path: PathBuf,
    /// Lock file handle (held for exclusive access).
    _lock_file: File,
}

impl DataDir {
    /// Opens or creates a data directory and takes its lock.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the data directory
    /// * `create_if_missing` - If true, creates the directory if it doesn't exist
    /// * `timeout` - How long to keep retrying a held lock
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory doesn't exist and `create_if_missing` is false
    /// - The lock is still held after `timeout` (returns `ResourceLocked`)
    /// - I/O errors occur
    pub fn open(path: &Path, create_if_missing: bool, timeout: Duration) -> CoreResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(CoreError::invalid_format(format!(
                    "data directory does not exist: {}",
                    path.display()
                )));
            }
        }

        if !path.is_dir() {
            return Err(CoreError::invalid_format(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        let started = Instant::now();
        let mut warned = false;
        while lock_file.try_lock_exclusive().is_err() {
            let waited = started.elapsed();
            if waited >= timeout {
                return Err(CoreError::ResourceLocked {
                    path: path.to_path_buf(),
                    waited,
                });
            }
            if !warned {
                warn!(path = %path.display(), "data directory is locked, waiting");
                warned = true;
            }
            thread::sleep(LOCK_POLL_INTERVAL.min(timeout - waited));
        }

        debug!(path = %path.display(), "acquired data directory lock");
        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the path to the data directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the path to the engine file.
    #[must_use]
    pub fn engine_path(&self) -> PathBuf {
        self.path.join(ENGINE_FILE)
    }

    /// Returns true if no engine file exists yet.
    #[must_use]
    pub fn is_new(&self) -> bool {
        !self.engine_path().exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const SHORT: Duration = Duration::from_millis(120);

    #[test]
    fn open_creates_directory() {
        let temp = tempdir().unwrap();
        let db_path = temp.path().join("new_db");

        assert!(!db_path.exists());

        let dir = DataDir::open(&db_path, true, SHORT).unwrap();
        assert!(db_path.is_dir());
        assert!(db_path.join(LOCK_FILE).exists());
        assert!(dir.is_new());
        assert_eq!(dir.engine_path(), db_path.join(ENGINE_FILE));
    }

    #[test]
    fn open_fails_if_not_exists_and_no_create() {
        let temp = tempdir().unwrap();
        let result = DataDir::open(&temp.path().join("nonexistent"), false, SHORT);
        assert!(matches!(result, Err(CoreError::InvalidFormat { .. })));
    }

    #[test]
    fn held_lock_times_out() {
        let temp = tempdir().unwrap();
        let db_path = temp.path().join("locked_db");

        let _dir1 = DataDir::open(&db_path, true, SHORT).unwrap();

        let started = Instant::now();
        let result = DataDir::open(&db_path, true, SHORT);
        assert!(started.elapsed() >= SHORT);
        match result {
            Err(CoreError::ResourceLocked { path, waited }) => {
                assert_eq!(path, db_path);
                assert!(waited >= SHORT);
            }
            other => panic!("expected ResourceLocked, got {other:?}"),
        }
    }

    #[test]
    fn lock_released_on_drop() {
        let temp = tempdir().unwrap();
        let db_path = temp.path().join("reopen_db");

        {
            let _dir = DataDir::open(&db_path, true, SHORT).unwrap();
        }

        let _dir2 = DataDir::open(&db_path, true, SHORT).unwrap();
    }

    #[test]
    fn waiting_open_acquires_released_lock() {
        let temp = tempdir().unwrap();
        let db_path = temp.path().join("handoff_db");

        let first = DataDir::open(&db_path, true, SHORT).unwrap();
        let releaser = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            drop(first);
        });

        let second = DataDir::open(&db_path, true, Duration::from_secs(5));
        releaser.join().unwrap();
        assert!(second.is_ok());
    }
}
