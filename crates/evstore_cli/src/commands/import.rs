//! Import command implementation.
//!
//! Reads one JSON event per line and saves each through the normal write
//! path, so every imported event is indexed exactly like a live one.

use evstore_codec::Event;
use evstore_core::{Config, CoreError, EventStore};
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Outcome of an import run.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ImportResult {
    /// Events newly stored.
    pub imported: usize,
    /// Events skipped because their id was already stored.
    pub duplicates: usize,
    /// Lines that did not parse or failed validation.
    pub invalid: usize,
    /// Events rejected by the store for any other reason.
    pub failed: usize,
}

impl ImportResult {
    /// Total number of non-blank lines seen.
    pub fn total(&self) -> usize {
        self.imported + self.duplicates + self.invalid + self.failed
    }
}

/// Saves every event read from `reader` into `store`.
///
/// With `stop_on_error` the first invalid or failed line aborts the run;
/// duplicates never do.
pub fn import_from<R: BufRead>(
    store: &EventStore,
    reader: R,
    stop_on_error: bool,
) -> Result<ImportResult, Box<dyn std::error::Error>> {
    let mut result = ImportResult::default();

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let line_no = index + 1;
        if line.trim().is_empty() {
            continue;
        }

        let event: Event = match serde_json::from_str(&line) {
            Ok(ev) => ev,
            Err(e) => {
                result.invalid += 1;
                warn!(line = line_no, error = %e, "unparseable event");
                if stop_on_error {
                    return Err(format!("line {}: {}", line_no, e).into());
                }
                continue;
            }
        };

        match store.save(&event) {
            Ok(()) => {
                debug!(line = line_no, id = %event.id, "imported");
                result.imported += 1;
            }
            Err(CoreError::DuplicateEvent { .. }) => result.duplicates += 1,
            Err(e @ CoreError::Validation { .. }) => {
                result.invalid += 1;
                warn!(line = line_no, error = %e, "rejected event");
                if stop_on_error {
                    return Err(format!("line {}: {}", line_no, e).into());
                }
            }
            Err(e) => {
                result.failed += 1;
                warn!(line = line_no, error = %e, "save failed");
                if stop_on_error {
                    return Err(format!("line {}: {}", line_no, e).into());
                }
            }
        }
    }

    Ok(result)
}

/// Runs the import command. `source` of `-` reads standard input.
pub fn run(
    path: &Path,
    timeout: Duration,
    source: &Path,
    stop_on_error: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    info!("Importing {:?} into {:?}", source, path);

    let config = Config::default().open_timeout(timeout);
    let store = EventStore::open(path, config)?;

    let result = if source == Path::new("-") {
        import_from(&store, io::stdin().lock(), stop_on_error)?
    } else {
        import_from(&store, BufReader::new(File::open(source)?), stop_on_error)?
    };
    store.close()?;

    println!("Import Summary");
    println!("==============");
    println!("  Lines read: {}", result.total());
    println!("  Imported: {}", result.imported);
    println!("  Duplicates: {}", result.duplicates);
    println!("  Invalid: {}", result.invalid);
    println!("  Failed: {}", result.failed);

    if result.failed > 0 {
        return Err("Some events could not be stored".into());
    }
    Ok(())
}
