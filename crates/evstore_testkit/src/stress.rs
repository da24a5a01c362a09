//! Stress tests for evstore.
//!
//! These helpers drive a store under heavy load and concurrent access and
//! report what happened; assertions are left to the caller.

use crate::fixtures::{author, EventBuilder, BASE_TIME};
use evstore_codec::Event;
use evstore_core::{EventStore, IndexScan};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Operations refused because the event was already stored.
    pub duplicate_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, duplicates: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + duplicates + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            duplicate_ops: duplicates,
            failed_ops: failed,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total operations: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Duplicates: {}", self.duplicate_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of operations to perform.
    pub operations: usize,
    /// Number of concurrent threads (for concurrent tests).
    pub threads: usize,
    /// Size of event content in bytes.
    pub content_size: usize,
    /// Number of distinct events operations draw from.
    pub distinct_events: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 10_000,
            threads: 4,
            content_size: 256,
            distinct_events: 1_000,
        }
    }
}

/// The pool of events a stress run draws from.
pub fn stress_events(config: &StressConfig) -> Vec<Event> {
    let filler = "x".repeat(config.content_size);
    (0..config.distinct_events)
        .map(|i| {
            EventBuilder::new()
                .pubkey(author((i % 8) as u8))
                .kind((i % 5) as u32)
                .created_at(BASE_TIME + i as u64)
                .tag("t", &format!("topic{}", i % 10))
                .content(format!("{i}:{filler}"))
                .build()
        })
        .collect()
}

#[derive(Default)]
struct Tally {
    successful: AtomicUsize,
    duplicates: AtomicUsize,
    failed: AtomicUsize,
}

impl Tally {
    fn record<T>(&self, result: &evstore_core::CoreResult<T>) {
        let counter = match result {
            Ok(_) => &self.successful,
            Err(e) if e.is_duplicate() => &self.duplicates,
            Err(_) => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn finish(&self, start: Instant) -> StressTestResult {
        StressTestResult::new(
            self.successful.load(Ordering::Relaxed),
            self.duplicates.load(Ordering::Relaxed),
            self.failed.load(Ordering::Relaxed),
            start.elapsed(),
        )
    }
}

/// Saves `operations` events in sequence, cycling through the pool.
pub fn stress_sequential_saves(store: &EventStore, config: &StressConfig) -> StressTestResult {
    let pool = stress_events(config);
    let tally = Tally::default();
    let start = Instant::now();

    for i in 0..config.operations {
        tally.record(&store.save(&pool[i % pool.len()]));
    }

    tally.finish(start)
}

/// Saves from several threads at once, every thread walking the same pool.
///
/// Each event must be stored exactly once; every other attempt is a
/// duplicate.
pub fn stress_concurrent_saves(store: Arc<EventStore>, config: &StressConfig) -> StressTestResult {
    let pool = Arc::new(stress_events(config));
    let tally = Arc::new(Tally::default());
    let ops_per_thread = config.operations / config.threads;
    let start = Instant::now();

    let handles: Vec<_> = (0..config.threads)
        .map(|t| {
            let store = Arc::clone(&store);
            let pool = Arc::clone(&pool);
            let tally = Arc::clone(&tally);
            thread::spawn(move || {
                for i in 0..ops_per_thread {
                    let event = &pool[(t + i) % pool.len()];
                    tally.record(&store.save(event));
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    tally.finish(start)
}

/// Mixes saves, scans and deletes (one third each).
pub fn stress_mixed_operations(store: &EventStore, config: &StressConfig) -> StressTestResult {
    let pool = stress_events(config);
    let tally = Tally::default();
    let start = Instant::now();

    for i in 0..config.operations {
        let event = &pool[i % pool.len()];
        match i % 3 {
            0 => tally.record(&store.save(event)),
            1 => tally.record(&store.scan(&IndexScan::pubkey(&event.pubkey).limit(20))),
            _ => tally.record(&store.delete(event)),
        }
    }

    tally.finish(start)
}

/// Runs scans from several threads while one thread keeps saving.
pub fn stress_concurrent_scans(store: Arc<EventStore>, config: &StressConfig) -> StressTestResult {
    let pool = Arc::new(stress_events(config));
    let tally = Arc::new(Tally::default());
    let ops_per_thread = config.operations / config.threads.max(1);
    let start = Instant::now();

    let writer = {
        let store = Arc::clone(&store);
        let pool = Arc::clone(&pool);
        let tally = Arc::clone(&tally);
        thread::spawn(move || {
            for event in pool.iter() {
                tally.record(&store.save(event));
            }
        })
    };

    let readers: Vec<_> = (0..config.threads)
        .map(|t| {
            let store = Arc::clone(&store);
            let tally = Arc::clone(&tally);
            thread::spawn(move || {
                for i in 0..ops_per_thread {
                    let scan = IndexScan::kind(((t + i) % 5) as u16).newest_first().limit(50);
                    tally.record(&store.scan(&scan));
                }
            })
        })
        .collect();

    writer.join().expect("Writer panicked");
    for handle in readers {
        handle.join().expect("Reader panicked");
    }

    tally.finish(start)
}

#[cfg(test)]
mod tests {
    use super::*;
    use evstore_storage::Space;

    fn create_test_store() -> EventStore {
        EventStore::open_in_memory().expect("Failed to create store")
    }

    #[test]
    fn test_sequential_saves() {
        let store = create_test_store();
        let config = StressConfig {
            operations: 1_000,
            distinct_events: 400,
            content_size: 32,
            ..Default::default()
        };

        let result = stress_sequential_saves(&store, &config);
        assert_eq!(result.failed_ops, 0);
        assert_eq!(result.successful_ops, 400);
        assert_eq!(result.duplicate_ops, 600);
        assert_eq!(store.count(Space::Raw).unwrap(), 400);
    }

    #[test]
    fn test_concurrent_saves_store_each_event_once() {
        let store = Arc::new(create_test_store());
        let config = StressConfig {
            operations: 800,
            threads: 4,
            distinct_events: 100,
            content_size: 16,
        };

        let result = stress_concurrent_saves(Arc::clone(&store), &config);
        assert_eq!(result.failed_ops, 0);
        assert_eq!(result.successful_ops, 100);
        assert_eq!(result.duplicate_ops, 700);
        assert_eq!(store.count(Space::Id).unwrap(), 100);
    }

    #[test]
    fn test_mixed_operations() {
        let store = create_test_store();
        let config = StressConfig {
            operations: 900,
            distinct_events: 50,
            content_size: 16,
            ..Default::default()
        };

        let result = stress_mixed_operations(&store, &config);
        assert_eq!(result.failed_ops, 0);
    }

    #[test]
    fn test_concurrent_scans() {
        let store = Arc::new(create_test_store());
        let config = StressConfig {
            operations: 400,
            threads: 3,
            distinct_events: 200,
            content_size: 16,
        };

        let result = stress_concurrent_scans(Arc::clone(&store), &config);
        assert_eq!(result.failed_ops, 0);
        assert_eq!(store.count(Space::Raw).unwrap(), 200);
    }
}
