//! Stress runs for segment storage.
//!
//! These runs exercise appends, rollovers and concurrent readers together.

use crate::fixtures::{record, TestStorage};
use parking_lot::RwLock;
use segdir_storage::{DataReader, DataWriter, SegmentWriter, StorageConfig};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

/// Result of a stress test run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StressTestResult {
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize) -> Self {
        Self {
            successful_ops: successful,
            failed_ops: failed,
        }
    }
}

/// Configuration for stress runs.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of records to append.
    pub records: usize,
    /// Number of concurrent reader threads.
    pub readers: usize,
    /// Size of each record in bytes.
    pub record_size: usize,
    /// Roll over after this many records (0 = never).
    pub rollover_every: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            records: 2_000,
            readers: 4,
            record_size: 128,
            rollover_every: 100,
        }
    }
}

/// Appends records sequentially, rolling over as configured.
pub fn stress_sequential_appends(
    writer: &mut SegmentWriter,
    config: &StressConfig,
) -> StressTestResult {
    let mut successful = 0;
    let mut failed = 0;
    for i in 0..config.records {
        let due = config.rollover_every > 0 && i > 0 && i % config.rollover_every == 0;
        if due && writer.rollover().is_err() {
            failed += 1;
            continue;
        }
        match writer.append(&record(i as u32, config.record_size)) {
            Ok(_) => successful += 1,
            Err(_) => failed += 1,
        }
    }

    StressTestResult::new(successful, failed)
}

/// Appends and rolls over while reader threads poll the same location.
///
/// Readers list segments and re-read every record published so far. A
/// listed segment that cannot serve an already published record, or a read
/// that returns different bytes, counts as a failed operation.
pub fn stress_readers_during_appends(
    storage: &TestStorage,
    storage_config: &StorageConfig,
    config: &StressConfig,
) -> StressTestResult {
    let (reader, mut writer) = storage.open_pair(storage_config);

    // (segment, offset, seed) of every record whose append has returned.
    let published: Arc<RwLock<Vec<(u64, u64, u32)>>> = Arc::new(RwLock::new(Vec::new()));
    let done = Arc::new(AtomicBool::new(false));
    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let record_size = config.record_size;

    let handles: Vec<_> = (0..config.readers)
        .map(|_| {
            let reader = reader.clone();
            let published = Arc::clone(&published);
            let done = Arc::clone(&done);
            let successful = Arc::clone(&successful);
            let failed = Arc::clone(&failed);

            thread::spawn(move || {
                while !done.load(Ordering::Acquire) {
                    let Ok(listed) = reader.list_segments() else {
                        failed.fetch_add(1, Ordering::Relaxed);
                        continue;
                    };
                    let snapshot = published.read().clone();
                    for (segment, offset, seed) in snapshot {
                        if listed.binary_search(&segment).is_err() {
                            continue;
                        }
                        match reader.read_at(segment, offset, record_size) {
                            Ok(bytes) if bytes == record(seed, record_size) => {
                                successful.fetch_add(1, Ordering::Relaxed);
                            }
                            _ => {
                                failed.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                    }
                }
            })
        })
        .collect();

    for i in 0..config.records {
        if config.rollover_every > 0 && i > 0 && i % config.rollover_every == 0 {
            writer.rollover().expect("rollover failed");
        }
        let seed = i as u32;
        let (segment, offset) = writer
            .append(&record(seed, record_size))
            .expect("append failed");
        published.write().push((segment, offset, seed));
    }

    done.store(true, Ordering::Release);
    for handle in handles {
        handle.join().expect("Thread panicked");
    }
    writer.close().expect("close failed");

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{buffered_config, mapped_config};

    fn small() -> StressConfig {
        StressConfig {
            records: 300,
            readers: 2,
            record_size: 64,
            rollover_every: 50,
        }
    }

    #[test]
    fn test_sequential_appends() {
        let storage = TestStorage::new();
        let (reader, mut writer) = storage.open_pair(&buffered_config());

        let result = stress_sequential_appends(&mut writer, &small());
        assert_eq!(result.successful_ops, 300);
        assert_eq!(result.failed_ops, 0);
        assert_eq!(reader.list_segments().unwrap().len(), 6);
    }

    #[test]
    fn test_buffered_readers_during_appends() {
        let storage = TestStorage::new();
        let result = stress_readers_during_appends(&storage, &buffered_config(), &small());
        assert_eq!(result.failed_ops, 0);
    }

    #[test]
    fn test_mapped_readers_during_appends() {
        let storage = TestStorage::new();
        let result = stress_readers_during_appends(&storage, &mapped_config(), &small());
        assert_eq!(result.failed_ops, 0);
    }
}
