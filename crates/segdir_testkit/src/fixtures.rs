//! Test fixtures and storage helpers.
//!
//! Provides temporary storage locations and convenience constructors for
//! reader/writer pairs.

use segdir_storage::{
    FileStorageProvider, SegmentReader, SegmentWriter, StorageConfig, StorageProvider,
};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A storage location inside a temporary directory, removed on drop.
pub struct TestStorage {
    path: PathBuf,
    /// Kept alive to prevent cleanup.
    _temp_dir: TempDir,
}

impl TestStorage {
    /// Creates a fresh location. The directory itself does not exist yet.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("env");
        Self {
            path,
            _temp_dir: temp_dir,
        }
    }

    /// Returns the location path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Opens a reader/writer pair over this location.
    pub fn open_pair(&self, config: &StorageConfig) -> (SegmentReader, SegmentWriter) {
        FileStorageProvider
            .open(&self.path, config)
            .expect("Failed to open storage")
    }

    /// Opens a reader without taking the writer lock.
    pub fn open_reader(&self, config: &StorageConfig) -> SegmentReader {
        FileStorageProvider
            .open_reader(&self.path, config)
            .expect("Failed to open reader")
    }
}

impl Default for TestStorage {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs a test with a temporary storage location.
pub fn with_temp_storage<F, R>(f: F) -> R
where
    F: FnOnce(&TestStorage) -> R,
{
    let storage = TestStorage::new();
    f(&storage)
}

/// Returns a deterministic record of `len` bytes tagged by `seed`.
///
/// Records with different seeds differ in every position, which makes
/// misplaced reads easy to spot.
pub fn record(seed: u32, len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| (seed.wrapping_mul(31).wrapping_add(i as u32) % 251) as u8)
        .collect()
}

/// Config for tests that must not depend on host memory.
pub fn buffered_config() -> StorageConfig {
    StorageConfig::new().use_memory_mapping(false)
}

/// Config whose reads are always mapped.
pub fn mapped_config() -> StorageConfig {
    StorageConfig::new()
        .use_memory_mapping(true)
        .free_memory_threshold(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use segdir_storage::{DataReader, DataWriter};

    #[test]
    fn fresh_location_is_created_on_open() {
        with_temp_storage(|storage| {
            assert!(!storage.path().exists());
            let (_reader, mut writer) = storage.open_pair(&buffered_config());
            assert!(storage.path().is_dir());
            writer.close().unwrap();
        });
    }

    #[test]
    fn records_are_deterministic() {
        assert_eq!(record(3, 16), record(3, 16));
        assert_ne!(record(3, 16), record(4, 16));
        assert_eq!(record(0, 0).len(), 0);
    }

    #[test]
    fn mapped_config_maps() {
        let storage = TestStorage::new();
        let (reader, mut writer) = storage.open_pair(&mapped_config());
        writer.append(&record(1, 64)).unwrap();
        reader.read_at(0, 0, 64).unwrap();
        assert_eq!(reader.cache_stats().mapped_reads(), 1);
    }
}
