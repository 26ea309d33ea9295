//! Reader/writer pair construction.

use crate::cache::AdaptiveCache;
use crate::config::StorageConfig;
use crate::dir;
use crate::error::StorageResult;
use crate::reader::{DataReader, SegmentReader};
use crate::writer::{DataWriter, SegmentWriter};
use std::path::Path;
use tracing::info;

/// Builds the reader/writer pair an environment performs its durable I/O
/// through.
///
/// The provider is a pure constructor: everything it needs arrives through
/// `config`, and it keeps no reference to the pairs it hands out. The
/// environment opens exactly one pair per location and owns it until
/// shutdown.
pub trait StorageProvider {
    /// Reader half of the pair.
    type Reader: DataReader;
    /// Writer half of the pair.
    type Writer: DataWriter;

    /// Opens the pair for `location`.
    ///
    /// # Errors
    ///
    /// Fails without producing a partial pair if the location is unusable
    /// or another writer owns it.
    fn open(
        &self,
        location: &Path,
        config: &StorageConfig,
    ) -> StorageResult<(Self::Reader, Self::Writer)>;
}

/// Provider over plain files in a local directory.
///
/// # Example
///
/// ```no_run
/// use segdir_storage::{DataReader, DataWriter, FileStorageProvider, StorageConfig, StorageProvider};
/// use std::path::Path;
///
/// let config = StorageConfig::new().lock_id(7);
/// let (reader, mut writer) = FileStorageProvider
///     .open(Path::new("/var/lib/env"), &config)
///     .unwrap();
///
/// let (segment, offset) = writer.append(b"commit").unwrap();
/// assert_eq!(reader.read_at(segment, offset, 6).unwrap(), b"commit");
/// writer.close().unwrap();
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct FileStorageProvider;

impl FileStorageProvider {
    /// Opens only the reader half; no lock is taken.
    ///
    /// # Errors
    ///
    /// Returns an error if the location is unusable.
    pub fn open_reader(
        &self,
        location: &Path,
        config: &StorageConfig,
    ) -> StorageResult<SegmentReader> {
        let location = dir::ensure(location)?;
        Ok(SegmentReader::with_limits(
            location,
            AdaptiveCache::new(config.cache_policy()),
            config.max_open_files,
        ))
    }
}

impl StorageProvider for FileStorageProvider {
    type Reader = SegmentReader;
    type Writer = SegmentWriter;

    fn open(
        &self,
        location: &Path,
        config: &StorageConfig,
    ) -> StorageResult<(SegmentReader, SegmentWriter)> {
        let reader = self.open_reader(location, config)?;
        let writer = SegmentWriter::open(&reader, config.lock_id)?
            .with_max_segment_size(config.max_segment_size);

        info!(
            path = %reader.location().path().display(),
            mapping = config.use_memory_mapping,
            lock_id = ?config.lock_id,
            "opened storage"
        );
        Ok((reader, writer))
    }
}
