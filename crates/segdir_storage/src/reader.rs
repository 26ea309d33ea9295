//! Read-only view over the segments of a storage location.

use crate::cache::{AdaptiveCache, CachePolicy, CacheStats};
use crate::dir::StorageLocation;
use crate::error::StorageResult;
use crate::segment::{SegmentFiles, DEFAULT_MAX_OPEN_FILES};
use std::sync::Arc;

/// Random-access reads over segment files.
///
/// Implemented by [`SegmentReader`]; other backends can provide their own.
pub trait DataReader: Send + Sync {
    /// Reads `len` bytes at `offset` of segment `segment`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::OutOfRange`] if the segment does not
    /// exist or the range extends past its end.
    fn read_at(&self, segment: u64, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Lists published segments in ascending order.
    ///
    /// # Errors
    ///
    /// Returns an error if the location cannot be enumerated.
    fn list_segments(&self) -> StorageResult<Vec<u64>>;
}

/// File-backed segment reader.
///
/// Cloning is cheap and clones share open handles and cache counters. The
/// directory is re-enumerated on every [`list_segments`](Self::list_segments)
/// and segment lengths are re-read on every read, so bytes appended and
/// segments published by a writer are visible without reopening.
///
/// # Example
///
/// ```no_run
/// use segdir_storage::{dir, CachePolicy, DataReader, SegmentReader};
///
/// let location = dir::ensure("/var/lib/env").unwrap();
/// let reader = SegmentReader::open(location, CachePolicy::buffered());
/// for segment in reader.list_segments().unwrap() {
///     println!("segment {segment}: {} bytes", reader.segment_len(segment).unwrap().unwrap());
/// }
/// ```
#[derive(Debug, Clone)]
pub struct SegmentReader {
    files: Arc<SegmentFiles>,
    cache: Arc<AdaptiveCache>,
}

impl SegmentReader {
    /// Opens a reader over `location`.
    #[must_use]
    pub fn open(location: StorageLocation, policy: CachePolicy) -> Self {
        Self::with_cache(location, AdaptiveCache::new(policy))
    }

    /// Opens a reader with a preconfigured cache.
    #[must_use]
    pub fn with_cache(location: StorageLocation, cache: AdaptiveCache) -> Self {
        Self::with_limits(location, cache, DEFAULT_MAX_OPEN_FILES)
    }

    /// Opens a reader that keeps at most `max_open_files` segment handles
    /// open; the least recently read segment is closed first.
    #[must_use]
    pub fn with_limits(
        location: StorageLocation,
        cache: AdaptiveCache,
        max_open_files: usize,
    ) -> Self {
        Self {
            files: Arc::new(SegmentFiles::new(location, max_open_files)),
            cache: Arc::new(cache),
        }
    }

    /// Returns the storage location.
    #[must_use]
    pub fn location(&self) -> &StorageLocation {
        self.files.location()
    }

    /// Returns the read-path counters.
    #[must_use]
    pub fn cache_stats(&self) -> &CacheStats {
        self.cache.stats()
    }

    /// Returns the current length of `segment`, or `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the segment cannot be inspected.
    pub fn segment_len(&self, segment: u64) -> StorageResult<Option<u64>> {
        let _gate = self.files.shared();
        let Some(handle) = self.files.handle(segment)? else {
            return Ok(None);
        };
        let len = handle.file.metadata()?.len();
        Ok(Some(len))
    }

    pub(crate) fn files(&self) -> &Arc<SegmentFiles> {
        &self.files
    }

    /// Returns true if `other` is a clone of this reader.
    #[cfg(test)]
    pub(crate) fn shares_files_with(&self, other: &SegmentReader) -> bool {
        Arc::ptr_eq(&self.files, &other.files)
    }
}

impl DataReader for SegmentReader {
    fn read_at(&self, segment: u64, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let _gate = self.files.shared();
        let Some(handle) = self.files.handle(segment)? else {
            return Err(SegmentFiles::out_of_range(segment, offset, len, 0));
        };

        let size = handle.file.metadata()?.len();
        let end = offset.saturating_add(len as u64);
        if offset > size || end > size {
            return Err(SegmentFiles::out_of_range(segment, offset, len, size));
        }

        if len == 0 {
            return Ok(Vec::new());
        }

        Ok(self.cache.read(&handle.file, offset, len)?)
    }

    fn list_segments(&self) -> StorageResult<Vec<u64>> {
        self.files.list()
    }
}
