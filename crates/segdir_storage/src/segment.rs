//! Segment file naming and the state shared by a reader and its writer.

use crate::dir::StorageLocation;
use crate::error::{StorageError, StorageResult};
use lru::LruCache;
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::fs::{self, File};
use std::io;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;

/// Extension of published segment files.
pub const SEGMENT_SUFFIX: &str = ".xd";

/// Extension of segment files that are still being created.
pub const TEMP_SUFFIX: &str = ".xd.tmp";

const INDEX_WIDTH: usize = 16;

/// Returns the file name of segment `index`, e.g. `000000000000002a.xd`.
#[must_use]
pub fn segment_file_name(index: u64) -> String {
    format!("{index:0width$x}{SEGMENT_SUFFIX}", width = INDEX_WIDTH)
}

/// Parses a published segment file name back into its index.
///
/// Temporary files and anything not matching the fixed-width pattern yield
/// `None`.
#[must_use]
pub fn parse_segment_file_name(name: &str) -> Option<u64> {
    let digits = name.strip_suffix(SEGMENT_SUFFIX)?;
    if digits.len() != INDEX_WIDTH || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u64::from_str_radix(digits, 16).ok()
}

/// Default number of segment read handles a reader keeps open.
pub const DEFAULT_MAX_OPEN_FILES: usize = 16;

/// An open read handle and the identity of the file it was opened on.
#[derive(Debug)]
pub(crate) struct SegmentHandle {
    pub(crate) file: File,
    identity: FileIdentity,
}

/// Device and inode on unix. Elsewhere only existence is checked.
type FileIdentity = (u64, u64);

#[cfg(unix)]
fn identity_of(meta: &fs::Metadata) -> FileIdentity {
    use std::os::unix::fs::MetadataExt;
    (meta.dev(), meta.ino())
}

#[cfg(not(unix))]
fn identity_of(_meta: &fs::Metadata) -> FileIdentity {
    (0, 0)
}

/// Segment state shared between a reader and the writer paired with it.
///
/// Holds a bounded, least-recently-used table of read handles keyed by
/// segment index and a structural gate: reads hold it shared while they
/// touch a segment, truncation and removal hold it exclusively.
pub(crate) struct SegmentFiles {
    location: StorageLocation,
    gate: RwLock<()>,
    handles: Mutex<LruCache<u64, Arc<SegmentHandle>>>,
}

impl SegmentFiles {
    pub(crate) fn new(location: StorageLocation, max_open_files: usize) -> Self {
        let capacity = NonZeroUsize::new(max_open_files).unwrap_or(NonZeroUsize::MIN);
        Self {
            location,
            gate: RwLock::new(()),
            handles: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub(crate) fn location(&self) -> &StorageLocation {
        &self.location
    }

    pub(crate) fn path_of(&self, index: u64) -> PathBuf {
        self.location.join(segment_file_name(index))
    }

    pub(crate) fn temp_path_of(&self, index: u64) -> PathBuf {
        self.location
            .join(format!("{index:0width$x}{TEMP_SUFFIX}", width = INDEX_WIDTH))
    }

    pub(crate) fn shared(&self) -> RwLockReadGuard<'_, ()> {
        self.gate.read()
    }

    pub(crate) fn exclusive(&self) -> RwLockWriteGuard<'_, ()> {
        self.gate.write()
    }

    /// Enumerates published segments in ascending order.
    pub(crate) fn list(&self) -> StorageResult<Vec<u64>> {
        let mut indices = Vec::new();
        for entry in fs::read_dir(self.location.path())? {
            let entry = entry?;
            let Some(index) = entry.file_name().to_str().and_then(parse_segment_file_name)
            else {
                continue;
            };
            if entry.file_type()?.is_file() {
                indices.push(index);
            }
        }
        indices.sort_unstable();
        Ok(indices)
    }

    /// Returns a read handle for `index`, or `None` if it is not published.
    ///
    /// A cached handle is only reused while the published path still names
    /// the file it was opened on, so segments removed by any writer, in this
    /// process or another, stop being readable.
    pub(crate) fn handle(&self, index: u64) -> StorageResult<Option<Arc<SegmentHandle>>> {
        let path = self.path_of(index);
        let published = match fs::metadata(&path) {
            Ok(meta) => identity_of(&meta),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.evict(index);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let mut handles = self.handles.lock();
        if let Some(handle) = handles.get(&index) {
            if handle.identity == published {
                return Ok(Some(Arc::clone(handle)));
            }
            handles.pop(&index);
        }

        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let identity = identity_of(&file.metadata()?);
        let handle = Arc::new(SegmentHandle { file, identity });
        handles.put(index, Arc::clone(&handle));
        Ok(Some(handle))
    }

    /// Drops the cached read handle for `index`.
    pub(crate) fn evict(&self, index: u64) {
        self.handles.lock().pop(&index);
    }

    /// Returns the number of cached read handles.
    #[cfg(test)]
    pub(crate) fn open_handles(&self) -> usize {
        self.handles.lock().len()
    }

    /// Removes leftovers of a rollover that never published.
    pub(crate) fn remove_stale_temps(&self) -> StorageResult<usize> {
        let mut removed = 0;
        for entry in fs::read_dir(self.location.path())? {
            let entry = entry?;
            let name = entry.file_name();
            if name.to_str().is_some_and(|n| n.ends_with(TEMP_SUFFIX)) {
                fs::remove_file(entry.path())?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub(crate) fn out_of_range(segment: u64, offset: u64, len: usize, size: u64) -> StorageError {
        StorageError::OutOfRange {
            segment,
            offset,
            len,
            size,
        }
    }
}

impl std::fmt::Debug for SegmentFiles {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentFiles")
            .field("location", &self.location)
            .field("open_handles", &self.handles.lock().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dir;
    use tempfile::tempdir;

    #[test]
    fn names_are_fixed_width_hex() {
        assert_eq!(segment_file_name(0), "0000000000000000.xd");
        assert_eq!(segment_file_name(42), "000000000000002a.xd");
        assert_eq!(segment_file_name(u64::MAX), "ffffffffffffffff.xd");
    }

    #[test]
    fn parse_inverts_name() {
        for index in [0, 1, 255, 1 << 40, u64::MAX] {
            assert_eq!(parse_segment_file_name(&segment_file_name(index)), Some(index));
        }
    }

    #[test]
    fn parse_rejects_foreign_names() {
        assert_eq!(parse_segment_file_name("xd.lck"), None);
        assert_eq!(parse_segment_file_name("0000000000000001.xd.tmp"), None);
        assert_eq!(parse_segment_file_name("1.xd"), None);
        assert_eq!(parse_segment_file_name("000000000000000g.xd"), None);
        assert_eq!(parse_segment_file_name("0000000000000001.log"), None);
    }

    #[test]
    fn list_ignores_temps_and_lock() {
        let temp = tempdir().unwrap();
        let files = SegmentFiles::new(dir::ensure(temp.path()).unwrap(), DEFAULT_MAX_OPEN_FILES);

        fs::write(files.path_of(3), b"").unwrap();
        fs::write(files.path_of(1), b"").unwrap();
        fs::write(files.temp_path_of(4), b"").unwrap();
        fs::write(temp.path().join("xd.lck"), b"").unwrap();

        assert_eq!(files.list().unwrap(), vec![1, 3]);
    }

    #[test]
    fn stale_temps_are_removed() {
        let temp = tempdir().unwrap();
        let files = SegmentFiles::new(dir::ensure(temp.path()).unwrap(), DEFAULT_MAX_OPEN_FILES);

        fs::write(files.path_of(0), b"keep").unwrap();
        fs::write(files.temp_path_of(1), b"").unwrap();

        assert_eq!(files.remove_stale_temps().unwrap(), 1);
        assert!(files.path_of(0).exists());
        assert!(!files.temp_path_of(1).exists());
    }

    #[test]
    fn missing_segment_has_no_handle() {
        let temp = tempdir().unwrap();
        let files = SegmentFiles::new(dir::ensure(temp.path()).unwrap(), DEFAULT_MAX_OPEN_FILES);
        assert!(files.handle(0).unwrap().is_none());
    }

    #[test]
    fn handle_table_is_bounded() {
        let temp = tempdir().unwrap();
        let files = SegmentFiles::new(dir::ensure(temp.path()).unwrap(), 4);

        for index in 0..20 {
            fs::write(files.path_of(index), b"x").unwrap();
            assert!(files.handle(index).unwrap().is_some());
        }
        assert_eq!(files.open_handles(), 4);
    }

    #[test]
    fn removed_segment_drops_cached_handle() {
        let temp = tempdir().unwrap();
        let files = SegmentFiles::new(dir::ensure(temp.path()).unwrap(), DEFAULT_MAX_OPEN_FILES);

        fs::write(files.path_of(0), b"x").unwrap();
        assert!(files.handle(0).unwrap().is_some());

        fs::remove_file(files.path_of(0)).unwrap();
        assert!(files.handle(0).unwrap().is_none());
        assert_eq!(files.open_handles(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn replaced_segment_is_reopened() {
        let temp = tempdir().unwrap();
        let files = SegmentFiles::new(dir::ensure(temp.path()).unwrap(), DEFAULT_MAX_OPEN_FILES);

        fs::write(files.path_of(0), b"old").unwrap();
        let first = files.handle(0).unwrap().unwrap();

        fs::write(files.temp_path_of(0), b"new!").unwrap();
        fs::rename(files.temp_path_of(0), files.path_of(0)).unwrap();

        let second = files.handle(0).unwrap().unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(second.file.metadata().unwrap().len(), 4);
    }
}
