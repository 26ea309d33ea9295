//! Storage directory management.
//!
//! A storage location is a single directory holding the log segments and
//! the writer lock marker:
//!
//! ```text
//! <location>/
//! ├─ 0000000000000000.xd     # segment 0
//! ├─ 0000000000000001.xd     # segment 1
//! └─ xd.lck                  # advisory lock for single-writer
//! ```

use crate::error::{StorageError, StorageResult};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A validated, absolute storage directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageLocation {
    path: PathBuf,
}

impl StorageLocation {
    /// Returns the directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Joins a file name onto the directory.
    #[must_use]
    pub fn join(&self, name: impl AsRef<Path>) -> PathBuf {
        self.path.join(name)
    }

    /// Syncs the directory so entry creations, renames and deletions are durable.
    ///
    /// Windows NTFS journals metadata updates, so this is a no-op there.
    #[cfg(unix)]
    pub(crate) fn sync(&self) -> StorageResult<()> {
        fs::File::open(&self.path)?.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    pub(crate) fn sync(&self) -> StorageResult<()> {
        Ok(())
    }
}

impl AsRef<Path> for StorageLocation {
    fn as_ref(&self) -> &Path {
        &self.path
    }
}

/// Validates `path` as a storage directory, creating it if missing.
///
/// # Errors
///
/// - [`StorageError::InvalidLocation`] if `path` is an existing regular file
///   (nothing is touched)
/// - [`StorageError::DirectoryCreationFailed`] if the directory or one of its
///   ancestors cannot be created
pub fn ensure(path: impl AsRef<Path>) -> StorageResult<StorageLocation> {
    let path = std::path::absolute(path.as_ref())?;

    if path.is_file() {
        return Err(StorageError::invalid_location(&path));
    }

    if !path.exists() {
        fs::create_dir_all(&path).map_err(|e| StorageError::directory_creation(&path, e))?;
        debug!(path = %path.display(), "created storage directory");
    }

    // Something that is neither a file nor a directory (a dangling symlink,
    // a socket) cannot hold segments.
    if !path.is_dir() {
        return Err(StorageError::invalid_location(&path));
    }

    Ok(StorageLocation { path })
}
