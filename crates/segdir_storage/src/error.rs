//! Error types for storage operations.

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The location names an existing regular file.
    #[error("a directory is required: {}", path.display())]
    InvalidLocation {
        /// The offending path.
        path: PathBuf,
    },

    /// The location does not exist and could not be created.
    #[error("failed to create directory {}: {source}", path.display())]
    DirectoryCreationFailed {
        /// The directory that could not be created.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Another writer holds the directory lock.
    #[error("location {} is locked by another writer{}", path.display(), holder_suffix(holder))]
    LockHeld {
        /// The locked directory.
        path: PathBuf,
        /// Metadata recorded by the current holder, if readable.
        holder: Option<String>,
    },

    /// The lock could not be established because of a file-system failure.
    #[error("failed to lock {}: {source}", path.display())]
    LockIo {
        /// The lock marker file.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Attempted to read a missing segment or beyond the end of a segment.
    #[error("read out of range: segment {segment}, offset {offset}, len {len}, size {size}")]
    OutOfRange {
        /// The requested segment index.
        segment: u64,
        /// The requested read offset.
        offset: u64,
        /// The requested read length.
        len: usize,
        /// The current segment size (0 if the segment does not exist).
        size: u64,
    },

    /// Bytes could not be made durable.
    #[error("flush failed: {0}")]
    Flush(#[source] io::Error),

    /// The writer has been closed.
    #[error("writer is closed")]
    WriterClosed,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

fn holder_suffix(holder: &Option<String>) -> String {
    match holder {
        Some(info) => format!(" ({})", info.trim()),
        None => String::new(),
    }
}

/// Coarse classification used by callers to pick a recovery strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The location itself is unusable.
    Location,
    /// Another writer owns the location.
    Contention,
    /// A file-system failure, possibly transient.
    Io,
    /// The API was used incorrectly (closed writer, bad range).
    Usage,
}

impl StorageError {
    /// Creates an invalid-location error.
    pub fn invalid_location(path: impl AsRef<Path>) -> Self {
        Self::InvalidLocation {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Creates a directory-creation error.
    pub fn directory_creation(path: impl AsRef<Path>, source: io::Error) -> Self {
        Self::DirectoryCreationFailed {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Creates a lock-held error.
    pub fn lock_held(path: impl AsRef<Path>, holder: Option<String>) -> Self {
        Self::LockHeld {
            path: path.as_ref().to_path_buf(),
            holder,
        }
    }

    /// Creates a lock I/O error.
    pub fn lock_io(path: impl AsRef<Path>, source: io::Error) -> Self {
        Self::LockIo {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Returns the recovery class of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidLocation { .. } | Self::DirectoryCreationFailed { .. } => {
                ErrorKind::Location
            }
            Self::LockHeld { .. } => ErrorKind::Contention,
            Self::LockIo { .. } | Self::Flush(_) | Self::Io(_) => ErrorKind::Io,
            Self::OutOfRange { .. } | Self::WriterClosed => ErrorKind::Usage,
        }
    }
}
