//! # segdir storage
//!
//! File-backed segment storage for a log-structured embedded environment.
//!
//! A storage location is a directory of append-only segment files. This
//! crate turns such a directory into a bound reader/writer pair:
//!
//! - [`dir::ensure`] validates the directory and creates it if missing
//! - [`ExclusivityLock`] guarantees at most one writer per directory
//! - [`AdaptiveCache`] picks mapped or buffered reads by free memory
//! - [`SegmentReader`] serves random-access reads
//! - [`SegmentWriter`] appends, rolls over and syncs segments
//! - [`FileStorageProvider`] wires all of the above from a [`StorageConfig`]
//!
//! Segments are opaque byte stores; record framing and the commit protocol
//! belong to the caller.
//!
//! ## Example
//!
//! ```no_run
//! use segdir_storage::{DataReader, DataWriter, FileStorageProvider, StorageConfig, StorageProvider};
//! use std::path::Path;
//!
//! let config = StorageConfig::new().use_memory_mapping(false);
//! let (reader, mut writer) = FileStorageProvider.open(Path::new("env"), &config).unwrap();
//!
//! let (segment, offset) = writer.append(b"hello world").unwrap();
//! writer.sync().unwrap();
//! assert_eq!(reader.read_at(segment, offset, 11).unwrap(), b"hello world");
//! writer.close().unwrap();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod config;
pub mod dir;
mod error;
pub mod lock;
mod provider;
mod reader;
mod segment;
mod writer;

pub use cache::{AccessMode, AdaptiveCache, CachePolicy, CacheStats, MemoryProbe, SystemMemoryProbe};
pub use config::{StorageConfig, DEFAULT_FREE_MEMORY_THRESHOLD};
pub use dir::StorageLocation;
pub use error::{ErrorKind, StorageError, StorageResult};
pub use lock::{ExclusivityLock, LockHandle, LOCK_FILE};
pub use provider::{FileStorageProvider, StorageProvider};
pub use reader::{DataReader, SegmentReader};
pub use segment::{
    parse_segment_file_name, segment_file_name, DEFAULT_MAX_OPEN_FILES, SEGMENT_SUFFIX, TEMP_SUFFIX,
};
pub use writer::{DataWriter, SegmentWriter};
