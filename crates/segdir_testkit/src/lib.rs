//! # segdir testkit
//!
//! Test utilities for segdir storage.
//!
//! This crate provides:
//! - Temporary storage locations and pair helpers
//! - Property-based test generators using proptest
//! - Concurrent reader/writer stress runs
//! - A test logging subscriber
//!
//! ## Usage
//!
//! ```rust,ignore
//! use segdir_testkit::prelude::*;
//!
//! #[test]
//! fn appends_are_readable() {
//!     with_temp_storage(|storage| {
//!         let (reader, mut writer) = storage.open_pair(&StorageConfig::default());
//!         // ... test operations
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod logging;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::logging::*;
    pub use crate::stress::*;
    pub use segdir_storage::{DataReader, DataWriter, StorageConfig, StorageProvider};
}

pub use fixtures::*;
pub use generators::*;
pub use logging::*;
pub use stress::*;
