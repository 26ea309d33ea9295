//! Storage configuration.

use crate::cache::CachePolicy;
use crate::segment::DEFAULT_MAX_OPEN_FILES;
use std::time::Duration;

/// Default free-memory threshold below which reads stop using mappings.
pub const DEFAULT_FREE_MEMORY_THRESHOLD: u64 = 1_000_000_000;

/// Options consumed when opening a reader/writer pair.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Whether reads may be served through memory mappings.
    pub use_memory_mapping: bool,

    /// Minimum free physical memory, in bytes, for mapped reads.
    pub free_memory_threshold: u64,

    /// Logical owner recorded in the lock marker.
    pub lock_id: Option<i64>,

    /// Segment size that triggers an automatic rollover (`None` = explicit only).
    pub max_segment_size: Option<u64>,

    /// How long a free-memory sample stays valid.
    pub memory_sample_interval: Duration,

    /// Segment read handles a reader keeps open at once (at least one).
    pub max_open_files: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            use_memory_mapping: true,
            free_memory_threshold: DEFAULT_FREE_MEMORY_THRESHOLD,
            lock_id: None,
            max_segment_size: None,
            memory_sample_interval: Duration::from_secs(1),
            max_open_files: DEFAULT_MAX_OPEN_FILES,
        }
    }
}

impl StorageConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether reads may use memory mappings.
    #[must_use]
    pub const fn use_memory_mapping(mut self, value: bool) -> Self {
        self.use_memory_mapping = value;
        self
    }

    /// Sets the free-memory threshold for mapped reads.
    #[must_use]
    pub const fn free_memory_threshold(mut self, bytes: u64) -> Self {
        self.free_memory_threshold = bytes;
        self
    }

    /// Sets the lock identifier.
    #[must_use]
    pub const fn lock_id(mut self, id: i64) -> Self {
        self.lock_id = Some(id);
        self
    }

    /// Sets the automatic rollover size.
    #[must_use]
    pub const fn max_segment_size(mut self, size: u64) -> Self {
        self.max_segment_size = Some(size);
        self
    }

    /// Sets how long a free-memory sample is reused.
    #[must_use]
    pub const fn memory_sample_interval(mut self, interval: Duration) -> Self {
        self.memory_sample_interval = interval;
        self
    }

    /// Sets how many segment read handles a reader keeps open.
    #[must_use]
    pub const fn max_open_files(mut self, count: usize) -> Self {
        self.max_open_files = count;
        self
    }

    /// Returns the read-cache policy derived from this configuration.
    #[must_use]
    pub const fn cache_policy(&self) -> CachePolicy {
        CachePolicy {
            use_memory_mapping: self.use_memory_mapping,
            free_memory_threshold: self.free_memory_threshold,
            sample_interval: self.memory_sample_interval,
        }
    }
}
