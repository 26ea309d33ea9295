//! Adaptive read path.
//!
//! Reads are served either through a short-lived read-only memory mapping
//! or through a positional read. Mapping is only used while the host has
//! at least `free_memory_threshold` bytes of free physical memory, so mapped
//! page residency never adds to memory pressure. The choice affects latency
//! only; both paths return the same bytes and a failed mapping silently
//! falls back to the buffered path.

use memmap2::MmapOptions;
use parking_lot::Mutex;
use std::fs::File;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use sysinfo::System;
use tracing::debug;

/// How a single read is served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Through a transient read-only memory mapping.
    Mapped,
    /// Through a positional read into a heap buffer.
    Buffered,
}

/// Read-cache policy, fixed when the reader is constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    /// Whether mapped reads are allowed at all.
    pub use_memory_mapping: bool,
    /// Minimum free physical memory, in bytes, for mapped reads.
    pub free_memory_threshold: u64,
    /// How long a free-memory sample is reused.
    pub sample_interval: Duration,
}

impl CachePolicy {
    /// A policy that never maps.
    #[must_use]
    pub const fn buffered() -> Self {
        Self {
            use_memory_mapping: false,
            free_memory_threshold: 0,
            sample_interval: Duration::ZERO,
        }
    }

    /// A policy that maps while free memory stays at or above `threshold`.
    #[must_use]
    pub const fn mapped(threshold: u64) -> Self {
        Self {
            use_memory_mapping: true,
            free_memory_threshold: threshold,
            sample_interval: Duration::from_secs(1),
        }
    }
}

/// Source of free physical memory samples.
pub trait MemoryProbe: Send + Sync {
    /// Returns the currently free physical memory in bytes.
    fn free_memory(&self) -> u64;
}

/// Samples the host through `sysinfo`.
pub struct SystemMemoryProbe {
    system: Mutex<System>,
}

impl SystemMemoryProbe {
    /// Creates a probe for the current host.
    #[must_use]
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SystemMemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for SystemMemoryProbe {
    fn free_memory(&self) -> u64 {
        let mut system = self.system.lock();
        system.refresh_memory();
        system.available_memory()
    }
}

/// Counters describing how reads were served.
#[derive(Debug, Default)]
pub struct CacheStats {
    mapped_reads: AtomicU64,
    buffered_reads: AtomicU64,
    memory_samples: AtomicU64,
}

impl CacheStats {
    /// Reads served through a mapping.
    pub fn mapped_reads(&self) -> u64 {
        self.mapped_reads.load(Ordering::Relaxed)
    }

    /// Reads served through the buffered path.
    pub fn buffered_reads(&self) -> u64 {
        self.buffered_reads.load(Ordering::Relaxed)
    }

    /// Free-memory samples taken from the probe.
    pub fn memory_samples(&self) -> u64 {
        self.memory_samples.load(Ordering::Relaxed)
    }
}

/// Chooses the access mode for each read and performs it.
pub struct AdaptiveCache {
    policy: CachePolicy,
    probe: Box<dyn MemoryProbe>,
    sample: Mutex<Option<(Instant, u64)>>,
    mapping: AtomicBool,
    stats: CacheStats,
}

impl AdaptiveCache {
    /// Creates a cache sampling the host's memory.
    #[must_use]
    pub fn new(policy: CachePolicy) -> Self {
        Self::with_probe(policy, Box::new(SystemMemoryProbe::new()))
    }

    /// Creates a cache with a custom memory probe.
    #[must_use]
    pub fn with_probe(policy: CachePolicy, probe: Box<dyn MemoryProbe>) -> Self {
        Self {
            policy,
            probe,
            sample: Mutex::new(None),
            mapping: AtomicBool::new(policy.use_memory_mapping),
            stats: CacheStats::default(),
        }
    }

    /// Returns the policy this cache was built with.
    #[must_use]
    pub fn policy(&self) -> CachePolicy {
        self.policy
    }

    /// Returns the read counters.
    #[must_use]
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Decides how a read of `request_size_hint` bytes should be served.
    pub fn decide(&self, request_size_hint: usize) -> AccessMode {
        if !self.policy.use_memory_mapping || request_size_hint == 0 {
            return AccessMode::Buffered;
        }

        let free = self.free_memory();
        let mapped = free >= self.policy.free_memory_threshold;
        if self.mapping.swap(mapped, Ordering::Relaxed) != mapped {
            debug!(
                free,
                threshold = self.policy.free_memory_threshold,
                mapped,
                "read cache switched access mode"
            );
        }

        if mapped {
            AccessMode::Mapped
        } else {
            AccessMode::Buffered
        }
    }

    /// Reads exactly `len` bytes at `offset` of `file`.
    ///
    /// The caller has already checked that the range lies within the file.
    pub(crate) fn read(&self, file: &File, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        if self.decide(len) == AccessMode::Mapped {
            match read_mapped(file, offset, len) {
                Ok(data) => {
                    self.stats.mapped_reads.fetch_add(1, Ordering::Relaxed);
                    return Ok(data);
                }
                Err(e) => debug!(error = %e, "mapping failed, reading through buffer"),
            }
        }

        self.stats.buffered_reads.fetch_add(1, Ordering::Relaxed);
        read_buffered(file, offset, len)
    }

    fn free_memory(&self) -> u64 {
        let mut sample = self.sample.lock();
        if let Some((taken, free)) = *sample {
            if taken.elapsed() < self.policy.sample_interval {
                return free;
            }
        }

        let free = self.probe.free_memory();
        self.stats.memory_samples.fetch_add(1, Ordering::Relaxed);
        *sample = Some((Instant::now(), free));
        free
    }
}

impl std::fmt::Debug for AdaptiveCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdaptiveCache")
            .field("policy", &self.policy)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

#[allow(unsafe_code)]
fn read_mapped(file: &File, offset: u64, len: usize) -> io::Result<Vec<u8>> {
    // SAFETY: the mapping is read-only and dropped before returning. Segment
    // bytes below the current length are never rewritten; in-process
    // truncation and removal wait for in-flight reads on the segment gate.
    let map = unsafe { MmapOptions::new().offset(offset).len(len).map(file)? };
    Ok(map.to_vec())
}

/// Positional reads leave the shared handle's cursor alone, so concurrent
/// readers of one segment never serialize on it.
#[cfg(unix)]
fn read_buffered(file: &File, offset: u64, len: usize) -> io::Result<Vec<u8>> {
    use std::os::unix::fs::FileExt;
    let mut buffer = vec![0u8; len];
    file.read_exact_at(&mut buffer, offset)?;
    Ok(buffer)
}

#[cfg(windows)]
fn read_buffered(file: &File, offset: u64, len: usize) -> io::Result<Vec<u8>> {
    use std::os::windows::fs::FileExt;
    let mut buffer = vec![0u8; len];
    let mut filled = 0;
    while filled < len {
        match file.seek_read(&mut buffer[filled..], offset + filled as u64) {
            Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Arc;

    struct FakeProbe(Arc<AtomicU64>);

    impl MemoryProbe for FakeProbe {
        fn free_memory(&self) -> u64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    fn cache_with(policy: CachePolicy, free: u64) -> (AdaptiveCache, Arc<AtomicU64>) {
        let level = Arc::new(AtomicU64::new(free));
        let cache = AdaptiveCache::with_probe(policy, Box::new(FakeProbe(Arc::clone(&level))));
        (cache, level)
    }

    fn uncached(threshold: u64) -> CachePolicy {
        CachePolicy {
            sample_interval: Duration::ZERO,
            ..CachePolicy::mapped(threshold)
        }
    }

    #[test]
    fn disabled_policy_always_buffers() {
        let (cache, _) = cache_with(CachePolicy::buffered(), u64::MAX);
        assert_eq!(cache.decide(4096), AccessMode::Buffered);
        assert_eq!(cache.stats().memory_samples(), 0);
    }

    #[test]
    fn maps_at_or_above_threshold() {
        let (cache, _) = cache_with(uncached(1000), 1000);
        assert_eq!(cache.decide(10), AccessMode::Mapped);
    }

    #[test]
    fn falls_back_below_threshold() {
        let (cache, level) = cache_with(uncached(1000), 5000);
        assert_eq!(cache.decide(10), AccessMode::Mapped);

        level.store(999, Ordering::SeqCst);
        assert_eq!(cache.decide(10), AccessMode::Buffered);

        level.store(2000, Ordering::SeqCst);
        assert_eq!(cache.decide(10), AccessMode::Mapped);
    }

    #[test]
    fn empty_requests_are_buffered() {
        let (cache, _) = cache_with(uncached(0), 1);
        assert_eq!(cache.decide(0), AccessMode::Buffered);
    }

    #[test]
    fn sample_is_reused_within_interval() {
        let policy = CachePolicy {
            sample_interval: Duration::from_secs(3600),
            ..CachePolicy::mapped(1000)
        };
        let (cache, level) = cache_with(policy, 5000);

        assert_eq!(cache.decide(10), AccessMode::Mapped);
        level.store(0, Ordering::SeqCst);
        assert_eq!(cache.decide(10), AccessMode::Mapped);
        assert_eq!(cache.stats().memory_samples(), 1);
    }

    #[test]
    fn both_paths_return_same_bytes() {
        let mut file = tempfile::tempfile().unwrap();
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        file.write_all(&data).unwrap();

        let (mapped, _) = cache_with(uncached(0), 1);
        let (buffered, _) = cache_with(CachePolicy::buffered(), 1);

        for (offset, len) in [(0u64, 1usize), (4095, 2), (4096, 4096), (123, 9877)] {
            let a = mapped.read(&file, offset, len).unwrap();
            let b = buffered.read(&file, offset, len).unwrap();
            assert_eq!(a, b);
            assert_eq!(a, &data[offset as usize..offset as usize + len]);
        }

        assert_eq!(mapped.stats().mapped_reads(), 4);
        assert_eq!(buffered.stats().buffered_reads(), 4);
    }
}
