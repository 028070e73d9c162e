//! Counters reported by the index cache.

use std::sync::atomic::{AtomicU64, Ordering};

/// Sink for cache events. Implementations must be cheap, they are called
/// while the cache lock is held.
pub trait CacheMetrics: Send + Sync {
    fn hit(&self);

    /// A lookup that started a fetch, counted whether or not the fetch succeeds.
    fn miss(&self);

    /// A fetch started by a miss loaded an index of `bytes` estimated size.
    fn loaded(&self, bytes: u64);

    fn evicted(&self);

    /// An index too large for the cache was not admitted.
    fn rejected(&self);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCacheMetrics;

impl CacheMetrics for NoopCacheMetrics {
    fn hit(&self) {}
    fn miss(&self) {}
    fn loaded(&self, _bytes: u64) {}
    fn evicted(&self) {}
    fn rejected(&self) {}
}

/// Point-in-time copy of [`AtomicCacheMetrics`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheMetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub missed_bytes: u64,
    pub evictions: u64,
    pub rejections: u64,
}

/// In-process counters, e.g. for a status endpoint or for tests.
#[derive(Debug, Default)]
pub struct AtomicCacheMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    missed_bytes: AtomicU64,
    evictions: AtomicU64,
    rejections: AtomicU64,
}

impl AtomicCacheMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> CacheMetricsSnapshot {
        CacheMetricsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            missed_bytes: self.missed_bytes.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            rejections: self.rejections.load(Ordering::Relaxed),
        }
    }
}

impl CacheMetrics for AtomicCacheMetrics {
    fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn loaded(&self, bytes: u64) {
        self.missed_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    fn evicted(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    fn rejected(&self) {
        self.rejections.fetch_add(1, Ordering::Relaxed);
    }
}
