//! Cache Statistics Module
//!
//! Tracks cache performance metrics including hits, misses, and evictions.
//! Counters are atomics kept outside the map lock, so a snapshot is best
//! effort relative to concurrent reads and writes.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

// == Cache Stats ==
/// Point-in-time snapshot of cache performance metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    /// Current number of entries held (expired-but-unswept included)
    pub size: usize,
    /// Number of successful cache retrievals
    pub hits: u64,
    /// Number of failed cache retrievals (key not found or expired)
    pub misses: u64,
    /// Number of entries evicted to make room for new keys
    pub evictions: u64,
    /// hits / (hits + misses), or 0.0 if no lookups have occurred
    pub ratio: f64,
}

// == Hit Ratio ==
/// Calculates the cache hit ratio.
///
/// Returns hits / (hits + misses), or 0.0 if no requests have been made.
pub fn hit_ratio(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

// == Stats Counters ==
/// Lock-free counters shared by readers and writers of a cache.
#[derive(Debug, Default)]
pub struct StatsCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl StatsCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    // == Snapshot ==
    /// Builds a [`CacheStats`] for a cache currently holding `size` entries.
    pub fn snapshot(&self, size: usize) -> CacheStats {
        let hits = self.hits();
        let misses = self.misses();
        CacheStats {
            size,
            hits,
            misses,
            evictions: self.evictions.load(Ordering::Relaxed),
            ratio: hit_ratio(hits, misses),
        }
    }
}
