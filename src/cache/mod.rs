//! Cache Module
//!
//! Provides a generic in-memory cache with TTL expiration, nearest-expiry
//! eviction and background sweeping.

mod entry;
mod stats;
mod store;


// Re-export public types
pub use entry::CacheEntry;
pub use stats::{hit_ratio, CacheStats, StatsCounters};
pub use store::{CacheConfig, TtlCache};
