//! Cache Store Module
//!
//! Generic TTL cache combining HashMap storage, nearest-expiry eviction and a
//! background sweep task.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;
use tracing::debug;

use crate::cache::{CacheEntry, CacheStats, StatsCounters};
use crate::tasks::{spawn_sweep_task, Sweep, SweepHandle};

// == Cache Config ==
/// Construction parameters for a [`TtlCache`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Maximum number of entries; values below 1 are treated as 1
    pub capacity: usize,
    /// TTL applied by [`TtlCache::set`] and [`TtlCache::get_or_compute`]
    pub default_ttl: Duration,
    /// Sweep interval, `None` = half the default TTL
    pub cleanup_interval: Option<Duration>,
}

impl CacheConfig {
    /// Resolves the sweep interval, falling back to `default_ttl / 2`.
    pub fn effective_cleanup_interval(&self) -> Duration {
        self.cleanup_interval.unwrap_or(self.default_ttl / 2)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            default_ttl: Duration::from_secs(300),
            cleanup_interval: None,
        }
    }
}

// == Shared State ==
struct CacheInner<K, V> {
    entries: RwLock<HashMap<K, CacheEntry<V>>>,
    stats: StatsCounters,
}

impl<K, V> Sweep for CacheInner<K, V>
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired_at(now));
        before - entries.len()
    }
}

// == TTL Cache ==
/// Thread-safe key/value cache with per-entry expiration.
///
/// When a new key is inserted into a full cache, the entry closest to
/// expiring is evicted first. This approximates recency when TTLs are
/// homogeneous; it is not a strict LRU.
pub struct TtlCache<K, V> {
    inner: Arc<CacheInner<K, V>>,
    capacity: usize,
    default_ttl: Duration,
    sweeper: Option<SweepHandle>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    // == Constructor ==
    /// Creates a cache and starts its background sweep task.
    ///
    /// Must be called from within a tokio runtime. A zero sweep interval
    /// disables the background task.
    pub fn new(config: CacheConfig) -> Self {
        let mut cache = Self::manual(config.clone());
        let interval = config.effective_cleanup_interval();
        if !interval.is_zero() {
            cache.sweeper = Some(spawn_sweep_task(
                Arc::downgrade(&cache.inner),
                interval,
                "ttl_cache",
            ));
        }
        cache
    }

    /// Creates a cache without a background sweep task.
    ///
    /// Expired entries are still hidden from readers; they are only
    /// reclaimed on read, on eviction or via [`purge_expired`](Self::purge_expired).
    pub fn manual(config: CacheConfig) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                entries: RwLock::new(HashMap::new()),
                stats: StatsCounters::new(),
            }),
            capacity: config.capacity.max(1),
            default_ttl: config.default_ttl,
            sweeper: None,
        }
    }

    // == Get ==
    /// Retrieves a value by key.
    ///
    /// Returns the value if found and not expired. An expired entry is
    /// removed as a side effect and counted as a miss.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        {
            let entries = self.inner.entries.read();
            match entries.get(key) {
                Some(entry) if !entry.is_expired() => {
                    self.inner.stats.record_hit();
                    return Some(entry.value.clone());
                }
                Some(_) => {}
                None => {
                    self.inner.stats.record_miss();
                    return None;
                }
            }
        }

        // Re-check under the write lock: a writer may have refreshed the key
        let mut entries = self.inner.entries.write();
        if entries.get(key).is_some_and(|entry| entry.is_expired()) {
            entries.remove(key);
        }
        self.inner.stats.record_miss();
        None
    }

    // == Set ==
    /// Stores a value with the default TTL.
    pub fn set(&self, key: K, value: V) {
        self.set_with_ttl(key, value, self.default_ttl);
    }

    /// Stores a value with an explicit TTL.
    ///
    /// If the key already exists, the value is overwritten and its TTL reset.
    /// If the key is new and the cache is full, the entry with the nearest
    /// expiration is evicted first.
    pub fn set_with_ttl(&self, key: K, value: V, ttl: Duration) {
        let mut entries = self.inner.entries.write();

        if !entries.contains_key(&key) && entries.len() >= self.capacity {
            let victim = entries
                .iter()
                .min_by_key(|(_, entry)| entry.expires_at)
                .map(|(key, _)| key.clone());
            if let Some(victim) = victim {
                entries.remove(&victim);
                self.inner.stats.record_eviction();
                debug!(capacity = self.capacity, "Evicted entry nearest to expiry");
            }
        }

        entries.insert(key, CacheEntry::new(value, ttl));
    }

    // == Delete ==
    /// Removes an entry by key. Returns true if an entry was present.
    pub fn delete<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.inner.entries.write().remove(key).is_some()
    }

    // == Clear ==
    /// Removes every entry. Statistics are kept.
    pub fn clear(&self) {
        self.inner.entries.write().clear();
    }

    // == Get Or Compute ==
    /// Returns the cached value, or computes, caches and returns it.
    ///
    /// `compute` runs without any lock held, so concurrent misses on the
    /// same key may each invoke it; the last writer wins. A compute error is
    /// returned unchanged and nothing is cached.
    pub async fn get_or_compute<F, Fut, E>(&self, key: K, compute: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }

        let value = compute().await?;
        self.set(key, value.clone());
        Ok(value)
    }

    // == Contains ==
    /// Checks for a live entry without touching hit/miss statistics.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.inner
            .entries
            .read()
            .get(key)
            .is_some_and(|entry| !entry.is_expired())
    }

    // == Purge Expired ==
    /// Removes all expired entries now. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        self.inner.sweep_expired()
    }

    // == Stats ==
    /// Returns a best-effort statistics snapshot.
    pub fn stats(&self) -> CacheStats {
        self.inner.stats.snapshot(self.len())
    }

    // == Stop ==
    /// Halts the background sweep. Idempotent; get/set keep working.
    pub fn stop(&self) {
        if let Some(sweeper) = &self.sweeper {
            sweeper.stop();
        }
    }

    /// Returns true while a background sweep task is active.
    pub fn is_sweeping(&self) -> bool {
        self.sweeper
            .as_ref()
            .is_some_and(|sweeper| !sweeper.is_stopped())
    }

    // == Length ==
    /// Returns the number of held entries, including expired ones not yet reclaimed.
    pub fn len(&self) -> usize {
        self.inner.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.read().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }
}

impl<K, V> TtlCache<K, V>
where
    K: AsRef<str> + Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    // == Delete By Prefix ==
    /// Removes every entry whose key starts with `prefix`. Linear scan.
    pub fn delete_by_prefix(&self, prefix: &str) -> usize {
        let mut entries = self.inner.entries.write();
        let before = entries.len();
        entries.retain(|key, _| !key.as_ref().starts_with(prefix));
        before - entries.len()
    }
}
