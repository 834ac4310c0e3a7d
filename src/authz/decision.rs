//! Decision Cache Module
//!
//! Per-user cache of permission codes with targeted and global invalidation.
//! Callers that change role or permission assignments must invalidate the
//! affected users; otherwise staleness is bounded only by the TTL.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;

use crate::authz::{PermissionLookup, UserId};
use crate::cache::StatsCounters;
use crate::tasks::{spawn_sweep_task, Sweep, SweepHandle};

// == Decision Cache Config ==
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionCacheConfig {
    /// Lifetime of a cached permission set
    pub ttl: Duration,
    /// Background sweep interval; `None` means half the TTL, zero disables
    /// the sweep task
    pub cleanup_interval: Option<Duration>,
}

impl DecisionCacheConfig {
    pub fn effective_cleanup_interval(&self) -> Duration {
        self.cleanup_interval.unwrap_or(self.ttl / 2)
    }
}

impl Default for DecisionCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(5 * 60),
            cleanup_interval: None,
        }
    }
}

// == Decision Cache Stats ==
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecisionCacheStats {
    /// Users with an entry held (expired entries count until swept)
    pub cached_users: usize,
    pub ttl: Duration,
    pub hits: u64,
    pub misses: u64,
}

// == Entry ==
#[derive(Debug)]
struct DecisionEntry {
    permissions: Arc<HashSet<String>>,
    expires_at: Instant,
}

// == Backing Store ==
#[derive(Debug, Default)]
struct DecisionStore {
    entries: RwLock<HashMap<UserId, DecisionEntry>>,
    /// Bumped on every invalidation; lookups started under an older epoch
    /// are returned to their caller but not stored
    epoch: AtomicU64,
    stats: StatsCounters,
}

impl Sweep for DecisionStore {
    fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| now < entry.expires_at);
        before - entries.len()
    }
}

// == Decision Cache ==
/// Caches "which permission codes does user U hold" answers.
pub struct DecisionCache<L> {
    lookup: L,
    store: Arc<DecisionStore>,
    ttl: Duration,
    sweeper: Option<SweepHandle>,
}

impl<L: PermissionLookup> DecisionCache<L> {
    // == Constructor ==
    /// Creates a decision cache over `lookup`.
    ///
    /// Spawns the background sweep on the current tokio runtime unless the
    /// effective cleanup interval is zero.
    pub fn new(lookup: L, config: DecisionCacheConfig) -> Self {
        let store = Arc::new(DecisionStore::default());
        let interval = config.effective_cleanup_interval();
        let sweeper = (!interval.is_zero())
            .then(|| spawn_sweep_task(Arc::downgrade(&store), interval, "decision_cache"));

        Self {
            lookup,
            store,
            ttl: config.ttl,
            sweeper,
        }
    }

    // == Has Permission ==
    /// Checks whether `user_id` holds the permission `code`.
    pub async fn has_permission(&self, user_id: UserId, code: &str) -> Result<bool, L::Error> {
        let permissions = self.permission_set(user_id).await?;
        Ok(permissions.contains(code))
    }

    // == Get User Permissions ==
    /// Returns the user's permission codes, sorted.
    ///
    /// Served from the cache while the entry is live; otherwise fetched from
    /// the lookup and cached for the configured TTL. Lookup errors are
    /// returned unchanged and not cached.
    pub async fn get_user_permissions(&self, user_id: UserId) -> Result<Vec<String>, L::Error> {
        let permissions = self.permission_set(user_id).await?;
        let mut codes: Vec<String> = permissions.iter().cloned().collect();
        codes.sort_unstable();
        Ok(codes)
    }

    async fn permission_set(&self, user_id: UserId) -> Result<Arc<HashSet<String>>, L::Error> {
        if let Some(permissions) = self.cached(user_id) {
            self.store.stats.record_hit();
            return Ok(permissions);
        }
        self.store.stats.record_miss();

        let epoch = self.store.epoch.load(Ordering::Acquire);
        let codes = self.lookup.fetch(user_id).await?;
        let permissions: Arc<HashSet<String>> = Arc::new(codes.into_iter().collect());

        let mut entries = self.store.entries.write();
        if self.store.epoch.load(Ordering::Acquire) == epoch {
            entries.insert(
                user_id,
                DecisionEntry {
                    permissions: permissions.clone(),
                    expires_at: Instant::now() + self.ttl,
                },
            );
        } else {
            debug!(user_id, "Discarded permission lookup raced by invalidation");
        }

        Ok(permissions)
    }

    fn cached(&self, user_id: UserId) -> Option<Arc<HashSet<String>>> {
        {
            let entries = self.store.entries.read();
            match entries.get(&user_id) {
                None => return None,
                Some(entry) if Instant::now() < entry.expires_at => {
                    return Some(entry.permissions.clone());
                }
                Some(_) => {}
            }
        }

        // Expired: drop it unless a fresh entry replaced it meanwhile
        let mut entries = self.store.entries.write();
        if entries
            .get(&user_id)
            .is_some_and(|entry| Instant::now() >= entry.expires_at)
        {
            entries.remove(&user_id);
        }
        None
    }

    // == Invalidation ==
    /// Drops the cached entry for one user. Returns true if one was held.
    ///
    /// The invalidation epoch is shared by all users, so a lookup in flight
    /// for any other user is also returned without being stored; that user
    /// pays one extra lookup on the next check.
    pub fn invalidate_user(&self, user_id: UserId) -> bool {
        let mut entries = self.store.entries.write();
        self.store.epoch.fetch_add(1, Ordering::AcqRel);
        let removed = entries.remove(&user_id).is_some();
        debug!(user_id, removed, "Invalidated cached permissions");
        removed
    }

    /// Drops the cached entries for a batch of users. Returns how many were held.
    pub fn invalidate_users(&self, user_ids: &[UserId]) -> usize {
        let mut entries = self.store.entries.write();
        self.store.epoch.fetch_add(1, Ordering::AcqRel);
        let removed = user_ids
            .iter()
            .filter(|user_id| entries.remove(*user_id).is_some())
            .count();
        debug!(users = user_ids.len(), removed, "Invalidated cached permissions");
        removed
    }

    /// Replaces the whole backing map with an empty one.
    pub fn invalidate_all(&self) {
        let previous = {
            let mut entries = self.store.entries.write();
            self.store.epoch.fetch_add(1, Ordering::AcqRel);
            std::mem::take(&mut *entries)
        };
        debug!(removed = previous.len(), "Invalidated all cached permissions");
    }

    // == Maintenance ==
    /// Removes expired entries now. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        self.store.sweep_expired()
    }

    /// Halts the background sweep, if any. Idempotent.
    pub fn stop(&self) {
        if let Some(sweeper) = &self.sweeper {
            sweeper.stop();
        }
    }

    // == Stats ==
    pub fn stats(&self) -> DecisionCacheStats {
        DecisionCacheStats {
            cached_users: self.store.entries.read().len(),
            ttl: self.ttl,
            hits: self.store.stats.hits(),
            misses: self.store.stats.misses(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}
