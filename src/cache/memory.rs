//! Memory Cache Module
//!
//! TTL cache backed by two concurrent maps, one for values and one for expiries.

use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;

use crate::cache::expiry::{is_alive, now_millis};
use crate::cache::stats::StatsRecorder;
use crate::cache::{Cache, CacheStats, Expiry};
use crate::tasks::{Reclaim, Scheduler, SchedulerHandle};

// == Memory Cache ==
/// In-memory cache with lazy and timer-driven expiration.
///
/// Every map operation is atomic, but a key's value and expiry live in two
/// maps and are not written together. Under concurrent writes to the same key
/// a reader may briefly see one writer's value with another writer's expiry.
/// Reads never evict: expired entries stay in memory until `delete`, `remove`,
/// `clear` or a sweep drops them.
pub struct MemoryCache<K, V> {
    /// Key-value storage
    values: DashMap<K, V>,
    /// Key-expiry storage, the source of truth for existence
    expires: DashMap<K, Expiry>,
    stats: StatsRecorder,
    scheduler: SchedulerHandle,
    label: String,
}

impl<K, V> MemoryCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    // == Constructor ==
    /// Creates a cache and registers it with the scheduler's sweep.
    pub fn new(scheduler: &Scheduler) -> Arc<Self> {
        Self::with_label(scheduler, "memory")
    }

    /// Creates a cache whose sweep logs carry `label`.
    pub fn with_label(scheduler: &Scheduler, label: impl Into<String>) -> Arc<Self> {
        let handle = scheduler.handle();
        let cache = Arc::new(Self {
            values: DashMap::new(),
            expires: DashMap::new(),
            stats: StatsRecorder::default(),
            scheduler: handle.clone(),
            label: label.into(),
        });

        let reclaimable: Arc<dyn Reclaim> = cache.clone();
        handle.register(Arc::downgrade(&reclaimable));
        cache
    }

    /// Writes the expiry before the value so a concurrent sweep that already
    /// cleared a dead expiry leaves the new value in place.
    fn store(&self, key: K, value: V, expiry: Expiry) {
        self.expires.insert(key.clone(), expiry);
        self.values.insert(key, value);
    }

    fn vanish(&self, key: &K) {
        self.expires.remove(key);
        self.values.remove(key);
    }

    fn expiry_of(&self, key: &K) -> Option<Expiry> {
        self.expires.get(key).map(|expiry| *expiry)
    }

    // == Reclaim Expired ==
    /// Removes all expired entries from both maps.
    ///
    /// Keys are visited one after another on the calling thread; parallelism
    /// comes from the scheduler sweeping several caches at once. Returns the
    /// number of entries removed. Stops early once the scheduler has shut down.
    pub fn reclaim_expired(&self) -> usize {
        if !self.scheduler.is_alive() {
            return 0;
        }

        let now = now_millis();
        let expired: Vec<K> = self
            .expires
            .iter()
            .filter(|entry| !entry.value().is_alive_at(now))
            .map(|entry| entry.key().clone())
            .collect();

        let mut removed = 0;
        for key in expired {
            if !self.scheduler.is_alive() {
                break;
            }
            // Re-check under the shard lock so a concurrent refresh survives
            if self
                .expires
                .remove_if(&key, |_, expiry| !expiry.is_alive_at(now))
                .is_some()
            {
                // A writer may have stored a fresh expiry since
                self.values
                    .remove_if(&key, |_, _| !self.expires.contains_key(&key));
                removed += 1;
            }
        }

        self.stats.record_reclaimed(removed);
        removed
    }

    // == Length ==
    /// Returns the number of alive entries.
    pub fn len(&self) -> usize {
        let now = now_millis();
        self.expires
            .iter()
            .filter(|entry| entry.value().is_alive_at(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of entries physically held, including expired ones awaiting a sweep.
    pub fn stored_len(&self) -> usize {
        self.expires.len().max(self.values.len())
    }

    // == Iteration ==
    /// Snapshot of all alive entries, in no particular order.
    pub fn entries(&self) -> Vec<(K, V)> {
        let now = now_millis();
        let alive: Vec<K> = self
            .expires
            .iter()
            .filter(|entry| entry.value().is_alive_at(now))
            .map(|entry| entry.key().clone())
            .collect();

        alive
            .into_iter()
            .filter_map(|key| {
                let value = self.values.get(&key).map(|v| v.value().clone())?;
                Some((key, value))
            })
            .collect()
    }

    /// Visits a snapshot of all alive entries. `action` may call back into the cache.
    pub fn for_each<F>(&self, mut action: F)
    where
        F: FnMut(&K, &V),
    {
        for (key, value) in self.entries() {
            action(&key, &value);
        }
    }

    // == Stats ==
    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot(self.len())
    }
}

impl<K, V> Cache<K, V> for MemoryCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn insert(&self, key: K, value: V, expiry: Expiry) {
        self.store(key, value, expiry);
    }

    fn has(&self, key: &K) -> bool {
        is_alive(self.expiry_of(key))
    }

    fn touch(&self, key: &K, expiry: Expiry) -> bool {
        let exists = self.has(key);
        if exists {
            self.expires.insert(key.clone(), expiry);
        }
        exists
    }

    fn get(&self, key: &K) -> Option<V> {
        let value = if self.has(key) {
            self.values.get(key).map(|value| value.value().clone())
        } else {
            None
        };
        self.stats.record_read(value.is_some());
        value
    }

    fn get_and_touch(&self, key: &K, expiry: Expiry) -> Option<V> {
        let value = self.get(key);
        if value.is_some() {
            self.expires.insert(key.clone(), expiry);
        }
        value
    }

    fn delete(&self, key: &K) -> Option<V> {
        let value = self.get(key);
        self.vanish(key);
        value
    }

    fn remove(&self, key: &K) {
        self.vanish(key);
    }

    fn clear(&self) {
        self.expires.clear();
        self.values.clear();
    }

    fn expire_at(&self, key: &K) -> Option<Expiry> {
        self.expiry_of(key).filter(|expiry| expiry.is_alive())
    }
}

impl<K, V> Reclaim for MemoryCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn label(&self) -> &str {
        &self.label
    }

    fn reclaim(&self) -> anyhow::Result<usize> {
        Ok(self.reclaim_expired())
    }
}
