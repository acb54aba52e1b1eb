//! Persistent Cache Module
//!
//! Dual-tier TTL cache. Entries live in the same pair of concurrent maps as
//! [`MemoryCache`](crate::cache::MemoryCache), and every write goes through
//! to a per-key file triple on disk. Misses in memory fall back to disk, so
//! entries survive a restart and are loaded lazily on first access.

use std::collections::hash_map::RandomState;
use std::collections::HashSet;
use std::hash::{BuildHasher, Hash};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use parking_lot::{Mutex, MutexGuard};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::cache::codec::{self, BlobKind, CodecError};
use crate::cache::disk::DiskStore;
use crate::cache::expiry::now_millis;
use crate::cache::paths::{PathLease, PathRegistry};
use crate::cache::stats::StatsRecorder;
use crate::cache::{Cache, CacheStats, Durable, Expiry};
use crate::error::Result;
use crate::tasks::{Reclaim, Scheduler, SchedulerHandle};

/// Number of locks serializing disk mutations; keys share a lock by hash.
const DISK_LOCK_STRIPES: usize = 64;

/// Maps a key to the base file name of its triple.
///
/// Must be injective over the keys in use and must not produce names ending
/// in `_key`, `_expire` or `.tmp`.
pub type Namer<K> = Arc<dyn Fn(&K) -> String + Send + Sync>;

/// Default file name: hex SHA-256 of the key's canonical encoding.
///
/// # Errors
/// Returns the codec error when the key cannot be encoded.
pub fn default_name<K: Serialize>(key: &K) -> std::result::Result<String, CodecError> {
    let encoded = codec::encode(BlobKind::Key, key)?;
    Ok(hex::encode(Sha256::digest(&encoded)))
}

enum Naming<K> {
    Hashed,
    Custom(Namer<K>),
}

impl<K: Serialize> Naming<K> {
    fn name(&self, key: &K) -> std::result::Result<String, CodecError> {
        match self {
            Naming::Hashed => default_name(key),
            Naming::Custom(namer) => Ok(namer(key)),
        }
    }
}

// == Builder ==
/// Configures and opens a [`PersistentCache`].
pub struct PersistentCacheBuilder<K, V> {
    scheduler: SchedulerHandle,
    base_path: PathBuf,
    alias: String,
    namer: Option<Namer<K>>,
    paths: Option<Arc<PathRegistry>>,
    _values: PhantomData<fn() -> V>,
}

impl<K, V> PersistentCacheBuilder<K, V>
where
    K: Eq + Hash + Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Root directory; the cache lives in `base_path/alias`.
    pub fn base_path(mut self, base_path: impl Into<PathBuf>) -> Self {
        self.base_path = base_path.into();
        self
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = alias.into();
        self
    }

    /// Overrides the key to file name mapping. See [`Namer`].
    pub fn namer<F>(mut self, namer: F) -> Self
    where
        F: Fn(&K) -> String + Send + Sync + 'static,
    {
        self.namer = Some(Arc::new(namer));
        self
    }

    /// Uses `paths` instead of the process-wide registry for directory ownership.
    pub fn paths(mut self, paths: Arc<PathRegistry>) -> Self {
        self.paths = Some(paths);
        self
    }

    // == Build ==
    /// Opens the cache directory and registers the cache for sweeping.
    ///
    /// # Errors
    /// - `CacheError::CreateDir` if the directory cannot be created
    /// - `CacheError::NotADirectory` if the path exists and is not a directory
    /// - `CacheError::PathInUse` if another live cache owns the directory
    pub fn build(self) -> Result<Arc<PersistentCache<K, V>>> {
        let alias = self.alias.trim().to_string();
        let disk = DiskStore::open(&self.base_path.join(&alias))?;

        let paths = self.paths.unwrap_or_else(PathRegistry::global);
        let lease = paths.acquire(disk.dir(), &alias)?;

        let naming = match self.namer {
            Some(namer) => Naming::Custom(namer),
            None => Naming::Hashed,
        };
        let persisted: DashSet<K> = disk
            .scan(|key: &K| naming.name(key).ok())
            .into_iter()
            .collect();

        info!(
            "Opened persistent cache '{}' at {:?} with {} persisted keys",
            alias,
            disk.dir(),
            persisted.len()
        );

        let cache = Arc::new(PersistentCache {
            values: DashMap::new(),
            expires: DashMap::new(),
            persisted,
            disk,
            naming,
            disk_locks: (0..DISK_LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
            lock_hasher: RandomState::new(),
            label: format!("persistent:{alias}"),
            alias,
            stats: StatsRecorder::default(),
            scheduler: self.scheduler.clone(),
            _lease: lease,
        });

        let reclaimable: Arc<dyn Reclaim> = cache.clone();
        self.scheduler.register(Arc::downgrade(&reclaimable));
        Ok(cache)
    }
}

// == Persistent Cache ==
/// TTL cache with a write-through disk tier.
///
/// Disk failures during normal operation are logged and the affected key
/// degrades to memory-only or to a miss; they never surface to callers. As
/// with the memory cache, a key's value and expiry are not updated as one
/// atomic pair. Disk mutations of one key are serialized by a striped lock,
/// which is never held across memory updates.
pub struct PersistentCache<K, V> {
    values: DashMap<K, V>,
    expires: DashMap<K, Expiry>,
    /// Keys with a complete triple on disk
    persisted: DashSet<K>,
    disk: DiskStore,
    naming: Naming<K>,
    disk_locks: Box<[Mutex<()>]>,
    lock_hasher: RandomState,
    alias: String,
    label: String,
    stats: StatsRecorder,
    scheduler: SchedulerHandle,
    _lease: PathLease,
}

impl<K, V> PersistentCache<K, V>
where
    K: Eq + Hash + Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Starts building a cache swept by `scheduler`, rooted at the
    /// configured base path with alias `default`.
    pub fn builder(scheduler: &Scheduler) -> PersistentCacheBuilder<K, V> {
        PersistentCacheBuilder {
            scheduler: scheduler.handle(),
            base_path: scheduler.config().base_path.clone(),
            alias: "default".to_string(),
            namer: None,
            paths: None,
            _values: PhantomData,
        }
    }

    /// Opens `base_path/alias` with default settings.
    pub fn open(
        scheduler: &Scheduler,
        base_path: impl Into<PathBuf>,
        alias: impl Into<String>,
    ) -> Result<Arc<Self>> {
        Self::builder(scheduler)
            .base_path(base_path)
            .alias(alias)
            .build()
    }

    /// File name of `key`. `None` keeps the key in memory only.
    fn name(&self, key: &K) -> Option<String> {
        match self.naming.name(key) {
            Ok(name) => Some(name),
            Err(e) => {
                warn!(
                    "Cache '{}': key cannot be named on disk, keeping it in memory: {}",
                    self.alias, e
                );
                None
            }
        }
    }

    fn disk_lock(&self, key: &K) -> MutexGuard<'_, ()> {
        let stripe = self.lock_hasher.hash_one(key) as usize % self.disk_locks.len();
        self.disk_locks[stripe].lock()
    }

    fn memory_expiry(&self, key: &K) -> Option<Expiry> {
        self.expires.get(key).map(|expiry| *expiry)
    }

    // == Read Path ==
    /// Alive expiry of `key`, filling memory from disk on a miss.
    fn load_expiry(&self, key: &K) -> Option<Expiry> {
        if let Some(expiry) = self.memory_expiry(key).filter(|e| e.is_alive()) {
            return Some(expiry);
        }
        if !self.persisted.contains(key) {
            return None;
        }

        match self.read_disk_entry(key) {
            Some((value, expiry)) => {
                self.fill(key, value, expiry);
                Some(expiry)
            }
            None => {
                self.vanish(key);
                None
            }
        }
    }

    /// Alive value of `key`, filling memory from disk on a miss.
    fn load_value(&self, key: &K) -> Option<V> {
        self.load_expiry(key)?;
        if let Some(value) = self.values.get(key).map(|value| value.value().clone()) {
            return Some(value);
        }
        if !self.persisted.contains(key) {
            return None;
        }

        // Expiry is in memory but the value is not yet
        match self.read_disk_entry(key) {
            Some((value, expiry)) => {
                self.fill(key, value.clone(), expiry);
                Some(value)
            }
            None => {
                self.vanish(key);
                None
            }
        }
    }

    /// Reads an alive (value, expiry) pair from disk.
    fn read_disk_entry(&self, key: &K) -> Option<(V, Expiry)> {
        let name = self.name(key)?;
        let expiry = match self.disk.read_expiry(&name) {
            Ok(Some(expiry)) if expiry.is_alive() => expiry,
            Ok(_) => return None,
            Err(e) => {
                warn!("Cache '{}': unreadable expiry for '{}': {}", self.alias, name, e);
                return None;
            }
        };

        match self.disk.read_value(&name) {
            Ok(Some(value)) => Some((value, expiry)),
            Ok(None) => None,
            Err(e) => {
                warn!("Cache '{}': unreadable value for '{}': {}", self.alias, name, e);
                None
            }
        }
    }

    fn fill(&self, key: &K, value: V, expiry: Expiry) {
        self.expires.insert(key.clone(), expiry);
        self.values.insert(key.clone(), value);
        self.stats.record_disk_load();
        debug!("Cache '{}': loaded a persisted entry from disk", self.alias);
    }

    // == Write Path ==
    /// Writes disk first, then the expiry, then the value.
    fn store(&self, key: K, value: V, expiry: Expiry) {
        let current = self.load_expiry(&key);

        if let Some(name) = self.name(&key) {
            let _guard = self.disk_lock(&key);
            if current.is_some() && self.persisted.contains(&key) {
                let written = self.disk.write_value(&name, &value).and_then(|()| {
                    if current != Some(expiry) {
                        self.disk.write_expiry(&name, expiry)
                    } else {
                        Ok(())
                    }
                });
                if let Err(e) = written {
                    warn!("Cache '{}': write-through failed for '{}': {}", self.alias, name, e);
                    self.forget_locked(&key, &name);
                }
            } else if current.is_none() && expiry.is_alive() {
                // Fresh insert; an already-dead entry never reaches disk
                match self.disk.write_triple(&name, &key, &value, expiry) {
                    Ok(()) => {
                        self.persisted.insert(key.clone());
                    }
                    Err(e) => {
                        warn!("Cache '{}': failed to persist '{}': {}", self.alias, name, e);
                        let _ = self.disk.delete_triple(&name);
                    }
                }
            }
        }

        if current != Some(expiry) {
            self.expires.insert(key.clone(), expiry);
        }
        self.values.insert(key, value);
    }

    /// Moves the in-memory expiry of an alive key to `expiry`, writing through.
    fn refresh(&self, key: &K, expiry: Expiry) {
        self.expires.insert(key.clone(), expiry);
        if !self.persisted.contains(key) {
            return;
        }
        let Some(name) = self.name(key) else {
            return;
        };

        let _guard = self.disk_lock(key);
        if self.persisted.contains(key) {
            if let Err(e) = self.disk.write_expiry(&name, expiry) {
                warn!("Cache '{}': failed to refresh expiry of '{}': {}", self.alias, name, e);
                self.forget_locked(key, &name);
            }
        }
    }

    /// Writes `key` durably with no expiry.
    fn pin(&self, key: K, value: V) -> bool {
        let Some(name) = self.name(&key) else {
            return false;
        };

        let written = {
            let _guard = self.disk_lock(&key);
            match self.disk.write_triple(&name, &key, &value, Expiry::Never) {
                Ok(()) => {
                    self.persisted.insert(key.clone());
                    true
                }
                Err(e) => {
                    warn!("Cache '{}': failed to persist '{}': {}", self.alias, name, e);
                    self.persisted.remove(&key);
                    let _ = self.disk.delete_triple(&name);
                    false
                }
            }
        };

        if written {
            self.expires.insert(key.clone(), Expiry::Never);
            self.values.insert(key, value);
        }
        written
    }

    // == Removal ==
    fn vanish(&self, key: &K) {
        self.expires.remove(key);
        self.values.remove(key);
        self.forget_on_disk(key);
    }

    /// Drops the durable copy of `key`, keeping whatever is in memory.
    fn forget_on_disk(&self, key: &K) {
        if !self.persisted.contains(key) {
            return;
        }
        let Some(name) = self.name(key) else {
            return;
        };
        let _guard = self.disk_lock(key);
        self.forget_locked(key, &name);
    }

    /// As [`Self::forget_on_disk`]; the caller holds the key's disk lock.
    fn forget_locked(&self, key: &K, name: &str) {
        if self.persisted.remove(key).is_some() {
            if let Err(e) = self.disk.delete_triple(name) {
                warn!("Cache '{}': failed to delete files of '{}': {}", self.alias, name, e);
            }
        }
    }

    /// Liveness check used by sweeps and counting; reads only the expiry file.
    fn entry_alive(&self, key: &K, now: i64) -> bool {
        match self.memory_expiry(key) {
            Some(expiry) if expiry.is_alive_at(now) => true,
            _ if self.persisted.contains(key) => self.disk_alive(key, now),
            _ => false,
        }
    }

    fn disk_alive(&self, key: &K, now: i64) -> bool {
        let Some(name) = self.name(key) else {
            return false;
        };
        match self.disk.read_expiry(&name) {
            Ok(Some(expiry)) => expiry.is_alive_at(now),
            Ok(None) => false,
            Err(e) => {
                warn!("Cache '{}': unreadable expiry for '{}': {}", self.alias, name, e);
                false
            }
        }
    }

    /// Evicts `key` from both tiers if it is still expired there.
    ///
    /// Writers finish the disk triple under the key's disk lock before they
    /// touch memory, and memory writes put the expiry before the value. The
    /// re-checks here rely on that order so a write landing after the
    /// sweep's liveness check survives. Returns whether anything was removed.
    fn evict_expired(&self, key: &K, now: i64) -> bool {
        let cleared = self
            .expires
            .remove_if(key, |_, expiry| !expiry.is_alive_at(now))
            .is_some();
        if !cleared && self.expires.contains_key(key) {
            return false;
        }
        self.values.remove_if(key, |_, _| !self.expires.contains_key(key));

        if !self.persisted.contains(key) {
            return cleared;
        }
        let Some(name) = self.name(key) else {
            return cleared;
        };

        let _guard = self.disk_lock(key);
        if !self.persisted.contains(key) || self.disk_alive(key, now) {
            return cleared;
        }
        self.forget_locked(key, &name);
        true
    }

    fn known_keys(&self) -> HashSet<K> {
        let mut keys: HashSet<K> = self.expires.iter().map(|e| e.key().clone()).collect();
        keys.extend(self.persisted.iter().map(|key| key.key().clone()));
        keys
    }

    // == Reclaim Expired ==
    /// Evicts every expired key in memory or on disk.
    ///
    /// Keys are visited one after another on the calling thread; parallelism
    /// comes from the scheduler sweeping several caches at once. Returns the
    /// number of keys removed. Does nothing, and stops part way, once the
    /// scheduler has shut down.
    pub fn reclaim_expired(&self) -> usize {
        if !self.scheduler.is_alive() {
            return 0;
        }

        let now = now_millis();
        let mut removed = 0;
        for key in self.known_keys() {
            if !self.scheduler.is_alive() {
                break;
            }
            if !self.entry_alive(&key, now) && self.evict_expired(&key, now) {
                removed += 1;
            }
        }

        self.stats.record_reclaimed(removed);
        removed
    }

    // == Inspection ==
    /// Number of alive entries across memory and disk.
    pub fn len(&self) -> usize {
        let now = now_millis();
        self.known_keys()
            .iter()
            .filter(|key| self.entry_alive(key, now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of entries physically held in memory, expired ones included.
    pub fn stored_len(&self) -> usize {
        self.expires.len().max(self.values.len())
    }

    /// Number of keys with files on disk.
    pub fn persisted_len(&self) -> usize {
        self.persisted.len()
    }

    /// Snapshot of all alive entries. Loads disk-only entries into memory.
    pub fn entries(&self) -> Vec<(K, V)> {
        self.known_keys()
            .into_iter()
            .filter_map(|key| {
                let value = self.load_value(&key)?;
                Some((key, value))
            })
            .collect()
    }

    pub fn for_each<F>(&self, mut action: F)
    where
        F: FnMut(&K, &V),
    {
        for (key, value) in self.entries() {
            action(&key, &value);
        }
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot(self.len())
    }

    /// Canonical directory holding this cache's files.
    pub fn path(&self) -> &Path {
        self.disk.dir()
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }
}

impl<K, V> Cache<K, V> for PersistentCache<K, V>
where
    K: Eq + Hash + Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn insert(&self, key: K, value: V, expiry: Expiry) {
        self.store(key, value, expiry);
    }

    fn has(&self, key: &K) -> bool {
        self.load_expiry(key).is_some()
    }

    fn touch(&self, key: &K, expiry: Expiry) -> bool {
        let exists = self.has(key);
        if exists {
            self.refresh(key, expiry);
        }
        exists
    }

    fn get(&self, key: &K) -> Option<V> {
        let value = self.load_value(key);
        self.stats.record_read(value.is_some());
        value
    }

    fn get_and_touch(&self, key: &K, expiry: Expiry) -> Option<V> {
        let value = self.get(key);
        if value.is_some() {
            self.refresh(key, expiry);
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

        let durable: Vec<K> = self.persisted.iter().map(|key| key.key().clone()).collect();
        for key in durable {
            self.forget_on_disk(&key);
        }
    }

    fn expire_at(&self, key: &K) -> Option<Expiry> {
        self.load_expiry(key)
    }
}

impl<K, V> Durable<K, V> for PersistentCache<K, V>
where
    K: Eq + Hash + Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn persist(&self, key: &K) -> bool {
        match self.get(key) {
            Some(value) => self.pin(key.clone(), value),
            None => false,
        }
    }

    fn persist_value(&self, key: K, value: V) -> bool {
        self.pin(key, value)
    }
}

impl<K, V> Reclaim for PersistentCache<K, V>
where
    K: Eq + Hash + Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn label(&self) -> &str {
        &self.label
    }

    fn reclaim(&self) -> anyhow::Result<usize> {
        Ok(self.reclaim_expired())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::error::CacheError;
    use std::fs;
    use std::thread::sleep;
    use std::time::Duration;
    use tempfile::TempDir;

    fn scheduler(base: &Path) -> Scheduler {
        let config = Config::default()
            .with_reclaim(Duration::from_secs(3600), Duration::from_secs(3600))
            .with_base_path(base);
        Scheduler::new(&config).unwrap()
    }

    fn open(scheduler: &Scheduler, paths: &Arc<PathRegistry>) -> Arc<PersistentCache<u32, String>> {
        PersistentCache::builder(scheduler)
            .alias("unit")
            .paths(paths.clone())
            .build()
            .unwrap()
    }

    fn file_count(cache: &PersistentCache<u32, String>) -> usize {
        fs::read_dir(cache.path()).unwrap().count()
    }

    #[test]
    fn test_default_name_is_stable_hex() {
        let a = default_name(&"user:1".to_string()).unwrap();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(a, default_name(&"user:1".to_string()).unwrap());
        assert_ne!(a, default_name(&"user:2".to_string()).unwrap());
    }

    struct Unsized;

    impl Serialize for Unsized {
        fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
        where
            S: serde::Serializer,
        {
            use serde::ser::SerializeSeq;
            serializer.serialize_seq(None)?.end()
        }
    }

    #[test]
    fn test_default_name_rejects_unencodable_key() {
        assert!(default_name(&Unsized).is_err());
    }

    #[test]
    fn test_set_writes_triple() {
        let temp = TempDir::new().unwrap();
        let scheduler = scheduler(temp.path());
        let paths = PathRegistry::new();
        let cache = open(&scheduler, &paths);

        cache.set(1, "one".to_string());

        assert_eq!(file_count(&cache), 3);
        assert_eq!(cache.persisted_len(), 1);
        assert_eq!(cache.get(&1), Some("one".to_string()));
        assert!(cache.path().ends_with("unit"));
    }

    #[test]
    fn test_zero_ttl_never_touches_disk() {
        let temp = TempDir::new().unwrap();
        let scheduler = scheduler(temp.path());
        let paths = PathRegistry::new();
        let cache = open(&scheduler, &paths);

        cache.set_with_ttl(1, "gone".to_string(), Duration::ZERO);

        assert!(!cache.has(&1));
        assert_eq!(file_count(&cache), 0);
    }

    #[test]
    fn test_expired_entry_purges_files_on_read() {
        let temp = TempDir::new().unwrap();
        let scheduler = scheduler(temp.path());
        let paths = PathRegistry::new();
        let cache = open(&scheduler, &paths);

        cache.set_with_ttl(1, "one".to_string(), Duration::from_millis(30));
        sleep(Duration::from_millis(50));

        assert!(cache.get(&1).is_none());
        assert_eq!(file_count(&cache), 0);
        assert_eq!(cache.persisted_len(), 0);
    }

    #[test]
    fn test_overwrite_rewrites_value_file() {
        let temp = TempDir::new().unwrap();
        let scheduler = scheduler(temp.path());
        let paths = PathRegistry::new();
        let cache = open(&scheduler, &paths);

        cache.set(1, "one".to_string());
        cache.set_with_ttl(1, "uno".to_string(), Duration::from_secs(60));
        drop(cache);

        let cache = open(&scheduler, &paths);
        assert_eq!(cache.get(&1), Some("uno".to_string()));
        assert!(matches!(cache.expire_at(&1), Some(Expiry::At(_))));
    }

    #[test]
    fn test_sliding_refresh_is_durable() {
        let temp = TempDir::new().unwrap();
        let scheduler = scheduler(temp.path());
        let paths = PathRegistry::new();
        let cache = open(&scheduler, &paths);

        cache.set_with_ttl(1, "one".to_string(), Duration::from_millis(300));
        assert!(cache.touch(&1, Expiry::Never));
        drop(cache);

        let cache = open(&scheduler, &paths);
        assert_eq!(cache.expire_at(&1), Some(Expiry::Never));
    }

    #[test]
    fn test_negative_deadline_stays_expired_on_disk() {
        let temp = TempDir::new().unwrap();
        let scheduler = scheduler(temp.path());
        let paths = PathRegistry::new();
        let cache = open(&scheduler, &paths);

        cache.set(1, "a".to_string());
        cache.insert(1, "b".to_string(), Expiry::At(-5));
        cache.set(2, "x".to_string());
        assert!(cache.touch(&2, Expiry::At(-1)));

        // Memory is dead, so both reads fall through to the expire files
        assert!(!cache.has(&1));
        assert!(!cache.has(&2));
        assert_eq!(file_count(&cache), 0);
        drop(cache);

        let cache = open(&scheduler, &paths);
        assert_eq!(cache.get(&1), None);
        assert_eq!(cache.expire_at(&2), None);
        assert_eq!(cache.persisted_len(), 0);
    }

    #[test]
    fn test_negative_deadline_on_disk_survives_restart_as_expired() {
        let temp = TempDir::new().unwrap();
        let scheduler = scheduler(temp.path());
        let paths = PathRegistry::new();
        let cache = open(&scheduler, &paths);

        cache.set(1, "a".to_string());
        cache.insert(1, "b".to_string(), Expiry::At(-5));
        drop(cache);

        let cache = open(&scheduler, &paths);
        assert_eq!(cache.persisted_len(), 1);
        assert!(!cache.has(&1));
        assert_eq!(cache.reclaim_expired(), 0);
        assert_eq!(file_count(&cache), 0);
    }

    #[test]
    fn test_reclaim_racing_writes_keeps_fresh_entries() {
        let temp = TempDir::new().unwrap();
        let scheduler = scheduler(temp.path());
        let paths = PathRegistry::new();
        let cache = open(&scheduler, &paths);

        for _ in 0..10 {
            for key in 0..100 {
                cache.set_with_ttl(key, "old".to_string(), Duration::from_millis(1));
            }
            sleep(Duration::from_millis(5));

            let sweeper = {
                let cache = cache.clone();
                std::thread::spawn(move || cache.reclaim_expired())
            };
            for key in 0..100 {
                cache.set(key, format!("new-{key}"));
            }
            sweeper.join().unwrap();

            for key in 0..100 {
                assert_eq!(cache.get(&key), Some(format!("new-{key}")));
                assert_eq!(cache.expire_at(&key), Some(Expiry::Never));
            }
            assert_eq!(cache.persisted_len(), 100);
            assert_eq!(file_count(&cache), 300);
        }
        drop(cache);

        let cache = open(&scheduler, &paths);
        assert_eq!(cache.len(), 100);
    }

    #[test]
    fn test_corrupt_value_reads_as_miss() {
        let temp = TempDir::new().unwrap();
        let scheduler = scheduler(temp.path());
        let paths = PathRegistry::new();
        let cache = open(&scheduler, &paths);

        cache.set(1, "one".to_string());
        let dir = cache.path().to_path_buf();
        drop(cache);

        fs::write(dir.join(default_name(&1u32).unwrap()), b"not a cache blob").unwrap();

        let cache = open(&scheduler, &paths);
        assert_eq!(cache.persisted_len(), 1);
        assert!(cache.get(&1).is_none());
        assert_eq!(cache.persisted_len(), 0);
        assert_eq!(file_count(&cache), 0);
    }

    #[test]
    fn test_reclaim_sweeps_disk_only_keys() {
        let temp = TempDir::new().unwrap();
        let scheduler = scheduler(temp.path());
        let paths = PathRegistry::new();
        let cache = open(&scheduler, &paths);

        cache.set_with_ttl(1, "short".to_string(), Duration::from_millis(20));
        cache.set(2, "long".to_string());
        drop(cache);

        sleep(Duration::from_millis(40));
        let cache = open(&scheduler, &paths);
        assert_eq!(cache.stored_len(), 0);

        assert_eq!(cache.reclaim_expired(), 1);
        assert_eq!(cache.persisted_len(), 1);
        assert_eq!(file_count(&cache), 3);
        // The sweep does not load survivors into memory
        assert_eq!(cache.stored_len(), 0);
    }

    #[test]
    fn test_reclaim_skipped_after_shutdown() {
        let temp = TempDir::new().unwrap();
        let scheduler = scheduler(temp.path());
        let paths = PathRegistry::new();
        let cache = open(&scheduler, &paths);
        cache.set_with_ttl(1, "short".to_string(), Duration::from_millis(10));
        sleep(Duration::from_millis(30));

        scheduler.shutdown();

        assert_eq!(cache.reclaim_expired(), 0);
        assert_eq!(file_count(&cache), 3);
    }

    #[test]
    fn test_persist_missing_key_returns_false() {
        let temp = TempDir::new().unwrap();
        let scheduler = scheduler(temp.path());
        let paths = PathRegistry::new();
        let cache = open(&scheduler, &paths);

        assert!(!cache.persist(&9));
        assert_eq!(file_count(&cache), 0);
    }

    #[test]
    fn test_open_on_file_fails() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("unit"), b"file").unwrap();
        let scheduler = scheduler(temp.path());

        let result: Result<Arc<PersistentCache<u32, String>>> = PersistentCache::builder(&scheduler)
            .alias("unit")
            .paths(PathRegistry::new())
            .build();

        assert!(matches!(result, Err(CacheError::NotADirectory(_))));
    }

    #[test]
    fn test_entries_include_disk_only_keys() {
        let temp = TempDir::new().unwrap();
        let scheduler = scheduler(temp.path());
        let paths = PathRegistry::new();
        let cache = open(&scheduler, &paths);
        cache.set(1, "one".to_string());
        cache.set(2, "two".to_string());
        drop(cache);

        let cache = open(&scheduler, &paths);
        let mut entries = cache.entries();
        entries.sort();

        assert_eq!(
            entries,
            vec![(1, "one".to_string()), (2, "two".to_string())]
        );
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().disk_loads, 2);
    }
}
