//! Integration Tests for the Persistent Cache
//!
//! Exercises the disk tier through the public API: restarts, clearing,
//! pinning, directory ownership and concurrent writers.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, sleep};
use std::time::Duration;

use tempfile::TempDir;
use tiered_cache::cache::{PathRegistry, EXPIRE_FILE_SUFFIX, KEY_FILE_SUFFIX};
use tiered_cache::{Cache, CacheError, Config, Durable, Expiry, PersistentCache, Scheduler};

// == Helper Functions ==

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn quiet_scheduler(base: &Path) -> Scheduler {
    let config = Config::default()
        .with_reclaim(Duration::from_secs(3600), Duration::from_secs(3600))
        .with_base_path(base);
    Scheduler::new(&config).unwrap()
}

fn open_users(scheduler: &Scheduler) -> Arc<PersistentCache<String, String>> {
    PersistentCache::builder(scheduler)
        .alias("users")
        .build()
        .unwrap()
}

fn files_in(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

// == Restart Tests ==

#[test]
fn test_entries_survive_restart() {
    init_tracing();
    let temp = TempDir::new().unwrap();
    let scheduler = quiet_scheduler(temp.path());

    let cache = open_users(&scheduler);
    cache.set("alice".to_string(), "admin".to_string());
    cache.set_with_ttl("bob".to_string(), "guest".to_string(), Duration::from_secs(60));
    drop(cache);

    let cache = open_users(&scheduler);
    assert_eq!(cache.persisted_len(), 2);
    assert_eq!(cache.get(&"alice".to_string()), Some("admin".to_string()));
    assert_eq!(cache.get(&"bob".to_string()), Some("guest".to_string()));
    assert_eq!(cache.expire_at(&"alice".to_string()), Some(Expiry::Never));

    let ttl = cache.time_to_live(&"bob".to_string()).unwrap();
    assert!(ttl <= Duration::from_secs(60));
    assert!(ttl > Duration::from_secs(50));
}

#[test]
fn test_file_layout_is_a_triple_per_key() {
    let temp = TempDir::new().unwrap();
    let scheduler = quiet_scheduler(temp.path());

    let cache: Arc<PersistentCache<u64, String>> = PersistentCache::builder(&scheduler)
        .alias("named")
        .namer(|key: &u64| format!("entry-{key}"))
        .build()
        .unwrap();
    cache.set(7, "seven".to_string());

    assert_eq!(
        files_in(cache.path()),
        vec![
            "entry-7".to_string(),
            format!("entry-7{EXPIRE_FILE_SUFFIX}"),
            format!("entry-7{KEY_FILE_SUFFIX}"),
        ]
    );
    assert_eq!(cache.path(), temp.path().join("named").canonicalize().unwrap());
}

#[test]
fn test_orphan_files_are_removed_on_open() {
    let temp = TempDir::new().unwrap();
    let scheduler = quiet_scheduler(temp.path());

    let cache = open_users(&scheduler);
    cache.set("alice".to_string(), "admin".to_string());
    let dir = cache.path().to_path_buf();
    drop(cache);

    fs::write(dir.join("stray"), b"leftover").unwrap();
    fs::write(dir.join(format!("half{KEY_FILE_SUFFIX}")), b"no partners").unwrap();

    let cache = open_users(&scheduler);
    assert_eq!(files_in(&dir).len(), 3);
    assert_eq!(cache.len(), 1);
}

#[test]
fn test_clear_removes_disk_state() {
    let temp = TempDir::new().unwrap();
    let scheduler = quiet_scheduler(temp.path());

    let cache = open_users(&scheduler);
    cache.set("alice".to_string(), "admin".to_string());
    cache.set("bob".to_string(), "guest".to_string());
    cache.clear();

    assert!(files_in(cache.path()).is_empty());
    assert!(cache.is_empty());
    drop(cache);

    let cache = open_users(&scheduler);
    assert_eq!(cache.persisted_len(), 0);
    assert!(!cache.has(&"alice".to_string()));
}

#[test]
fn test_delete_removes_files() {
    let temp = TempDir::new().unwrap();
    let scheduler = quiet_scheduler(temp.path());

    let cache = open_users(&scheduler);
    cache.set("alice".to_string(), "admin".to_string());

    assert_eq!(cache.delete(&"alice".to_string()), Some("admin".to_string()));
    assert_eq!(cache.delete(&"alice".to_string()), None);
    assert!(files_in(cache.path()).is_empty());
}

// == Persist Tests ==

#[test]
fn test_persist_missing_key_writes_nothing() {
    let temp = TempDir::new().unwrap();
    let scheduler = quiet_scheduler(temp.path());

    let cache = open_users(&scheduler);

    assert!(!cache.persist(&"ghost".to_string()));
    assert!(files_in(cache.path()).is_empty());
}

#[test]
fn test_persist_value_outlives_short_ttl() {
    let temp = TempDir::new().unwrap();
    let scheduler = quiet_scheduler(temp.path());

    let cache = open_users(&scheduler);
    cache.set_with_ttl("alice".to_string(), "admin".to_string(), Duration::from_millis(50));
    assert!(cache.persist_value("alice".to_string(), "owner".to_string()));
    drop(cache);

    sleep(Duration::from_millis(80));

    let cache = open_users(&scheduler);
    assert_eq!(cache.get(&"alice".to_string()), Some("owner".to_string()));
    assert_eq!(cache.expire_at(&"alice".to_string()), Some(Expiry::Never));
}

#[test]
fn test_persist_pins_current_value() {
    let temp = TempDir::new().unwrap();
    let scheduler = quiet_scheduler(temp.path());

    let cache = open_users(&scheduler);
    cache.set_with_ttl("bob".to_string(), "guest".to_string(), Duration::from_millis(50));
    assert!(cache.persist(&"bob".to_string()));

    sleep(Duration::from_millis(80));
    assert_eq!(cache.get(&"bob".to_string()), Some("guest".to_string()));
}

// == Directory Ownership Tests ==

#[test]
fn test_second_cache_on_same_path_is_rejected() {
    let temp = TempDir::new().unwrap();
    let scheduler = quiet_scheduler(temp.path());
    let paths = PathRegistry::new();

    let first: Arc<PersistentCache<String, String>> = PersistentCache::builder(&scheduler)
        .alias("shared")
        .paths(paths.clone())
        .build()
        .unwrap();

    let second: Result<Arc<PersistentCache<String, u64>>, CacheError> =
        PersistentCache::builder(&scheduler)
            .alias(" shared ")
            .paths(paths.clone())
            .build();
    assert!(matches!(second, Err(CacheError::PathInUse(_))));

    drop(first);

    let third: Result<Arc<PersistentCache<String, u64>>, CacheError> =
        PersistentCache::builder(&scheduler)
            .alias("shared")
            .paths(paths)
            .build();
    assert!(third.is_ok());
}

#[test]
fn test_global_registry_guards_directories() {
    let temp = TempDir::new().unwrap();
    let scheduler = quiet_scheduler(temp.path());

    let cache = open_users(&scheduler);
    let again: Result<Arc<PersistentCache<String, String>>, CacheError> =
        PersistentCache::open(&scheduler, temp.path(), "users");

    assert!(matches!(again, Err(CacheError::PathInUse(_))));
    assert!(PathRegistry::global().is_bound(cache.path()));
}

// == Concurrency Tests ==

#[test]
fn test_concurrent_writers_on_distinct_keys() {
    let temp = TempDir::new().unwrap();
    let scheduler = quiet_scheduler(temp.path());
    let cache: Arc<PersistentCache<u64, u64>> = PersistentCache::builder(&scheduler)
        .alias("counters")
        .build()
        .unwrap();

    let handles: Vec<_> = (0..8u64)
        .map(|worker| {
            let cache = cache.clone();
            thread::spawn(move || {
                for i in 0..25u64 {
                    let key = worker * 100 + i;
                    cache.set(key, key * 2);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(cache.len(), 200);
    assert_eq!(cache.persisted_len(), 200);
    assert_eq!(files_in(cache.path()).len(), 600);
    assert_eq!(cache.get(&703), Some(1406));
}

// == Expiration Tests ==

#[test]
fn test_sliding_refresh_keeps_entry_alive() {
    let temp = TempDir::new().unwrap();
    let scheduler = quiet_scheduler(temp.path());
    let cache = open_users(&scheduler);
    let key = "session".to_string();

    cache.set_with_ttl(key.clone(), "token".to_string(), Duration::from_millis(150));
    for _ in 0..4 {
        sleep(Duration::from_millis(60));
        assert_eq!(
            cache.get_and_extend(&key, Duration::from_millis(150)),
            Some("token".to_string())
        );
    }

    sleep(Duration::from_millis(250));
    assert!(!cache.has(&key));
    assert!(files_in(cache.path()).is_empty());
}

#[test]
fn test_derived_operations_write_through() {
    let temp = TempDir::new().unwrap();
    let scheduler = quiet_scheduler(temp.path());
    let cache: Arc<PersistentCache<String, u64>> = PersistentCache::builder(&scheduler)
        .alias("derived")
        .build()
        .unwrap();
    let key = "hits".to_string();

    assert_eq!(cache.get_or_compute(key.clone(), || 1), 1);
    assert_eq!(cache.merge(key.clone(), 5, |old, new| old.map(|o| o + new)), Some(6));
    assert_eq!(cache.compute_if_present(key.clone(), |_, v| Some(v * 10)), Some(60));
    drop(cache);

    let cache: Arc<PersistentCache<String, u64>> = PersistentCache::builder(&scheduler)
        .alias("derived")
        .build()
        .unwrap();
    assert_eq!(cache.get(&key), Some(60));
    assert_eq!(cache.compute_if_present(key.clone(), |_, _| None), None);
    assert!(!cache.has(&key));
}
