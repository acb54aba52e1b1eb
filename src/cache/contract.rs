//! Cache Contract
//!
//! The operations every cache variant implements, plus convenience operations
//! layered purely on top of them.
//!
//! Each primitive call is atomic on its own. The provided read-modify-write
//! helpers (`put_if_absent`, `compute*`, `merge`, ...) are sequences of
//! primitive calls and are NOT atomic: two callers racing on the same key can
//! both compute a value, and the later `set` wins.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::cache::Expiry;

// == Cache ==
/// Key-value cache with time-to-live semantics.
///
/// Sliding expiration is available through [`Cache::touch`] and
/// [`Cache::get_and_touch`]: on a hit they move the deadline to the supplied
/// expiry. Adapters over third-party engines must honor the same semantics.
pub trait Cache<K, V> {
    /// Upserts `key` with an absolute expiry.
    fn insert(&self, key: K, value: V, expiry: Expiry);

    /// Returns true iff an alive entry exists. No side effects.
    fn has(&self, key: &K) -> bool;

    /// Like [`Cache::has`], and on a hit replaces the expiry.
    ///
    /// Returns whether the entry existed before the refresh.
    fn touch(&self, key: &K, expiry: Expiry) -> bool;

    /// Returns the value if the entry is alive.
    fn get(&self, key: &K) -> Option<V>;

    /// Like [`Cache::get`], and on a hit replaces the expiry.
    fn get_and_touch(&self, key: &K, expiry: Expiry) -> Option<V>;

    /// Removes the entry and returns its value if it was alive.
    fn delete(&self, key: &K) -> Option<V>;

    /// Removes the entry.
    fn remove(&self, key: &K);

    /// Removes every entry, including durable state.
    fn clear(&self);

    /// Absolute expiry of an alive entry, `None` if absent or expired.
    fn expire_at(&self, key: &K) -> Option<Expiry>;

    // == Provided: TTL conveniences ==

    /// Upserts an entry that never expires.
    fn set(&self, key: K, value: V) {
        self.insert(key, value, Expiry::Never);
    }

    /// Upserts an entry that expires `ttl` from now. A zero TTL stores an
    /// entry that is already expired.
    fn set_with_ttl(&self, key: K, value: V, ttl: Duration) {
        self.insert(key, value, Expiry::after(ttl));
    }

    /// Upserts an entry that expires at `deadline`.
    fn set_at(&self, key: K, value: V, deadline: DateTime<Utc>) {
        self.insert(key, value, Expiry::at(deadline));
    }

    /// Existence check that pushes the deadline to `ttl` from now on a hit.
    fn has_and_extend(&self, key: &K, ttl: Duration) -> bool {
        self.touch(key, Expiry::after(ttl))
    }

    /// Read that pushes the deadline to `ttl` from now on a hit.
    fn get_and_extend(&self, key: &K, ttl: Duration) -> Option<V> {
        self.get_and_touch(key, Expiry::after(ttl))
    }

    /// Time left for an alive entry.
    ///
    /// # Returns
    /// - `None` if the entry is absent or expired
    /// - `Some(Duration::MAX)` if the entry never expires
    /// - `Some(remaining)` otherwise
    fn time_to_live(&self, key: &K) -> Option<Duration> {
        self.expire_at(key).map(Expiry::remaining)
    }

    // == Provided: derived operations ==

    /// Returns the existing value, or stores `value` (never expiring) and returns it.
    fn put_if_absent(&self, key: K, value: V) -> V
    where
        Self: Sized,
        V: Clone,
    {
        match self.get(&key) {
            Some(existing) => existing,
            None => {
                self.set(key, value.clone());
                value
            }
        }
    }

    /// As [`Cache::put_if_absent`], storing with `ttl`.
    fn put_if_absent_with_ttl(&self, key: K, value: V, ttl: Duration) -> V
    where
        Self: Sized,
        V: Clone,
    {
        match self.get(&key) {
            Some(existing) => existing,
            None => {
                self.set_with_ttl(key, value.clone(), ttl);
                value
            }
        }
    }

    fn get_or_default(&self, key: &K, default: V) -> V
    where
        Self: Sized,
    {
        self.get(key).unwrap_or(default)
    }

    /// Returns the cached value, or computes, stores (never expiring) and returns one.
    fn get_or_compute<F>(&self, key: K, supplier: F) -> V
    where
        Self: Sized,
        V: Clone,
        F: FnOnce() -> V,
    {
        if let Some(value) = self.get(&key) {
            return value;
        }
        let value = supplier();
        self.set(key, value.clone());
        value
    }

    /// As [`Cache::get_or_compute`], storing with `ttl`.
    fn get_or_compute_with_ttl<F>(&self, key: K, supplier: F, ttl: Duration) -> V
    where
        Self: Sized,
        V: Clone,
        F: FnOnce() -> V,
    {
        if let Some(value) = self.get(&key) {
            return value;
        }
        let value = supplier();
        self.set_with_ttl(key, value.clone(), ttl);
        value
    }

    /// On a miss computes `mapping(&key)` and stores it through `put_if_absent`.
    ///
    /// If another caller stored a value in the meantime, that value is
    /// returned and the computed one is discarded.
    fn compute_if_absent<F>(&self, key: K, mapping: F) -> Option<V>
    where
        Self: Sized,
        V: Clone,
        F: FnOnce(&K) -> Option<V>,
    {
        if let Some(value) = self.get(&key) {
            return Some(value);
        }
        let computed = mapping(&key)?;
        Some(self.put_if_absent(key, computed))
    }

    /// As [`Cache::compute_if_absent`], storing with `ttl`.
    fn compute_if_absent_with_ttl<F>(&self, key: K, mapping: F, ttl: Duration) -> Option<V>
    where
        Self: Sized,
        V: Clone,
        F: FnOnce(&K) -> Option<V>,
    {
        if let Some(value) = self.get(&key) {
            return Some(value);
        }
        let computed = mapping(&key)?;
        Some(self.put_if_absent_with_ttl(key, computed, ttl))
    }

    /// On a hit computes `remapping(&key, old)`. A `None` result removes the
    /// entry, otherwise the new value is stored and returned. Misses return `None`.
    fn compute_if_present<F>(&self, key: K, remapping: F) -> Option<V>
    where
        Self: Sized,
        V: Clone,
        F: FnOnce(&K, V) -> Option<V>,
    {
        let old = self.get(&key)?;
        match remapping(&key, old) {
            Some(new_value) => {
                self.set(key, new_value.clone());
                Some(new_value)
            }
            None => {
                self.remove(&key);
                None
            }
        }
    }

    /// Calls `remapping(&key, current)` and stores a `Some` result.
    ///
    /// Always returns the computed result. A `None` result leaves the entry
    /// untouched; it is not removed.
    fn compute<F>(&self, key: K, remapping: F) -> Option<V>
    where
        Self: Sized,
        V: Clone,
        F: FnOnce(&K, Option<V>) -> Option<V>,
    {
        let current = self.get(&key);
        let computed = remapping(&key, current);
        if let Some(new_value) = &computed {
            self.set(key, new_value.clone());
        }
        computed
    }

    /// Stores `remapping(existing, value)` when it is `Some`, returning it.
    fn merge<F>(&self, key: K, value: V, remapping: F) -> Option<V>
    where
        Self: Sized,
        V: Clone,
        F: FnOnce(Option<V>, V) -> Option<V>,
    {
        let existing = self.get(&key);
        let merged = remapping(existing, value);
        if let Some(new_value) = &merged {
            self.set(key, new_value.clone());
        }
        merged
    }
}

// == Durable ==
/// A cache whose entries can be pinned to durable storage.
pub trait Durable<K, V>: Cache<K, V> {
    /// Rewrites the current value durably with no expiry.
    ///
    /// Returns false, without touching disk, if the key has no current value.
    fn persist(&self, key: &K) -> bool;

    /// Stores `value` durably with no expiry.
    fn persist_value(&self, key: K, value: V) -> bool;
}
