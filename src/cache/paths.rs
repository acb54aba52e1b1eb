//! Path Registry
//!
//! Tracks which directories are bound to a live persistent cache so two
//! instances never write into the same directory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{CacheError, Result};

// == Path Owner ==
/// The cache instance currently bound to a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathOwner {
    /// Registry-unique instance id
    pub id: u64,
    /// Alias the owning cache was opened with
    pub alias: String,
}

// == Path Registry ==
#[derive(Debug, Default)]
pub struct PathRegistry {
    bound: Mutex<HashMap<PathBuf, PathOwner>>,
    next_id: AtomicU64,
}

impl PathRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Process-wide registry used by persistent caches unless another is injected.
    pub fn global() -> Arc<Self> {
        static GLOBAL: OnceLock<Arc<PathRegistry>> = OnceLock::new();
        GLOBAL.get_or_init(PathRegistry::new).clone()
    }

    // == Acquire ==
    /// Binds `path` to a new owner.
    ///
    /// The binding lasts until the returned lease is dropped. Callers should
    /// pass a canonical path so aliases of one directory collide.
    ///
    /// # Errors
    /// `CacheError::PathInUse` if the path is already bound.
    pub fn acquire(self: &Arc<Self>, path: &Path, alias: &str) -> Result<PathLease> {
        let mut bound = self.bound.lock();
        if bound.contains_key(path) {
            return Err(CacheError::PathInUse(path.to_path_buf()));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        bound.insert(
            path.to_path_buf(),
            PathOwner {
                id,
                alias: alias.to_string(),
            },
        );
        debug!("Bound cache directory {:?} to instance {}", path, id);

        Ok(PathLease {
            registry: Arc::clone(self),
            path: path.to_path_buf(),
            id,
        })
    }

    pub fn owner(&self, path: &Path) -> Option<PathOwner> {
        self.bound.lock().get(path).cloned()
    }

    pub fn is_bound(&self, path: &Path) -> bool {
        self.bound.lock().contains_key(path)
    }

    /// Number of bound directories.
    pub fn len(&self) -> usize {
        self.bound.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn release(&self, path: &Path, id: u64) {
        let mut bound = self.bound.lock();
        if bound.get(path).is_some_and(|owner| owner.id == id) {
            bound.remove(path);
            debug!("Released cache directory {:?} from instance {}", path, id);
        }
    }
}

// == Path Lease ==
/// Ownership of a bound directory. Dropping it releases the binding.
#[derive(Debug)]
pub struct PathLease {
    registry: Arc<PathRegistry>,
    path: PathBuf,
    id: u64,
}

impl PathLease {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for PathLease {
    fn drop(&mut self) {
        self.registry.release(&self.path, self.id);
    }
}
