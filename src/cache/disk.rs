//! Disk Store Module
//!
//! File layout of a persistent cache directory. Every durable key `name`
//! owns three files: `name` (value), `name_key` (key) and `name_expire`
//! (expiry). Writes go through a temp file and a rename.

use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cache::codec::{self, BlobKind};
use crate::cache::Expiry;
use crate::error::{CacheError, Result};

pub(crate) const SUFFIX_KEY: &str = "_key";
pub(crate) const SUFFIX_EXPIRE: &str = "_expire";
const TEMP_SUFFIX: &str = ".tmp";

// == Disk Store ==
#[derive(Debug)]
pub(crate) struct DiskStore {
    dir: PathBuf,
}

impl DiskStore {
    // == Open ==
    /// Creates the directory if needed and resolves it to a canonical path.
    pub(crate) fn open(dir: &Path) -> Result<Self> {
        if !dir.exists() {
            fs::create_dir_all(dir).map_err(|source| CacheError::CreateDir {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        if !dir.is_dir() {
            return Err(CacheError::NotADirectory(dir.to_path_buf()));
        }

        let dir = fs::canonicalize(dir).map_err(|e| CacheError::io(dir, e))?;
        Ok(Self { dir })
    }

    pub(crate) fn dir(&self) -> &Path {
        &self.dir
    }

    fn value_path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    fn key_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}{SUFFIX_KEY}"))
    }

    fn expire_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}{SUFFIX_EXPIRE}"))
    }

    // == Writes ==
    pub(crate) fn write_value<V: Serialize>(&self, name: &str, value: &V) -> Result<()> {
        let blob = codec::encode(BlobKind::Value, value)?;
        self.write_atomic(&self.value_path(name), &blob)
    }

    pub(crate) fn write_expiry(&self, name: &str, expiry: Expiry) -> Result<()> {
        let blob = codec::encode_expiry(expiry)?;
        self.write_atomic(&self.expire_path(name), &blob)
    }

    /// Writes all three files. The key file goes last, so a crash leaves an
    /// incomplete triple that the next scan discards.
    pub(crate) fn write_triple<K: Serialize, V: Serialize>(
        &self,
        name: &str,
        key: &K,
        value: &V,
        expiry: Expiry,
    ) -> Result<()> {
        let key_blob = codec::encode(BlobKind::Key, key)?;
        self.write_value(name, value)?;
        self.write_expiry(name, expiry)?;
        self.write_atomic(&self.key_path(name), &key_blob)
    }

    fn write_atomic(&self, path: &Path, blob: &[u8]) -> Result<()> {
        let temp = self
            .dir
            .join(format!(".{}{}", Uuid::new_v4().simple(), TEMP_SUFFIX));
        fs::write(&temp, blob).map_err(|e| CacheError::io(&temp, e))?;

        if let Err(e) = fs::rename(&temp, path) {
            let _ = fs::remove_file(&temp);
            return Err(CacheError::io(path, e));
        }
        Ok(())
    }

    // == Reads ==
    /// Reads a value blob. `Ok(None)` if the file does not exist.
    pub(crate) fn read_value<V: DeserializeOwned>(&self, name: &str) -> Result<Option<V>> {
        self.read_blob(&self.value_path(name))?
            .map(|blob| codec::decode(BlobKind::Value, &blob).map_err(CacheError::from))
            .transpose()
    }

    pub(crate) fn read_key<K: DeserializeOwned>(&self, name: &str) -> Result<Option<K>> {
        self.read_blob(&self.key_path(name))?
            .map(|blob| codec::decode(BlobKind::Key, &blob).map_err(CacheError::from))
            .transpose()
    }

    pub(crate) fn read_expiry(&self, name: &str) -> Result<Option<Expiry>> {
        self.read_blob(&self.expire_path(name))?
            .map(|blob| codec::decode_expiry(&blob).map_err(CacheError::from))
            .transpose()
    }

    fn read_blob(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        match fs::read(path) {
            Ok(blob) => Ok(Some(blob)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CacheError::io(path, e)),
        }
    }

    // == Delete ==
    /// Deletes all three files of `name`. Missing files are not an error.
    pub(crate) fn delete_triple(&self, name: &str) -> Result<()> {
        let mut first_error = None;
        for path in [
            self.key_path(name),
            self.value_path(name),
            self.expire_path(name),
        ] {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    first_error.get_or_insert(CacheError::io(path, e));
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    // == Scan ==
    /// Lists the keys of every complete triple in the directory.
    ///
    /// Values and expiries are not read. Files that are not part of a
    /// complete triple, triples whose key does not decode, triples stored
    /// under a name `namer` no longer produces, and leftover temp files are
    /// deleted.
    pub(crate) fn scan<K, F>(&self, namer: F) -> Vec<K>
    where
        K: DeserializeOwned,
        F: Fn(&K) -> Option<String>,
    {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Failed to scan cache directory {:?}: {}", self.dir, e);
                return Vec::new();
            }
        };

        let names: HashSet<String> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_ok_and(|t| t.is_file()))
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect();

        let mut claimed = HashSet::new();
        let mut keys = Vec::new();
        for name in &names {
            if name.ends_with(TEMP_SUFFIX) {
                continue;
            }
            let key_name = format!("{name}{SUFFIX_KEY}");
            let expire_name = format!("{name}{SUFFIX_EXPIRE}");
            if !names.contains(&key_name) || !names.contains(&expire_name) {
                continue;
            }

            match self.read_key::<K>(name) {
                Ok(Some(key)) if namer(&key).as_deref() == Some(name.as_str()) => {
                    keys.push(key);
                    claimed.insert(name.clone());
                    claimed.insert(key_name);
                    claimed.insert(expire_name);
                }
                Ok(Some(_)) => debug!("Discarding cache triple '{}' stored under a stale name", name),
                Ok(None) => {}
                Err(e) => warn!("Discarding unreadable cache triple '{}': {}", name, e),
            }
        }

        for orphan in names.difference(&claimed) {
            let path = self.dir.join(orphan);
            match fs::remove_file(&path) {
                Ok(()) => debug!("Removed orphaned cache file {:?}", path),
                Err(e) => warn!("Failed to remove orphaned cache file {:?}: {}", path, e),
            }
        }

        keys
    }
}
