//! Error types for the cache crate
//!
//! Provides unified error handling using thiserror.

use std::path::PathBuf;

use thiserror::Error;

use crate::cache::CodecError;

// == Cache Error Enum ==
/// Unified error type for the cache crate.
///
/// Only construction surfaces these to callers. Failures hit while serving
/// reads, writes and sweeps are logged and degrade to a cache miss.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Cache directory could not be created
    #[error("Failed to create cache directory '{path}': {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Cache path exists but is not a directory
    #[error("Cache path is not a directory: {0}")]
    NotADirectory(PathBuf),

    /// Another live cache already owns the directory
    #[error("Cache directory already in use: {0}")]
    PathInUse(PathBuf),

    /// File operation on the disk tier failed
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Blob could not be encoded or decoded
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Reclaim scheduler could not be started
    #[error("Scheduler error: {0}")]
    Scheduler(String),
}

impl CacheError {
    /// Wraps an I/O error with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CacheError::Io {
            path: path.into(),
            source,
        }
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache crate.
pub type Result<T> = std::result::Result<T, CacheError>;
