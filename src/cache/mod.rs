//! Cache Module
//!
//! TTL caches: a memory-only variant and a variant backed by files on disk,
//! both implementing the shared [`Cache`] contract.

mod codec;
mod contract;
mod disk;
mod expiry;
mod memory;
mod paths;
mod persistent;
mod stats;


// Re-export public types
pub use codec::{BlobKind, CodecError};
pub use contract::{Cache, Durable};
pub use expiry::{is_alive, now_millis, Expiry};
pub use memory::MemoryCache;
pub use paths::{PathLease, PathOwner, PathRegistry};
pub use persistent::{default_name, Namer, PersistentCache, PersistentCacheBuilder};
pub use stats::CacheStats;

// == Public Constants ==
/// Suffix of the file holding a persisted key
pub const KEY_FILE_SUFFIX: &str = disk::SUFFIX_KEY;

/// Suffix of the file holding a persisted expiry
pub const EXPIRE_FILE_SUFFIX: &str = disk::SUFFIX_EXPIRE;
