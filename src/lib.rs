//! Tiered Cache - TTL key-value caches with an optional disk tier
//!
//! Provides an in-memory cache and a write-through persistent cache sharing
//! one contract, swept of expired entries by a background scheduler.
//!
//! ```no_run
//! use std::time::Duration;
//! use tiered_cache::{Cache, Config, MemoryCache, PersistentCache, Scheduler};
//!
//! # fn main() -> tiered_cache::error::Result<()> {
//! let scheduler = Scheduler::new(&Config::from_env())?;
//!
//! let sessions = MemoryCache::new(&scheduler);
//! sessions.set_with_ttl("token".to_string(), 42u64, Duration::from_secs(30));
//!
//! let users: std::sync::Arc<PersistentCache<u64, String>> =
//!     PersistentCache::builder(&scheduler).alias("users").build()?;
//! users.set(1, "alice".to_string());
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod tasks;

pub use cache::{Cache, Durable, Expiry, MemoryCache, PersistentCache};
pub use config::Config;
pub use error::{CacheError, Result};
pub use tasks::{Reclaim, Scheduler, SchedulerHandle};
