//! Expiry Module
//!
//! Clock helpers and the absolute expiry type shared by every cache variant.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

// == Expiry ==
/// Absolute expiry of a cache entry.
///
/// Storage is always absolute. TTL inputs are converted once, at the call
/// boundary, through [`Expiry::after`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Expiry {
    /// The entry never expires
    Never,
    /// The entry expires at this Unix timestamp in milliseconds
    At(i64),
}

impl Expiry {
    // == Constructors ==
    /// Expiry `ttl` from now.
    ///
    /// Precision below one millisecond is truncated, so a zero (or sub-millisecond)
    /// TTL yields an entry that is already expired.
    pub fn after(ttl: Duration) -> Self {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        Expiry::At(now_millis().saturating_add(ttl_ms))
    }

    /// Expiry at an absolute instant.
    ///
    /// Instants before the Unix epoch clamp to `At(0)` so they stay expired
    /// instead of colliding with the never-expire sentinel on disk.
    pub fn at(instant: DateTime<Utc>) -> Self {
        Expiry::At(instant.timestamp_millis().max(0))
    }

    /// Decodes the on-disk representation, where any negative value means never.
    pub fn from_millis(raw: i64) -> Self {
        if raw < 0 {
            Expiry::Never
        } else {
            Expiry::At(raw)
        }
    }

    /// Encodes to the on-disk representation (`-1` for never).
    ///
    /// Deadlines before the epoch encode as `0`, so a dead entry stays dead
    /// after a round trip through disk.
    pub fn as_millis(self) -> i64 {
        match self {
            Expiry::Never => -1,
            Expiry::At(ms) => ms.max(0),
        }
    }

    // == Liveness ==
    /// Returns true if the entry is still alive at `now` (Unix milliseconds).
    pub fn is_alive_at(self, now: i64) -> bool {
        match self {
            Expiry::Never => true,
            Expiry::At(ms) => now < ms,
        }
    }

    /// Returns true if the entry is still alive right now.
    pub fn is_alive(self) -> bool {
        self.is_alive_at(now_millis())
    }

    // == Remaining ==
    /// Time left before expiry.
    ///
    /// # Returns
    /// - `Duration::MAX` for entries that never expire
    /// - `Duration::ZERO` once the deadline has passed
    pub fn remaining(self) -> Duration {
        match self {
            Expiry::Never => Duration::MAX,
            Expiry::At(ms) => {
                let left = ms.saturating_sub(now_millis());
                Duration::from_millis(left.max(0) as u64)
            }
        }
    }

    /// Deadline as a timestamp, `None` for entries that never expire.
    pub fn deadline(self) -> Option<DateTime<Utc>> {
        match self {
            Expiry::Never => None,
            Expiry::At(ms) => Utc.timestamp_millis_opt(ms).single(),
        }
    }
}

// == Utility Functions ==
/// Returns current Unix timestamp in milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Liveness test used by both lazy reads and the background sweep.
///
/// An absent expiry means the entry does not exist.
pub fn is_alive(expiry: Option<Expiry>) -> bool {
    expiry.is_some_and(Expiry::is_alive)
}
