//! Background Tasks Module
//!
//! Contains the periodic work that runs alongside the caches.
//!
//! # Tasks
//! - Reclaim: sweeps expired entries out of every registered cache

mod reclaim;

pub use reclaim::{Reclaim, Scheduler, SchedulerHandle, SweepReport};
