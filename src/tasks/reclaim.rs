//! Reclaim Scheduler
//!
//! Background timer that periodically asks every registered cache to evict
//! its expired entries.
//!
//! The scheduler owns a small dedicated tokio runtime: one worker drives the
//! timer and a blocking pool, capped at `Config::reclaim_workers`, runs the
//! per-cache sweeps in parallel. Caches are held by `Weak` reference, so
//! registering never keeps a cache alive.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::runtime::{Builder, Runtime};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{CacheError, Result};

/// Stand-in first deadline for delays beyond what `Instant` can hold.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 3600);

// == Reclaim ==
/// A cache that can discard its own expired entries.
pub trait Reclaim: Send + Sync {
    /// Short name used in logs.
    fn label(&self) -> &str;

    /// Evicts expired entries, returning how many were removed.
    fn reclaim(&self) -> anyhow::Result<usize>;
}

// == Sweep Report ==
/// Outcome of one pass over all registered caches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Caches that were asked to reclaim
    pub swept: usize,
    /// Entries evicted across all caches
    pub reclaimed: usize,
    /// Caches whose sweep returned an error or panicked
    pub failed: usize,
}

struct Registry {
    caches: RwLock<Vec<Weak<dyn Reclaim>>>,
    alive: AtomicBool,
}

// == Scheduler Handle ==
/// Cloneable view of a scheduler, held by every cache it sweeps.
#[derive(Clone)]
pub struct SchedulerHandle {
    registry: Arc<Registry>,
}

impl SchedulerHandle {
    fn new() -> Self {
        Self {
            registry: Arc::new(Registry {
                caches: RwLock::new(Vec::new()),
                alive: AtomicBool::new(true),
            }),
        }
    }

    /// False once the scheduler has shut down. Sweeps check this to avoid
    /// disk I/O while the application is tearing down.
    pub fn is_alive(&self) -> bool {
        self.registry.alive.load(Ordering::Acquire)
    }

    /// Adds a cache to the sweep set.
    pub fn register(&self, cache: Weak<dyn Reclaim>) {
        self.registry.caches.write().push(cache);
    }

    /// Number of registered caches that are still alive.
    pub fn registered(&self) -> usize {
        self.registry
            .caches
            .read()
            .iter()
            .filter(|cache| cache.strong_count() > 0)
            .count()
    }

    fn live_caches(&self) -> Vec<Arc<dyn Reclaim>> {
        let mut caches = self.registry.caches.write();
        caches.retain(|cache| cache.strong_count() > 0);
        caches.iter().filter_map(Weak::upgrade).collect()
    }

    /// Sweeps every registered cache on the calling thread.
    ///
    /// A cache that errors or panics is counted in `failed` and the others are
    /// still swept.
    pub fn sweep_now(&self) -> SweepReport {
        if !self.is_alive() {
            return SweepReport::default();
        }

        let caches = self.live_caches();
        let mut report = SweepReport {
            swept: caches.len(),
            ..SweepReport::default()
        };

        for cache in caches {
            match catch_unwind(AssertUnwindSafe(|| cache.reclaim())) {
                Ok(Ok(count)) => report.reclaimed += count,
                Ok(Err(err)) => {
                    report.failed += 1;
                    warn!(cache = cache.label(), error = %err, "Cache reclaim failed");
                }
                Err(_) => {
                    report.failed += 1;
                    warn!(cache = cache.label(), "Cache reclaim panicked");
                }
            }
        }

        report
    }

    async fn sweep_parallel(&self) -> SweepReport {
        let caches = self.live_caches();
        let mut report = SweepReport {
            swept: caches.len(),
            ..SweepReport::default()
        };

        let mut tasks = JoinSet::new();
        for cache in caches {
            tasks.spawn_blocking(move || {
                let outcome = cache.reclaim();
                (cache.label().to_string(), outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(count))) => report.reclaimed += count,
                Ok((label, Err(err))) => {
                    report.failed += 1;
                    warn!(cache = %label, error = %err, "Cache reclaim failed");
                }
                Err(err) => {
                    report.failed += 1;
                    warn!(error = %err, "Cache reclaim task did not complete");
                }
            }
        }

        report
    }
}

// == Scheduler ==
/// Owns the periodic sweep task and the registry of caches it visits.
///
/// Delay and period are fixed at construction. Dropping the scheduler (or
/// calling [`Scheduler::shutdown`]) flips the liveness flag and stops the timer.
pub struct Scheduler {
    handle: SchedulerHandle,
    config: Config,
    runtime: Mutex<Option<Runtime>>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    // == Constructor ==
    /// Starts the reclaim timer.
    ///
    /// The first sweep runs after `config.reclaim_delay()`, then every
    /// `config.reclaim_period()`.
    pub fn new(config: &Config) -> Result<Self> {
        let workers = config.reclaim_workers.max(1);
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(workers)
            .thread_name("cache-reclaim")
            .enable_time()
            .build()
            .map_err(|e| CacheError::Scheduler(e.to_string()))?;

        let handle = SchedulerHandle::new();
        let delay = config.reclaim_delay();
        let period = config.reclaim_period();

        let registry = handle.clone();
        let ticker = runtime.spawn(async move {
            let now = tokio::time::Instant::now();
            // Delays too far out to represent never fire
            let start = now.checked_add(delay).unwrap_or_else(|| now + FAR_FUTURE);
            let mut interval = tokio::time::interval_at(start, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                interval.tick().await;
                if !registry.is_alive() {
                    break;
                }

                let report = registry.sweep_parallel().await;
                if report.reclaimed > 0 || report.failed > 0 {
                    info!(
                        "Reclaim: removed {} expired entries across {} caches ({} failed)",
                        report.reclaimed, report.swept, report.failed
                    );
                } else {
                    debug!("Reclaim: no expired entries in {} caches", report.swept);
                }
            }
        });

        info!(
            "Reclaim scheduler started: delay={}ms, period={}ms, workers={}",
            config.reclaim_delay_ms, config.reclaim_period_ms, workers
        );

        Ok(Self {
            handle,
            config: config.clone(),
            runtime: Mutex::new(Some(runtime)),
            ticker: Mutex::new(Some(ticker)),
        })
    }

    pub fn handle(&self) -> SchedulerHandle {
        self.handle.clone()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_alive(&self) -> bool {
        self.handle.is_alive()
    }

    /// Sweeps all registered caches immediately on the calling thread.
    pub fn sweep_now(&self) -> SweepReport {
        self.handle.sweep_now()
    }

    // == Shutdown ==
    /// Stops the timer and marks the scheduler dead. Idempotent.
    ///
    /// Sweeps already running notice the flag and stop early; they are not
    /// waited for.
    pub fn shutdown(&self) {
        let was_alive = self.handle.registry.alive.swap(false, Ordering::AcqRel);

        if let Some(ticker) = self.ticker.lock().take() {
            ticker.abort();
        }
        if let Some(runtime) = self.runtime.lock().take() {
            // Safe to call from inside another runtime, unlike dropping it
            runtime.shutdown_background();
        }

        if was_alive {
            info!("Reclaim scheduler stopped");
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
