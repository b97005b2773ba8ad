//! Task manager configuration.
//!
//! All knobs are construction-time parameters with defaults suited to a
//! machine-sized gang. Build a config with struct-update syntax:
//!
//! ```
//! use ember_gc::GcTaskManagerConfig;
//!
//! let config = GcTaskManagerConfig {
//!     workers: 4,
//!     affinity_dispatch: true,
//!     ..Default::default()
//! };
//! assert_eq!(config.workers, 4);
//! ```

use std::num::NonZeroUsize;

/// Computes the desired number of active workers.
///
/// Arguments are the configured gang size, the currently active count, and a
/// load signal (typically the number of live application threads). The
/// result is clamped to `1..=workers` by the manager.
pub type WorkerPolicy = fn(workers: u32, active_workers: u32, live_threads: u32) -> u32;

/// The default worker policy: scale the gang with mutator load.
///
/// Requests one worker per live application thread, never fewer than one
/// and never more than the configured gang size.
#[must_use]
pub fn default_worker_policy(workers: u32, _active_workers: u32, live_threads: u32) -> u32 {
    live_threads.clamp(1, workers)
}

/// Get the number of CPUs available to the process.
#[must_use]
pub fn available_parallelism() -> u32 {
    let cpus = std::thread::available_parallelism().map_or(1, NonZeroUsize::get);
    u32::try_from(cpus).unwrap_or(u32::MAX)
}

/// Configuration for a [`GcTaskManager`](crate::GcTaskManager).
#[derive(Debug, Clone, Copy)]
pub struct GcTaskManagerConfig {
    /// Size of the worker gang.
    ///
    /// Worker threads are created lazily up to this count and live until
    /// the manager shuts down.
    ///
    /// Default: [`available_parallelism()`]
    pub workers: u32,

    /// Prefer handing each worker tasks whose affinity names it.
    ///
    /// When enabled, dequeues scan for an affinity match (bounded by
    /// barrier tasks) before falling back to the oldest task. The hint is
    /// soft; it never delays a task indefinitely.
    ///
    /// Default: `false`
    pub affinity_dispatch: bool,

    /// Bind each worker thread to a CPU.
    ///
    /// Workers are distributed round-robin over the cores the OS reports.
    /// If the OS declines to enumerate cores, all workers run unpinned.
    ///
    /// Default: `false`
    pub bind_workers_to_cpus: bool,

    /// Vary the number of active workers between collections.
    ///
    /// When enabled the gang starts with a single active worker and grows
    /// on demand via [`set_active_gang`](crate::GcTaskManager::set_active_gang);
    /// surplus workers are parked with idle tasks. When disabled every
    /// configured worker is created up front and stays active.
    ///
    /// Default: `false`
    pub dynamic_workers: bool,

    /// Policy computing the active worker count from load.
    ///
    /// Only consulted by [`set_active_gang`](crate::GcTaskManager::set_active_gang).
    ///
    /// Default: [`default_worker_policy`]
    pub worker_policy: WorkerPolicy,
}

impl Default for GcTaskManagerConfig {
    fn default() -> Self {
        Self {
            workers: available_parallelism(),
            affinity_dispatch: false,
            bind_workers_to_cpus: false,
            dynamic_workers: false,
            worker_policy: default_worker_policy,
        }
    }
}
