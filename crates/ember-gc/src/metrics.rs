//! Task manager bookkeeping snapshots.

/// Point-in-time snapshot of a [`GcTaskManager`](crate::GcTaskManager)'s
/// bookkeeping, taken under its monitor.
///
/// Counters are monotonic over the manager's lifetime; gauges reflect the
/// instant the snapshot was taken.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcTaskMetrics {
    /// Tasks handed to workers (idle tasks are not counted).
    pub delivered_tasks: u64,
    /// Tasks whose completion was noted (idle tasks are not counted).
    pub completed_tasks: u64,
    /// Barrier tasks drained.
    pub barriers: u64,
    /// Times the queue emptied with no worker busy.
    pub emptied_queue: u64,
    /// Workers currently executing a non-idle task.
    pub busy_workers: u32,
    /// Worker threads created so far.
    pub created_workers: u32,
    /// Workers currently eligible for dispatch.
    pub active_workers: u32,
    /// Workers currently parked on idle tasks.
    pub idle_workers: u32,
    /// Tasks waiting in the shared queue.
    pub queued_tasks: usize,
}

impl GcTaskMetrics {
    /// `true` when every created worker is parked.
    #[must_use]
    pub const fn all_workers_idle(&self) -> bool {
        self.idle_workers == self.created_workers
    }
}
