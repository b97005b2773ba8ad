//! The unit of GC work and its distinguished kinds.
//!
//! Tasks circulate as `Arc<dyn GcTask>`: the queue's nodes are single-owner,
//! and the `Arc` lets a submitter keep hold of a barrier task while a worker
//! runs it. A worker drops its reference after the task completes; whichever
//! side holds the last reference frees the task.

use tracing::trace;

use crate::gc_id::GcId;
use crate::manager::GcTaskManager;
use crate::sync::WaitHelper;

// ============================================================================
// Core trait
// ============================================================================

/// A unit of work dispatched by the [`GcTaskManager`].
///
/// Implementations provide [`do_it`](Self::do_it), the body of the work, and
/// may override the metadata accessors: the [`kind`](Self::kind) the manager
/// dispatches on, a soft [`affinity`](Self::affinity) hint naming a
/// preferred worker, and the [`gc_id`](Self::gc_id) of the collection the
/// task belongs to (used for log correlation only).
///
/// # Examples
///
/// ```
/// use ember_gc::{GcTask, GcTaskManager};
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
///
/// struct ScanRegion {
///     scanned: Arc<AtomicUsize>,
/// }
///
/// impl GcTask for ScanRegion {
///     fn do_it(&self, _manager: &GcTaskManager, _which: u32) {
///         self.scanned.fetch_add(1, Ordering::Relaxed);
///     }
/// }
/// ```
pub trait GcTask: Send + Sync {
    /// The task's kind; drives the manager's dispatch special cases.
    fn kind(&self) -> TaskKind {
        TaskKind::Ordinary
    }

    /// Preferred worker index, or `None` for "any worker".
    ///
    /// This is a soft dispatching hint: the affinity-preferring dequeue may
    /// honor it, but barriers and fallbacks can hand the task to any worker.
    fn affinity(&self) -> Option<u32> {
        None
    }

    /// Id of the collection this task belongs to.
    fn gc_id(&self) -> GcId {
        GcId::UNDEFINED
    }

    /// Short name for log events.
    fn name(&self) -> &'static str {
        self.kind().as_str()
    }

    /// Perform the work on worker `which`.
    fn do_it(&self, manager: &GcTaskManager, which: u32);
}

/// The kinds of task the manager distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    /// A kind the manager has no special handling for.
    Unknown,
    /// Caller-defined work.
    Ordinary,
    /// Blocks dispatch until all other in-flight tasks drain ([`BarrierGcTask`]).
    WaitForBarrier,
    /// Returns immediately; handed to spuriously woken workers ([`NoopGcTask`]).
    Noop,
    /// Parks a worker for the duration of a collection ([`IdleGcTask`]).
    Idle,
}

impl TaskKind {
    /// Log name of this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown task",
            Self::Ordinary => "ordinary task",
            Self::WaitForBarrier => "wait for barrier task",
            Self::Noop => "noop task",
            Self::Idle => "idle task",
        }
    }

    /// Returns `true` for the barrier kind.
    #[must_use]
    pub const fn is_barrier(self) -> bool {
        matches!(self, Self::WaitForBarrier)
    }

    /// Returns `true` for the idle kind.
    #[must_use]
    pub const fn is_idle(self) -> bool {
        matches!(self, Self::Idle)
    }
}

// ============================================================================
// Noop
// ============================================================================

/// The task handed to a worker that woke up to an empty queue.
///
/// Runs trivially and sends the worker back into its wait loop. The manager
/// owns a single shared instance for its whole lifetime; it never performs
/// work that would need a valid collection id.
pub struct NoopGcTask {
    gc_id: GcId,
}

impl NoopGcTask {
    /// Creates the noop task.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            gc_id: GcId::UNDEFINED,
        }
    }
}

impl Default for NoopGcTask {
    fn default() -> Self {
        Self::new()
    }
}

impl GcTask for NoopGcTask {
    fn kind(&self) -> TaskKind {
        TaskKind::Noop
    }

    fn gc_id(&self) -> GcId {
        self.gc_id
    }

    fn do_it(&self, _manager: &GcTaskManager, _which: u32) {}
}

// ============================================================================
// Barrier
// ============================================================================

/// A task that synchronizes a submitter with the completion of a batch.
///
/// Appended by [`GcTaskManager::execute_and_wait`] as the final element of a
/// batch. When a worker dequeues it the manager blocks all further dispatch;
/// the worker then waits until it is the only busy worker and wakes the
/// submitter blocked in [`wait_for`](Self::wait_for).
pub struct BarrierGcTask {
    helper: WaitHelper,
    gc_id: GcId,
}

impl BarrierGcTask {
    /// Creates a barrier task for the current collection.
    #[must_use]
    pub fn new() -> Self {
        Self {
            helper: WaitHelper::new(),
            gc_id: GcId::current(),
        }
    }

    /// Blocks the submitter until a worker drains the barrier.
    ///
    /// With `reset = true` the underlying flag is re-armed on return so the
    /// task could be submitted again.
    pub fn wait_for(&self, reset: bool) {
        self.helper.wait_for(reset);
    }
}

impl Default for BarrierGcTask {
    fn default() -> Self {
        Self::new()
    }
}

impl GcTask for BarrierGcTask {
    fn kind(&self) -> TaskKind {
        TaskKind::WaitForBarrier
    }

    fn gc_id(&self) -> GcId {
        self.gc_id
    }

    fn do_it(&self, manager: &GcTaskManager, which: u32) {
        {
            // The manager set us as the blocking worker when we were
            // dequeued; dispatch is suspended until we drain.
            let mut state = manager.monitor().lock();
            debug_assert_eq!(
                state.blocking_worker,
                Some(which),
                "barrier running on a worker the manager does not consider blocking"
            );
            while state.busy_workers > 1 {
                trace!(
                    worker = which,
                    busy = state.busy_workers,
                    "barrier waiting for workers to drain"
                );
                manager.monitor().wait(&mut state);
            }
        }
        // Drained: wake the submitter blocked in wait_for.
        self.helper.notify();
    }
}

// ============================================================================
// Idle
// ============================================================================

/// A task that parks a worker for the duration of a collection.
///
/// Enqueued by [`GcTaskManager::task_idle_workers`] when fewer workers
/// should be active than have been created. The parked worker stays on the
/// manager's monitor, removed from dispatch eligibility without terminating
/// its thread, until [`GcTaskManager::release_idle_workers`] clears the
/// manager's wait flag.
pub struct IdleGcTask;

impl IdleGcTask {
    /// Creates an idle task.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Default for IdleGcTask {
    fn default() -> Self {
        Self::new()
    }
}

impl GcTask for IdleGcTask {
    fn kind(&self) -> TaskKind {
        TaskKind::Idle
    }

    fn do_it(&self, manager: &GcTaskManager, which: u32) {
        let mut state = manager.monitor().lock();
        // Count and announce the parked worker in one critical section so
        // anyone tracking the idle count observes a consistent value.
        state.idle_workers += 1;
        manager.monitor().notify_all();
        trace!(worker = which, idle = state.idle_workers, "worker parked idle");
        while manager.wait_helper().should_wait() {
            manager.monitor().wait(&mut state);
        }
        state.idle_workers -= 1;
        trace!(worker = which, idle = state.idle_workers, "worker released from idle");
    }
}
