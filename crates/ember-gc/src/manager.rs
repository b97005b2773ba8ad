//! The task manager: a fixed gang of worker threads fed from a shared queue.
//!
//! Submitters enqueue batches with [`GcTaskManager::add_list`] (or single
//! tasks with [`GcTaskManager::add_task`]); workers loop through
//! [`GcTaskManager::get_task`] / `do_it` / [`GcTaskManager::note_completion`].
//! A barrier task suspends dispatch until every other in-flight task drains,
//! which is how [`GcTaskManager::execute_and_wait`] gives its caller a
//! completed batch. Everything the manager reads or mutates (queue,
//! counters, barrier state) lives under one monitor; the only exceptions
//! are the per-worker resource-release flags, which are single-writer
//! atomic cells.

use std::sync::atomic::{fence, AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::config::GcTaskManagerConfig;
use crate::metrics::GcTaskMetrics;
use crate::queue::GcTaskQueue;
use crate::sync::{LockRank, Monitor, WaitHelper};
use crate::task::{BarrierGcTask, GcTask, IdleGcTask, NoopGcTask};
use crate::worker;

/// Everything guarded by the manager's monitor.
pub(crate) struct ManagerState {
    /// The shared task queue.
    pub(crate) queue: GcTaskQueue,
    /// Workers currently executing a non-idle task.
    pub(crate) busy_workers: u32,
    /// The worker holding the current barrier, `None` when dispatch is open.
    pub(crate) blocking_worker: Option<u32>,
    /// Worker threads created so far.
    pub(crate) created_workers: u32,
    /// Workers currently eligible for dispatch.
    pub(crate) active_workers: u32,
    /// Workers currently parked on idle tasks.
    pub(crate) idle_workers: u32,
    pub(crate) delivered_tasks: u64,
    pub(crate) completed_tasks: u64,
    pub(crate) barriers: u64,
    pub(crate) emptied_queue: u64,
    /// Set once by `shutdown`; workers exit their loops when they see it.
    pub(crate) terminating: bool,
}

/// Coordinates a gang of GC worker threads over a shared task queue.
///
/// Created with [`new`](Self::new), which spawns the initial workers, and
/// torn down with [`shutdown`](Self::shutdown). The manager is meant to
/// live for the whole process: one instance per collector.
///
/// # Examples
///
/// ```
/// use ember_gc::{GcTask, GcTaskManager, GcTaskManagerConfig, GcTaskQueue};
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
///
/// let manager = GcTaskManager::new(GcTaskManagerConfig {
///     workers: 2,
///     ..Default::default()
/// });
///
/// let scanned = Arc::new(AtomicUsize::new(0));
/// let mut batch = GcTaskQueue::new();
/// for _ in 0..4 {
///     batch.enqueue(Arc::new(ScanRegion { scanned: Arc::clone(&scanned) }));
/// }
///
/// // Returns once all four tasks have completed.
/// manager.execute_and_wait(batch);
/// assert_eq!(scanned.load(Ordering::Relaxed), 4);
///
/// manager.shutdown();
/// ```
pub struct GcTaskManager {
    config: GcTaskManagerConfig,
    monitor: Monitor<ManagerState>,
    /// Shared instance handed to workers that woke up to an empty queue.
    noop_task: Arc<NoopGcTask>,
    /// Controls the park/release of idle tasks; its flag is flipped under
    /// the manager's monitor, never its own.
    wait_helper: WaitHelper,
    /// One request cell per configured worker slot. Single writer per side:
    /// the manager sets, the owning worker clears; readers consult the cell
    /// inside `get_task` under the monitor.
    resource_flags: Box<[AtomicBool]>,
    /// CPU assignment per worker slot, `None` meaning unpinned.
    processor_map: Box<[Option<core_affinity::CoreId>]>,
    /// Join handles of spawned workers. A leaf lock: never held across any
    /// other acquisition.
    threads: Mutex<Vec<JoinHandle<()>>>,
    /// Back-reference handed to spawned workers.
    self_handle: Weak<Self>,
}

impl GcTaskManager {
    /// Creates a manager and spawns its initial workers.
    ///
    /// With a dynamic gang a single worker is created up front; otherwise
    /// the whole configured gang is.
    ///
    /// # Panics
    ///
    /// Panics if `config.workers` is zero or a worker thread cannot be
    /// spawned.
    #[must_use]
    pub fn new(config: GcTaskManagerConfig) -> Arc<Self> {
        assert!(config.workers > 0, "task manager configured with no workers");

        let processor_map: Box<[Option<core_affinity::CoreId>]> = if config.bind_workers_to_cpus {
            worker::distribute_processors(config.workers).map_or_else(
                || vec![None; config.workers as usize].into_boxed_slice(),
                |cores| cores.into_iter().map(Some).collect(),
            )
        } else {
            vec![None; config.workers as usize].into_boxed_slice()
        };

        let active_workers = if config.dynamic_workers { 1 } else { config.workers };
        let resource_flags = (0..config.workers)
            .map(|_| AtomicBool::new(false))
            .collect();

        let manager = Arc::new_cyclic(|self_handle| Self {
            config,
            monitor: Monitor::new(
                LockRank::Manager,
                ManagerState {
                    queue: GcTaskQueue::new(),
                    busy_workers: 0,
                    blocking_worker: None,
                    created_workers: 0,
                    active_workers,
                    idle_workers: 0,
                    delivered_tasks: 0,
                    completed_tasks: 0,
                    barriers: 0,
                    emptied_queue: 0,
                    terminating: false,
                },
            ),
            noop_task: Arc::new(NoopGcTask::new()),
            wait_helper: WaitHelper::new(),
            resource_flags,
            processor_map,
            threads: Mutex::new(Vec::new()),
            self_handle: self_handle.clone(),
        });
        debug!(workers = config.workers, active = active_workers, "task manager starting");
        manager.add_workers(true);
        manager
    }

    /// The configured gang size.
    #[must_use]
    pub fn workers(&self) -> u32 {
        self.config.workers
    }

    /// `true` when every configured worker is active.
    #[must_use]
    pub fn all_workers_active(&self) -> bool {
        self.monitor.lock().active_workers == self.config.workers
    }

    /// Snapshot of the bookkeeping counters and worker gauges.
    #[must_use]
    pub fn metrics(&self) -> GcTaskMetrics {
        let state = self.monitor.lock();
        GcTaskMetrics {
            delivered_tasks: state.delivered_tasks,
            completed_tasks: state.completed_tasks,
            barriers: state.barriers,
            emptied_queue: state.emptied_queue,
            busy_workers: state.busy_workers,
            created_workers: state.created_workers,
            active_workers: state.active_workers,
            idle_workers: state.idle_workers,
            queued_tasks: state.queue.len(),
        }
    }

    pub(crate) fn monitor(&self) -> &Monitor<ManagerState> {
        &self.monitor
    }

    pub(crate) fn wait_helper(&self) -> &WaitHelper {
        &self.wait_helper
    }

    // ------------------------------------------------------------------
    // Submission
    // ------------------------------------------------------------------

    /// Enqueues a single task and wakes the gang.
    pub fn add_task(&self, task: Arc<dyn GcTask>) {
        let mut state = self.monitor.lock();
        trace!(task = task.name(), gc_id = task.gc_id().0, "add_task");
        state.queue.enqueue(task);
        // Notify with the lock held to avoid missed notifies against the
        // check-then-wait loop in get_task.
        self.monitor.notify_all();
    }

    /// Splices a whole batch onto the queue and wakes the gang.
    ///
    /// `list` is consumed; its tasks now belong to the manager until
    /// workers take them.
    pub fn add_list(&self, mut list: GcTaskQueue) {
        let mut state = self.monitor.lock();
        trace!(tasks = list.len(), "add_list");
        state.queue.append(&mut list);
        // Notify with the lock held to avoid missed notifies.
        self.monitor.notify_all();
    }

    /// Runs a batch to completion.
    ///
    /// Appends a fresh [`BarrierGcTask`] to `list`, publishes the batch,
    /// and blocks until a worker drains the barrier, at which point every
    /// task submitted in the batch has completed.
    pub fn execute_and_wait(&self, mut list: GcTaskQueue) {
        let fin = Arc::new(BarrierGcTask::new());
        list.enqueue(Arc::clone(&fin) as Arc<dyn GcTask>);
        // The worker that dequeues the barrier reads its fields through the
        // queue; make them globally visible before the batch is published.
        // On Rust's sequentially-consistent lock operations the monitor
        // acquire in add_list already orders this, and the fence is free.
        fence(Ordering::Release);
        self.add_list(list);
        fin.wait_for(true);
    }

    // ------------------------------------------------------------------
    // Dispatch protocol (worker side)
    // ------------------------------------------------------------------

    /// Hands worker `which` its next task, blocking until one is available.
    ///
    /// Workers wait here while a barrier holds dispatch closed or the queue
    /// is empty. A worker woken with nothing to do (a resource-release
    /// request, or a spurious wake) receives the shared noop task so it can
    /// run its loop housekeeping and come back. Returns `None` only once
    /// the manager is shutting down.
    pub fn get_task(&self, which: u32) -> Option<Arc<dyn GcTask>> {
        let mut state = self.monitor.lock();
        // Wait while dispatch is blocked or there is nothing to do, except
        // maybe release resources.
        loop {
            if state.terminating {
                return None;
            }
            if state.blocking_worker.is_none()
                && (!state.queue.is_empty() || self.should_release_resources(which))
            {
                break;
            }
            trace!(
                worker = which,
                blocked = state.blocking_worker.is_some(),
                empty = state.queue.is_empty(),
                "get_task waiting"
            );
            self.monitor.wait(&mut state);
        }

        let task: Arc<dyn GcTask> = if state.queue.is_empty() {
            // Woken up with an empty queue: hand back the noop task, in
            // case someone wanted us to release resources, or whatever.
            self.noop_task.clone()
        } else {
            let task = if self.config.affinity_dispatch {
                state.queue.dequeue_with_affinity(which)
            } else {
                state.queue.dequeue()
            };
            if task.kind().is_barrier() {
                state.blocking_worker = Some(which);
            }
            task
        };

        if !task.kind().is_idle() {
            state.busy_workers += 1;
            state.delivered_tasks += 1;
        }
        trace!(worker = which, task = task.name(), gc_id = task.gc_id().0, "dispatch");
        Some(task)
    }

    /// Records that worker `which` finished its task.
    ///
    /// Drains the barrier if `which` was holding one, updates the
    /// bookkeeping counters, and wakes everyone waiting on the manager,
    /// including a barrier holder watching the busy count.
    ///
    /// # Panics
    ///
    /// Panics if no worker is busy.
    pub fn note_completion(&self, which: u32) {
        let mut state = self.monitor.lock();
        if state.blocking_worker == Some(which) {
            state.barriers += 1;
            state.blocking_worker = None;
            debug!(worker = which, barriers = state.barriers, "barrier drained");
        }
        state.completed_tasks += 1;
        assert!(state.busy_workers > 0, "completion noted with no busy workers");
        state.busy_workers -= 1;
        if state.busy_workers == 0 && state.queue.is_empty() {
            state.emptied_queue += 1;
            trace!(worker = which, emptied = state.emptied_queue, "queue drained");
        }
        // Tell everyone that a task has completed.
        self.monitor.notify_all();
    }

    // ------------------------------------------------------------------
    // Worker gang sizing
    // ------------------------------------------------------------------

    /// Grows the created gang toward the active worker count.
    ///
    /// Idempotent for already-created workers; never creates more than the
    /// configured gang size. Calls are externally serialized (collection
    /// setup runs one at a time).
    ///
    /// # Panics
    ///
    /// Panics if a worker thread cannot be spawned while `initializing`.
    pub fn add_workers(&self, initializing: bool) {
        let manager = self
            .self_handle
            .upgrade()
            .expect("adding workers to a manager being torn down");
        let (start, target) = {
            let state = self.monitor.lock();
            (state.created_workers, state.active_workers.min(self.config.workers))
        };
        let mut created = start;
        for which in start..target {
            match worker::spawn(Arc::clone(&manager), which, self.processor_map[which as usize]) {
                Ok(handle) => {
                    self.threads.lock().push(handle);
                    created += 1;
                    debug!(worker = which, "created gc task worker");
                }
                Err(err) => {
                    assert!(!initializing, "failed to spawn gc task worker {which}: {err}");
                    tracing::warn!(worker = which, %err, "could not grow the worker gang");
                    break;
                }
            }
        }
        let mut state = self.monitor.lock();
        state.created_workers = created;
        state.active_workers = state.active_workers.min(created);
        if created > start {
            debug!(
                created = created - start,
                total = created,
                initializing,
                "worker gang grown"
            );
        }
    }

    /// Recomputes the active worker count from the configured policy and
    /// grows the gang accordingly.
    ///
    /// `live_threads` is the load signal handed to the policy, typically
    /// the number of live application threads.
    pub fn set_active_gang(&self, live_threads: u32) {
        let policy = self.config.worker_policy;
        {
            let mut state = self.monitor.lock();
            let desired = policy(self.config.workers, state.active_workers, live_threads)
                .clamp(1, self.config.workers);
            trace!(
                was = state.active_workers,
                now = desired,
                live_threads,
                "set_active_gang"
            );
            state.active_workers = desired;
        }
        // Growing does not guarantee any additional workers.
        self.add_workers(false);
    }

    /// Sets the active worker count directly.
    ///
    /// Workers beyond the active count keep running until
    /// [`task_idle_workers`](Self::task_idle_workers) parks them.
    ///
    /// # Panics
    ///
    /// Panics if `count` exceeds the configured gang size.
    pub fn update_active_workers(&self, count: u32) {
        assert!(count <= self.config.workers, "active worker count out of range");
        let mut state = self.monitor.lock();
        state.active_workers = count;
    }

    // ------------------------------------------------------------------
    // Idle parking
    // ------------------------------------------------------------------

    /// Parks surplus workers on idle tasks.
    ///
    /// Enqueues one [`IdleGcTask`] for every created worker beyond the
    /// active count that is not already parked. Parked workers stay out of
    /// dispatch until [`release_idle_workers`](Self::release_idle_workers).
    pub fn task_idle_workers(&self) {
        let more_inactive = {
            let mut state = self.monitor.lock();
            // Re-arm the park flag first so already-parked workers cannot
            // exit their idle tasks while we count: a new collection is
            // starting and they are staying idle.
            self.wait_helper.set_should_wait(true);
            let surplus = i64::from(state.created_workers)
                - i64::from(state.active_workers)
                - i64::from(state.idle_workers);
            if surplus < 0 {
                // More workers are parked than the requested active count
                // allows for; they cannot be released mid-setup, so lower
                // the active count to match reality instead.
                let reduced = state.created_workers - state.idle_workers;
                state.active_workers = reduced;
            }
            trace!(
                created = state.created_workers,
                active = state.active_workers,
                idle = state.idle_workers,
                more = surplus.max(0),
                "task_idle_workers"
            );
            u32::try_from(surplus.max(0)).expect("surplus fits the worker count")
        };

        let mut batch = GcTaskQueue::new();
        for _ in 0..more_inactive {
            batch.enqueue(Arc::new(IdleGcTask::new()));
        }
        self.add_list(batch);
    }

    /// Releases every parked worker back into dispatch.
    pub fn release_idle_workers(&self) {
        let state = self.monitor.lock();
        self.wait_helper.set_should_wait(false);
        trace!(idle = state.idle_workers, "releasing idle workers");
        self.monitor.notify_all();
    }

    // ------------------------------------------------------------------
    // Resource release requests
    // ------------------------------------------------------------------

    /// Asks every worker to release its thread-local resources.
    ///
    /// A request channel, not a strict barrier: the flag stores are
    /// lock-free and repeated sets are idempotent. Workers parked in
    /// `get_task` are woken so the request is not left sitting until the
    /// next unrelated notify. For an atomic variant, run the release inside
    /// a barrier task.
    pub fn release_all_resources(&self) {
        for flag in &*self.resource_flags {
            flag.store(true, Ordering::Relaxed);
        }
        let _state = self.monitor.lock();
        self.monitor.notify_all();
    }

    /// `true` if worker `which` has a pending resource-release request.
    #[must_use]
    pub fn should_release_resources(&self, which: u32) -> bool {
        // No lock: each worker reads only its own cell.
        self.resource_flags[which as usize].load(Ordering::Relaxed)
    }

    /// Clears worker `which`'s resource-release request.
    ///
    /// Called by the worker itself after it has released its resources.
    pub fn note_release(&self, which: u32) {
        // No lock: each worker writes only its own cell.
        self.resource_flags[which as usize].store(false, Ordering::Relaxed);
    }

    // ------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------

    /// Shuts the gang down and joins every worker thread.
    ///
    /// Waits for in-flight tasks to drain, releases parked workers, then
    /// signals termination. The queue must already be empty: submitting
    /// work and never collecting it is a caller bug.
    ///
    /// # Panics
    ///
    /// Panics if tasks are still queued, or if a worker thread panicked.
    pub fn shutdown(&self) {
        {
            let mut state = self.monitor.lock();
            // Unpark idle workers so they can observe termination.
            self.wait_helper.set_should_wait(false);
            while state.busy_workers > 0 {
                self.monitor.wait(&mut state);
            }
            assert!(state.queue.is_empty(), "shutdown with queued work");
            state.terminating = true;
            debug!(
                delivered = state.delivered_tasks,
                completed = state.completed_tasks,
                barriers = state.barriers,
                "task manager shutting down"
            );
            self.monitor.notify_all();
        }
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.threads.lock());
        for handle in handles {
            handle.join().expect("gc task worker panicked");
        }
    }
}
