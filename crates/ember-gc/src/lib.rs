//! Parallel garbage-collection task coordination.
//!
//! `ember-gc` provides the work coordinator at the heart of a parallel
//! collector: a fixed gang of long-lived worker threads consuming
//! heterogeneous tasks from a shared, barrier-aware queue under explicit
//! synchronization.
//!
//! # Features
//!
//! - **Barrier-synchronized batches**: [`GcTaskManager::execute_and_wait`]
//!   returns only after every task in the batch has completed
//! - **Affinity-preferring dispatch**: tasks can name a preferred worker;
//!   the hint is honored up to the next barrier and never blocks progress
//! - **Idle parking**: surplus workers are removed from dispatch for the
//!   length of a collection without terminating their threads
//! - **No missed wake-ups**: all state changes notify under the owning
//!   monitor, so a waiter can never observe a stale condition and then
//!   sleep through the matching wake
//!
//! # Quick start
//!
//! ```
//! use ember_gc::{GcTask, GcTaskManager, GcTaskManagerConfig, GcTaskQueue};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! struct ScanRoots {
//!     visited: Arc<AtomicUsize>,
//! }
//!
//! impl GcTask for ScanRoots {
//!     fn do_it(&self, _manager: &GcTaskManager, _which: u32) {
//!         self.visited.fetch_add(1, Ordering::Relaxed);
//!     }
//! }
//!
//! let manager = GcTaskManager::new(GcTaskManagerConfig {
//!     workers: 2,
//!     ..Default::default()
//! });
//!
//! let visited = Arc::new(AtomicUsize::new(0));
//! let mut batch = GcTaskQueue::new();
//! for _ in 0..8 {
//!     batch.enqueue(Arc::new(ScanRoots { visited: Arc::clone(&visited) }));
//! }
//! manager.execute_and_wait(batch);
//! assert_eq!(visited.load(Ordering::Relaxed), 8);
//!
//! manager.shutdown();
//! ```
//!
//! # Concurrency model
//!
//! One monitor (mutex + condition variable) guards the queue and every
//! counter the protocol reads together; barrier completion signals ride on
//! pooled monitors reserved per barrier. The lock order (manager monitor,
//! then barrier monitors, then the pool free list) is validated in debug
//! builds. The only state outside the monitor is the per-worker
//! resource-release cells, which have a single writer per side.
//!
//! Failures in this crate are programmer errors, not runtime conditions:
//! every operation either upholds its invariants or panics. The coordinator
//! runs inside a trusted collector; a silent slip would corrupt the heap.

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod gc_id;
pub mod manager;
pub mod metrics;
pub mod queue;
pub mod sync;
pub mod task;
mod worker;

pub use config::{available_parallelism, default_worker_policy, GcTaskManagerConfig, WorkerPolicy};
pub use gc_id::{next_gc_id, GcId};
pub use manager::GcTaskManager;
pub use metrics::GcTaskMetrics;
pub use queue::GcTaskQueue;
pub use sync::{monitor_pool, LockRank, Monitor, WaitHelper};
pub use task::{BarrierGcTask, GcTask, IdleGcTask, NoopGcTask, TaskKind};
