//! Worker threads.
//!
//! Each worker is an OS thread running a private dispatch loop against the
//! manager: take a task, run it, note its completion, honor any pending
//! resource-release request, repeat. Workers are optionally bound to CPUs.

use std::io;
use std::sync::Arc;
use std::thread::{Builder, JoinHandle};

use core_affinity::CoreId;
use tracing::{debug, trace_span};

use crate::manager::GcTaskManager;

/// Distribute workers over the CPUs the OS reports, round-robin.
///
/// Returns `None` when the OS declines to enumerate cores, in which case
/// every worker runs unpinned.
pub(crate) fn distribute_processors(workers: u32) -> Option<Vec<CoreId>> {
    let cores = core_affinity::get_core_ids()?;
    if cores.is_empty() {
        return None;
    }
    Some(
        (0..workers as usize)
            .map(|which| cores[which % cores.len()])
            .collect(),
    )
}

/// Spawns worker `which`, optionally bound to `processor`.
pub(crate) fn spawn(
    manager: Arc<GcTaskManager>,
    which: u32,
    processor: Option<CoreId>,
) -> io::Result<JoinHandle<()>> {
    Builder::new()
        .name(format!("gc-task-worker-{which}"))
        .spawn(move || run(&manager, which, processor))
}

/// The worker dispatch loop.
fn run(manager: &Arc<GcTaskManager>, which: u32, processor: Option<CoreId>) {
    if let Some(core) = processor {
        if !core_affinity::set_for_current(core) {
            debug!(worker = which, core = core.id, "could not bind worker to cpu");
        }
    }
    while let Some(task) = manager.get_task(which) {
        // Idle tasks never counted as busy, so their return must not be
        // noted as a completion.
        let is_idle = task.kind().is_idle();
        {
            let _span = trace_span!(
                "gc_task",
                worker = which,
                task = task.name(),
                gc_id = task.gc_id().0
            )
            .entered();
            task.do_it(manager.as_ref(), which);
        }
        drop(task);
        if !is_idle {
            manager.note_completion(which);
        }
        if manager.should_release_resources(which) {
            // Thread-local scratch is owned by the task bodies themselves;
            // acknowledging the request is all the coordinator does here.
            manager.note_release(which);
        }
    }
    debug!(worker = which, "gc task worker exiting");
}
