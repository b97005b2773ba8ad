//! The unsynchronized task queue.
//!
//! A doubly-linked FIFO supporting O(1) enqueue at the newest end, O(1)
//! dequeue at the oldest end, O(1) splicing of a whole queue, and an
//! affinity-preferring dequeue whose scan is bounded by barrier tasks.
//!
//! The queue is single-threaded by contract: the task manager keeps it
//! inside its monitor and callers hold that monitor around every operation.

use std::ptr::NonNull;
use std::sync::Arc;

use crate::task::GcTask;

/// A queue node. Allocated on enqueue, freed on dequeue; the queue is the
/// node's unique owner for its whole lifetime, so a task outside any queue
/// carries no link state at all.
struct TaskNode {
    task: Arc<dyn GcTask>,
    /// Toward the oldest end (the node enqueued just before this one).
    older: Option<NonNull<TaskNode>>,
    /// Toward the newest end (the node enqueued just after this one).
    newer: Option<NonNull<TaskNode>>,
}

/// Doubly-linked FIFO of tasks.
///
/// # Invariants
///
/// - `length == 0` ⇔ `insert_end.is_none()` ⇔ `remove_end.is_none()`
/// - `remove_end` (oldest) has no `older` link; `insert_end` (newest) has
///   no `newer` link
/// - for each interior node `n`: `n.older.newer == n` and `n.newer.older == n`
/// - `length` equals the node count reachable from `insert_end` via `older`
///
/// Debug builds re-count the chain after every mutation.
///
/// # Examples
///
/// ```
/// use ember_gc::{GcTaskManager, GcTask, GcTaskQueue};
/// use std::sync::Arc;
///
/// struct Scan;
/// impl GcTask for Scan {
///     fn do_it(&self, _manager: &GcTaskManager, _which: u32) {}
/// }
///
/// let mut queue = GcTaskQueue::new();
/// queue.enqueue(Arc::new(Scan));
/// queue.enqueue(Arc::new(Scan));
/// assert_eq!(queue.len(), 2);
/// let _oldest = queue.dequeue();
/// assert_eq!(queue.len(), 1);
/// ```
pub struct GcTaskQueue {
    /// The newest end; `enqueue` appends here.
    insert_end: Option<NonNull<TaskNode>>,
    /// The oldest end; `dequeue` removes from here.
    remove_end: Option<NonNull<TaskNode>>,
    length: usize,
}

impl GcTaskQueue {
    /// Creates an empty queue.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            insert_end: None,
            remove_end: None,
            length: 0,
        }
    }

    /// Number of queued tasks.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.length
    }

    /// Returns `true` if no tasks are queued.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Appends `task` at the newest end.
    pub fn enqueue(&mut self, task: Arc<dyn GcTask>) {
        let node = NonNull::from(Box::leak(Box::new(TaskNode {
            task,
            older: self.insert_end,
            newer: None,
        })));
        match self.insert_end {
            // SAFETY: `newest` is linked into this queue, so the node is
            // live and uniquely owned by us.
            Some(mut newest) => unsafe { newest.as_mut().newer = Some(node) },
            None => {
                debug_assert!(self.remove_end.is_none(), "empty queue with a remove end");
                self.remove_end = Some(node);
            }
        }
        self.insert_end = Some(node);
        self.length += 1;
        self.verify_length();
    }

    /// Splices all of `list` after this queue's newest end, leaving `list`
    /// empty. The operation is a single-pointer splice, not element-wise.
    pub fn append(&mut self, list: &mut Self) {
        if list.is_empty() {
            return;
        }
        match (self.insert_end, list.remove_end) {
            (None, _) => {
                debug_assert!(self.is_empty(), "queue with no insert end holds tasks");
                self.insert_end = list.insert_end;
                self.remove_end = list.remove_end;
                self.length = list.length;
            }
            // SAFETY: both nodes are live: `newest` is linked into this
            // queue and `incoming` into the non-empty `list`.
            (Some(mut newest), Some(mut incoming)) => unsafe {
                incoming.as_mut().older = Some(newest);
                newest.as_mut().newer = Some(incoming);
                self.insert_end = list.insert_end;
                self.length += list.length;
            },
            (Some(_), None) => unreachable!("non-empty queue without a remove end"),
        }
        list.insert_end = None;
        list.remove_end = None;
        list.length = 0;
        self.verify_length();
    }

    /// Removes and returns the oldest task.
    ///
    /// # Panics
    ///
    /// Panics if the queue is empty.
    pub fn dequeue(&mut self) -> Arc<dyn GcTask> {
        let oldest = self
            .remove_end
            .expect("dequeue from an empty task queue");
        self.unlink(oldest)
    }

    /// Removes and returns the oldest task whose affinity matches `which`,
    /// scanning from the oldest end toward the newest.
    ///
    /// The scan has two stop conditions: a barrier task is a hard stop
    /// (barriers must never be dispatched around), and a matching task is
    /// unlinked and returned. If neither fires before the chain ends, this
    /// falls back to a plain [`dequeue`](Self::dequeue) of the oldest task.
    /// Affinity is a soft hint, not a guarantee.
    ///
    /// # Panics
    ///
    /// Panics if the queue is empty.
    pub fn dequeue_with_affinity(&mut self, which: u32) -> Arc<dyn GcTask> {
        assert!(
            !self.is_empty(),
            "affinity dequeue from an empty task queue"
        );
        let mut cursor = self.remove_end;
        while let Some(node) = cursor {
            // SAFETY: the cursor only ever holds nodes linked into this
            // queue, and nothing is unlinked during the scan.
            let node_ref = unsafe { node.as_ref() };
            if node_ref.task.kind().is_barrier() {
                // Don't consider barrier tasks, nor anything past them.
                break;
            }
            if node_ref.task.affinity() == Some(which) {
                return self.unlink(node);
            }
            cursor = node_ref.newer;
        }
        self.dequeue()
    }

    /// Unlinks `node` from the chain, frees it, and returns its task.
    fn unlink(&mut self, node: NonNull<TaskNode>) -> Arc<dyn GcTask> {
        // SAFETY: `node` is linked into this queue, so it was allocated by
        // `enqueue` via `Box` and we are its unique owner.
        let boxed = unsafe { Box::from_raw(node.as_ptr()) };
        let TaskNode { task, older, newer } = *boxed;
        match newer {
            // SAFETY: neighbor links of a linked node point at live nodes
            // of this queue.
            Some(mut n) => unsafe { n.as_mut().older = older },
            None => {
                debug_assert_eq!(self.insert_end, Some(node), "unlinked node is not the newest");
                self.insert_end = older;
            }
        }
        match older {
            // SAFETY: as above.
            Some(mut o) => unsafe { o.as_mut().newer = newer },
            None => {
                debug_assert_eq!(self.remove_end, Some(node), "unlinked node is not the oldest");
                self.remove_end = newer;
            }
        }
        self.length -= 1;
        self.verify_length();
        task
    }

    /// Re-count the chain and check it against `length` (debug builds only).
    fn verify_length(&self) {
        #[cfg(debug_assertions)]
        {
            let mut count = 0;
            let mut cursor = self.insert_end;
            while let Some(node) = cursor {
                count += 1;
                // SAFETY: the chain only links live nodes of this queue.
                cursor = unsafe { node.as_ref() }.older;
            }
            debug_assert_eq!(count, self.length, "queue length does not match its chain");
        }
    }
}

impl Default for GcTaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for GcTaskQueue {
    fn drop(&mut self) {
        while !self.is_empty() {
            drop(self.dequeue());
        }
    }
}

// SAFETY: every node is uniquely owned by the queue (no aliasing once
// enqueued), and the payloads are `Arc<dyn GcTask>` where `GcTask` requires
// Send + Sync, so moving the whole queue to another thread is sound.
unsafe impl Send for GcTaskQueue {}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::GcTaskQueue;
    use crate::manager::GcTaskManager;
    use crate::task::{GcTask, TaskKind};

    struct StubTask {
        tag: &'static str,
        kind: TaskKind,
        affinity: Option<u32>,
    }

    impl StubTask {
        fn new(tag: &'static str) -> Arc<Self> {
            Arc::new(Self {
                tag,
                kind: TaskKind::Ordinary,
                affinity: None,
            })
        }

        fn with_affinity(tag: &'static str, affinity: u32) -> Arc<Self> {
            Arc::new(Self {
                tag,
                kind: TaskKind::Ordinary,
                affinity: Some(affinity),
            })
        }

        fn barrier(tag: &'static str) -> Arc<Self> {
            Arc::new(Self {
                tag,
                kind: TaskKind::WaitForBarrier,
                affinity: None,
            })
        }
    }

    impl GcTask for StubTask {
        fn kind(&self) -> TaskKind {
            self.kind
        }

        fn affinity(&self) -> Option<u32> {
            self.affinity
        }

        fn name(&self) -> &'static str {
            self.tag
        }

        fn do_it(&self, _manager: &GcTaskManager, _which: u32) {}
    }

    fn drain_tags(queue: &mut GcTaskQueue) -> Vec<&'static str> {
        let mut tags = Vec::new();
        while !queue.is_empty() {
            tags.push(queue.dequeue().name());
        }
        tags
    }

    #[test]
    fn test_enqueue_dequeue_round_trip() {
        let mut queue = GcTaskQueue::new();
        assert!(queue.is_empty());

        queue.enqueue(StubTask::new("only"));
        assert_eq!(queue.len(), 1);

        let task = queue.dequeue();
        assert_eq!(task.name(), "only");
        assert!(queue.is_empty());
    }

    #[test]
    fn test_dequeue_is_fifo() {
        let mut queue = GcTaskQueue::new();
        queue.enqueue(StubTask::new("a"));
        queue.enqueue(StubTask::new("b"));
        queue.enqueue(StubTask::new("c"));

        assert_eq!(drain_tags(&mut queue), ["a", "b", "c"]);
    }

    #[test]
    #[should_panic(expected = "dequeue from an empty task queue")]
    fn test_dequeue_empty_panics() {
        let mut queue = GcTaskQueue::new();
        let _ = queue.dequeue();
    }

    #[test]
    fn test_append_empty_list_is_noop() {
        let mut queue = GcTaskQueue::new();
        queue.enqueue(StubTask::new("a"));

        let mut empty = GcTaskQueue::new();
        queue.append(&mut empty);
        assert_eq!(queue.len(), 1);
        assert!(empty.is_empty());
    }

    #[test]
    fn test_append_onto_empty_adopts_list() {
        let mut queue = GcTaskQueue::new();
        let mut list = GcTaskQueue::new();
        list.enqueue(StubTask::new("a"));
        list.enqueue(StubTask::new("b"));

        queue.append(&mut list);
        assert!(list.is_empty());
        assert_eq!(drain_tags(&mut queue), ["a", "b"]);
    }

    #[test]
    fn test_append_concatenates_and_empties_argument() {
        let mut queue = GcTaskQueue::new();
        queue.enqueue(StubTask::new("a"));
        queue.enqueue(StubTask::new("b"));

        let mut list = GcTaskQueue::new();
        list.enqueue(StubTask::new("c"));
        list.enqueue(StubTask::new("d"));
        list.enqueue(StubTask::new("e"));

        queue.append(&mut list);
        assert!(list.is_empty());
        assert_eq!(queue.len(), 5);
        assert_eq!(drain_tags(&mut queue), ["a", "b", "c", "d", "e"]);
    }

    #[test]
    fn test_affinity_match_wins_over_oldest() {
        let mut queue = GcTaskQueue::new();
        queue.enqueue(StubTask::with_affinity("t_y", 1));
        queue.enqueue(StubTask::with_affinity("t_x", 2));

        let task = queue.dequeue_with_affinity(2);
        assert_eq!(task.name(), "t_x");
        assert_eq!(queue.dequeue().name(), "t_y");
    }

    #[test]
    fn test_affinity_without_match_falls_through_to_oldest() {
        let mut queue = GcTaskQueue::new();
        queue.enqueue(StubTask::with_affinity("t_y", 1));

        let task = queue.dequeue_with_affinity(2);
        assert_eq!(task.name(), "t_y");
        assert!(queue.is_empty());
    }

    #[test]
    fn test_barrier_bounds_the_affinity_scan() {
        // A matching task sits beyond the barrier; the scan must not reach
        // it and falls back to the oldest task instead.
        let mut queue = GcTaskQueue::new();
        queue.enqueue(StubTask::with_affinity("t_a", 1));
        queue.enqueue(StubTask::barrier("fin"));
        queue.enqueue(StubTask::with_affinity("t_b", 2));

        let task = queue.dequeue_with_affinity(2);
        assert_eq!(task.name(), "t_a");
        assert_eq!(drain_tags(&mut queue), ["fin", "t_b"]);
    }

    #[test]
    fn test_barrier_at_oldest_end_is_dispatched() {
        let mut queue = GcTaskQueue::new();
        queue.enqueue(StubTask::barrier("fin"));
        queue.enqueue(StubTask::with_affinity("t_x", 2));

        // The barrier is a hard stop even when it is the very first node:
        // the fallback dequeue hands it out rather than anything behind it.
        let task = queue.dequeue_with_affinity(2);
        assert_eq!(task.name(), "fin");
        assert_eq!(queue.dequeue().name(), "t_x");
    }

    #[test]
    fn test_affinity_prefers_oldest_match() {
        let mut queue = GcTaskQueue::new();
        queue.enqueue(StubTask::with_affinity("t_a", 2));
        queue.enqueue(StubTask::with_affinity("t_b", 1));
        queue.enqueue(StubTask::with_affinity("t_c", 2));

        assert_eq!(queue.dequeue_with_affinity(2).name(), "t_a");
        assert_eq!(queue.dequeue_with_affinity(2).name(), "t_c");
        assert_eq!(queue.dequeue_with_affinity(2).name(), "t_b");
        assert!(queue.is_empty());
    }

    #[test]
    fn test_unlinking_interior_node_keeps_chain_consistent() {
        let mut queue = GcTaskQueue::new();
        queue.enqueue(StubTask::with_affinity("t_a", 1));
        queue.enqueue(StubTask::with_affinity("t_b", 2));
        queue.enqueue(StubTask::with_affinity("t_c", 1));

        assert_eq!(queue.dequeue_with_affinity(2).name(), "t_b");
        assert_eq!(queue.len(), 2);
        assert_eq!(drain_tags(&mut queue), ["t_a", "t_c"]);
    }

    #[test]
    fn test_drop_frees_queued_tasks() {
        let task = StubTask::new("held");
        {
            let mut queue = GcTaskQueue::new();
            queue.enqueue(Arc::clone(&task) as Arc<dyn GcTask>);
            assert_eq!(Arc::strong_count(&task), 2);
        }
        assert_eq!(Arc::strong_count(&task), 1);
    }
}
