//! Synchronization primitives and lock ordering discipline.
//!
//! This module provides the monitor primitive (a mutex paired with a
//! condition variable) that the task manager and the barrier protocol
//! suspend on, the process-wide free list those monitors are drawn from,
//! and the reusable one-shot completion flag built on top of them.
//!
//! ## Global lock order
//!
//! All ranked locks must be acquired in increasing rank order:
//!
//! | Rank | Lock                  | Description                            |
//! |------|-----------------------|----------------------------------------|
//! | 1    | `Manager`             | The task manager's dispatch monitor    |
//! | 2    | `Barrier`             | Pooled monitors backing [`WaitHelper`] |
//! | 3    | `Supply`              | The [`monitor_pool`] free list (leaf)  |
//!
//! A thread holding the manager monitor may notify a barrier monitor only
//! after releasing it or by acquiring in rank order; the pool mutex is a
//! leaf and is never held across another acquisition. In debug builds the
//! order is validated automatically by [`LockGuard`].

#[cfg(debug_assertions)]
use std::cell::RefCell;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex, MutexGuard};

#[cfg(debug_assertions)]
const MAX_LOCK_DEPTH: usize = 8;

#[cfg(debug_assertions)]
thread_local! {
    static HELD_RANK_STACK: RefCell<Vec<u8>> = RefCell::new(Vec::with_capacity(MAX_LOCK_DEPTH));
}

/// Lock rank tags for ordering validation.
///
/// Each ranked lock carries one of these tags. Locks must be acquired in
/// increasing rank order to prevent circular waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LockRank {
    /// The task manager's dispatch monitor (rank 1).
    /// Guards the shared queue and all bookkeeping counters.
    Manager = 1,

    /// Pooled barrier monitors (rank 2).
    /// Back every [`WaitHelper`]; acquired after the manager monitor.
    Barrier = 2,

    /// The monitor supply free list (rank 3, leaf).
    Supply = 3,
}

impl LockRank {
    /// Get the rank value for this lock tag.
    #[must_use]
    pub const fn rank_value(self) -> u8 {
        self as u8
    }
}

/// RAII rank tracker validating lock acquisition order.
///
/// Created when a ranked lock is acquired; in debug builds it pushes the
/// rank onto a thread-local stack and panics if the acquisition would
/// violate the global order. Release builds compile it away to nothing.
#[must_use = "LockGuard must be held for the duration of the critical section"]
pub struct LockGuard {
    _rank: LockRank,
}

impl LockGuard {
    /// Record the acquisition of a lock with the given rank.
    pub fn new(rank: LockRank) -> Self {
        #[cfg(debug_assertions)]
        {
            validate_lock_rank(rank, held_rank());
            // Handle thread shutdown where the TLS slot may already be gone.
            let _ = HELD_RANK_STACK.try_with(|stack| {
                stack.borrow_mut().push(rank.rank_value());
            });
        }
        Self { _rank: rank }
    }
}

#[cfg(debug_assertions)]
impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = HELD_RANK_STACK.try_with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// Validate lock acquisition order in debug builds.
///
/// # Panics
///
/// Panics if `rank` is lower than the highest rank already held.
#[inline]
#[cfg(debug_assertions)]
fn validate_lock_rank(rank: LockRank, held: u8) {
    debug_assert!(
        rank.rank_value() >= held,
        "lock ordering violation: rank {} ({rank:?}) acquired while holding rank {held}",
        rank.rank_value(),
    );
}

/// The highest rank currently held by this thread, 0 when none.
#[cfg(debug_assertions)]
fn held_rank() -> u8 {
    HELD_RANK_STACK
        .try_with(|stack| stack.borrow().last().copied().unwrap_or(0))
        .unwrap_or(0)
}

/// A mutex paired with a condition variable.
///
/// The monitor guards a value of type `T`; suspension ([`wait`](Self::wait))
/// and wake-up ([`notify_all`](Self::notify_all)) always go through the
/// paired condition variable, so a waiter can never miss a notify issued
/// while the lock is held. The guarded value is only reachable through the
/// guard, which stands in for an `owned_by_self` assertion: code cannot
/// read monitor-protected state without holding the monitor.
pub struct Monitor<T> {
    rank: LockRank,
    state: Mutex<T>,
    cond: Condvar,
}

impl<T> Monitor<T> {
    /// Creates a monitor guarding `value` at the given lock rank.
    #[must_use]
    pub const fn new(rank: LockRank, value: T) -> Self {
        Self {
            rank,
            state: Mutex::new(value),
            cond: Condvar::new(),
        }
    }

    /// Acquires the monitor, blocking until it is available.
    pub fn lock(&self) -> MonitorGuard<'_, T> {
        let rank = LockGuard::new(self.rank);
        MonitorGuard {
            inner: self.state.lock(),
            _rank: rank,
        }
    }

    /// Atomically releases the monitor and blocks until notified.
    ///
    /// The monitor is re-acquired before this returns. Callers must re-check
    /// their wait condition afterwards: wake-ups may be spurious.
    pub fn wait(&self, guard: &mut MonitorGuard<'_, T>) {
        self.cond.wait(&mut guard.inner);
    }

    /// Wakes every thread blocked in [`wait`](Self::wait).
    ///
    /// Issued while holding the monitor wherever a waiter's condition is
    /// being flipped, so no waiter can observe the stale condition and then
    /// miss the matching wake.
    pub fn notify_all(&self) {
        self.cond.notify_all();
    }

    /// Returns `true` if the monitor is currently locked.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.state.is_locked()
    }
}

/// Guard for [`Monitor`]; dereferences to the guarded value.
///
/// The monitor is released when the guard is dropped.
pub struct MonitorGuard<'a, T> {
    inner: MutexGuard<'a, T>,
    _rank: LockGuard,
}

impl<T> Deref for MonitorGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T> DerefMut for MonitorGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}

/// Process-wide free list of reusable barrier monitors.
///
/// Monitor construction is expensive relative to the lifetime of a typical
/// barrier, so monitors are reserved from this pool and returned to it
/// rather than constructed per use. Monitors are strictly reused; they are
/// never deallocated while the process runs. The free list and its mutex
/// are initialized exactly once on first use.
pub mod monitor_pool {
    use std::sync::{Arc, OnceLock};

    use parking_lot::Mutex;

    use super::{LockGuard, LockRank, Monitor};

    static FREELIST: OnceLock<Mutex<Vec<Arc<Monitor<()>>>>> = OnceLock::new();

    fn freelist() -> &'static Mutex<Vec<Arc<Monitor<()>>>> {
        FREELIST.get_or_init(|| Mutex::new(Vec::new()))
    }

    /// Reserve a monitor, reusing a pooled one when available.
    #[must_use]
    pub fn reserve() -> Arc<Monitor<()>> {
        let monitor = {
            let _rank = LockGuard::new(LockRank::Supply);
            freelist().lock().pop()
        };
        let monitor =
            monitor.unwrap_or_else(|| Arc::new(Monitor::new(LockRank::Barrier, ())));
        debug_assert!(!monitor.is_locked(), "reserved a locked monitor");
        monitor
    }

    /// Return a reserved monitor to the pool.
    ///
    /// # Panics
    ///
    /// Panics if the monitor is still locked.
    pub fn release(monitor: Arc<Monitor<()>>) {
        assert!(!monitor.is_locked(), "released a locked monitor");
        let _rank = LockGuard::new(LockRank::Supply);
        freelist().lock().push(monitor);
    }
}

/// A reusable one-shot completion signal.
///
/// A `WaitHelper` starts armed (`should_wait` = true). A waiter blocks in
/// [`wait_for`](Self::wait_for) until some other thread calls
/// [`notify`](Self::notify); passing `reset = true` re-arms the flag on the
/// way out so the helper can be used again. The backing monitor is reserved
/// from [`monitor_pool`] for the helper's lifetime and returned on drop.
///
/// The flag is only ever flipped true→false under the monitor, and the
/// waiter re-checks it after every wake-up, which tolerates spurious
/// wake-ups and guarantees no notify is missed.
pub struct WaitHelper {
    monitor: Arc<Monitor<()>>,
    should_wait: AtomicBool,
}

impl WaitHelper {
    /// Creates an armed helper backed by a pooled monitor.
    #[must_use]
    pub fn new() -> Self {
        Self {
            monitor: monitor_pool::reserve(),
            should_wait: AtomicBool::new(true),
        }
    }

    /// Blocks until [`notify`](Self::notify) clears the flag.
    ///
    /// Returns immediately if the flag is already clear. When `reset` is
    /// true the flag is re-armed before returning, enabling reuse.
    pub fn wait_for(&self, reset: bool) {
        let mut guard = self.monitor.lock();
        while self.should_wait.load(Ordering::Acquire) {
            self.monitor.wait(&mut guard);
        }
        if reset {
            self.should_wait.store(true, Ordering::Release);
        }
    }

    /// Clears the flag and wakes all waiters.
    pub fn notify(&self) {
        let _guard = self.monitor.lock();
        self.should_wait.store(false, Ordering::Release);
        self.monitor.notify_all();
    }

    /// Current state of the flag.
    #[must_use]
    pub fn should_wait(&self) -> bool {
        self.should_wait.load(Ordering::Acquire)
    }

    /// Lock-free setter, used only under external synchronization.
    ///
    /// The idle-worker protocol flips this flag while holding the task
    /// manager's monitor instead of the helper's own; waiters parked on the
    /// manager's monitor observe the store on their next wake.
    pub fn set_should_wait(&self, value: bool) {
        self.should_wait.store(value, Ordering::Release);
    }
}

impl Default for WaitHelper {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for WaitHelper {
    fn drop(&mut self) {
        monitor_pool::release(Arc::clone(&self.monitor));
    }
}
