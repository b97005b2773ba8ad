//! Collection identifiers.
//!
//! Every task carries the id of the collection it belongs to so that log
//! events from all workers of one collection can be correlated.

use std::sync::atomic::{AtomicU64, Ordering};

/// Stable identifier for a collection.
///
/// Ids are monotonically increasing, starting at 1. Id 0 is the
/// [`undefined`](GcId::UNDEFINED) sentinel carried by tasks that do not
/// belong to any particular collection (the noop task, for instance).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GcId(pub u64);

/// Global counter for generating unique collection ids.
static NEXT_GC_ID: AtomicU64 = AtomicU64::new(1);

/// The id of the collection currently in progress, 0 when none is.
static CURRENT_GC_ID: AtomicU64 = AtomicU64::new(0);

impl GcId {
    /// The sentinel id of work that belongs to no collection.
    pub const UNDEFINED: Self = Self(0);

    /// Returns `true` for the [`UNDEFINED`](Self::UNDEFINED) sentinel.
    #[inline]
    #[must_use]
    pub const fn is_undefined(self) -> bool {
        self.0 == 0
    }

    /// The id of the collection currently in progress.
    ///
    /// Returns [`UNDEFINED`](Self::UNDEFINED) outside a collection.
    #[inline]
    #[must_use]
    pub fn current() -> Self {
        Self(CURRENT_GC_ID.load(Ordering::Relaxed))
    }

    /// Install `id` as the current collection id.
    ///
    /// Called by the collection driver at the start of a cycle, typically
    /// with a fresh id from [`next_gc_id`].
    #[inline]
    pub fn set_current(id: Self) {
        CURRENT_GC_ID.store(id.0, Ordering::Relaxed);
    }
}

/// Generate the next unique collection id.
#[inline]
#[must_use]
pub fn next_gc_id() -> GcId {
    GcId(NEXT_GC_ID.fetch_add(1, Ordering::Relaxed))
}
