//! Reentrant guard that hides the controller's own writes from the poller.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

#[derive(Debug, Default)]
struct Shared {
    depth: AtomicUsize,
    generation: AtomicU64,
}

/// Shared count of open suspend scopes.
///
/// The state machine opens a scope around every hardware write; the poller
/// only reads [`SuspendCounter::depth`] and [`SuspendCounter::generation`].
/// Clones share the same count.
#[derive(Debug, Clone, Default)]
pub struct SuspendCounter {
    shared: Arc<Shared>,
}

impl SuspendCounter {
    /// Create a counter at depth zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a scope. The depth drops back when the guard is dropped.
    ///
    /// Every call also moves the generation forward, so a reading taken
    /// before the scope opened can be told apart from one taken after.
    #[must_use = "polling resumes as soon as the guard is dropped"]
    pub fn enter(&self) -> SuspendGuard {
        self.shared.generation.fetch_add(1, Ordering::AcqRel);
        self.shared.depth.fetch_add(1, Ordering::AcqRel);
        SuspendGuard { shared: Arc::clone(&self.shared) }
    }

    /// Number of scopes currently open.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.shared.depth.load(Ordering::Acquire)
    }

    /// Number of scopes ever opened. Never decreases.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.shared.generation.load(Ordering::Acquire)
    }

    /// Whether any scope is open.
    #[must_use]
    pub fn is_suspended(&self) -> bool {
        self.depth() > 0
    }
}

/// An open suspend scope.
#[derive(Debug)]
pub struct SuspendGuard {
    shared: Arc<Shared>,
}

impl Drop for SuspendGuard {
    fn drop(&mut self) {
        self.shared.depth.fetch_sub(1, Ordering::AcqRel);
    }
}
