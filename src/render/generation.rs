//! Generation counter for discarding work against a superseded entry list

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of the counter taken when a job is dispatched
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Generation(pub u64);

/// Shared, monotonically increasing counter.
///
/// The control thread advances it on every bulk reset of the entry list. The
/// worker compares its ticket against it before writing buffers back.
#[derive(Clone, Debug, Default)]
pub struct GenerationGuard {
    counter: Arc<AtomicU64>,
}

impl GenerationGuard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn current(&self) -> Generation {
        Generation(self.counter.load(Ordering::Acquire))
    }

    /// Invalidate everything dispatched so far
    pub fn advance(&self) -> Generation {
        Generation(self.counter.fetch_add(1, Ordering::AcqRel) + 1)
    }

    #[must_use]
    pub fn is_current(&self, generation: Generation) -> bool {
        self.current() == generation
    }
}
