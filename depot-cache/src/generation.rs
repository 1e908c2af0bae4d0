//! Cache generations.
//!
//! Every invalidation advances a cache's generation. A writer observes the
//! generation before it starts slow work (a remote fetch) and hands it back
//! when it writes; if an invalidation happened in between, the write is
//! dropped. This keeps an administrative expiry from being undone by a fetch
//! that was already in flight.

use std::sync::atomic::{AtomicU64, Ordering};

/// A point in a cache's invalidation history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Generation(u64);

impl Generation {
    pub fn zero() -> Self {
        Self(0)
    }

    pub fn sequence(&self) -> u64 {
        self.0
    }

    /// Check if this generation is newer than another.
    pub fn is_newer_than(&self, other: &Generation) -> bool {
        self.0 > other.0
    }
}

/// Monotonic generation counter of one cache.
#[derive(Debug, Default)]
pub struct GenerationCounter {
    current: AtomicU64,
}

impl GenerationCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// The generation a writer should remember before starting work.
    pub fn observe(&self) -> Generation {
        Generation(self.current.load(Ordering::Acquire))
    }

    /// Start a new generation, invalidating everything observed before.
    pub fn advance(&self) -> Generation {
        Generation(self.current.fetch_add(1, Ordering::AcqRel) + 1)
    }

    /// True when no invalidation happened since `observed`.
    pub fn is_current(&self, observed: Generation) -> bool {
        !self.observe().is_newer_than(&observed)
    }
}
