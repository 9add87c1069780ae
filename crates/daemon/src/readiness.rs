//! Readiness flag shared between the ingestion loop and the HTTP surface.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Process-wide "ingestion has started" signal.
///
/// Starts false and flips to true once, when the ingestion loop begins its
/// first poll. Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct Readiness {
    ready: Arc<AtomicBool>,
}

impl Readiness {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the service ready; returns `true` only for the call that flipped it.
    pub fn mark_ready(&self) -> bool {
        !self.ready.swap(true, Ordering::AcqRel)
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}
