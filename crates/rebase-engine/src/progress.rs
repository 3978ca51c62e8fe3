//! Progress reporting and cooperative cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Receives a human-readable description of the current step.
pub trait ProgressSink {
    fn report(&self, stage: &str);
}

impl<F: Fn(&str)> ProgressSink for F {
    fn report(&self, stage: &str) {
        self(stage)
    }
}

/// Discards every report
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _stage: &str) {}
}

/// Shared cancellation flag. Clones observe the same flag.
///
/// The pipeline only looks at it between stages, never while a transaction
/// is open.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
