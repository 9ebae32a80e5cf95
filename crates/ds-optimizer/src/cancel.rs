use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation signal shared across the parallel regions.
///
/// Cloning is cheap and every clone observes the same flag. The engine checks
/// it between dimension tasks during gradient estimation, at every descent
/// iteration boundary, and before each restart; a cancelled run ends in a
/// normal `Cancelled` terminal state rather than an error.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}
