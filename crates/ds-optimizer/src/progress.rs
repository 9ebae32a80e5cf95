use tracing::debug;

/// Receives per-iteration progress events from descent runs.
///
/// Restarts run in parallel and may share one logger, so implementations must
/// serialize their own side effects; the engine does not.
pub trait ProgressLogger: Send + Sync {
    /// Called once per iteration with the objective value after the step.
    fn on_iteration(&self, iteration: usize, error: f64);
}

/// Discards all progress events. The default.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLogger;

impl ProgressLogger for NoopLogger {
    fn on_iteration(&self, _iteration: usize, _error: f64) {}
}

/// Forwards progress events to the `tracing` debug channel.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl ProgressLogger for TracingLogger {
    fn on_iteration(&self, iteration: usize, error: f64) {
        debug!(iteration, error, "descent progress");
    }
}
