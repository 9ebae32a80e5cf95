//! # ds-optimizer
//!
//! Black-box descent engine for DownSlope.
//!
//! Provides forward-difference gradient estimation, normalized and Adam-style
//! step rules, the accept/rollback descent loop, and a parallel multi-restart
//! coordinator that returns the best local optimum found.

mod cancel;
mod descent;
mod gradient;
mod pool;
mod progress;
mod search;
mod step;

pub use cancel::CancelToken;
pub use descent::{Descent, DescentConfig, DescentOutcome, DescentReport};
pub use gradient::FiniteDifference;
pub use pool::{BufferPool, PooledBuffer};
pub use progress::{NoopLogger, ProgressLogger, TracingLogger};
pub use search::{
    seeded_uniform_init, uniform_init, FailurePolicy, RestartSearch, RestartSummary, SearchConfig,
    SearchId, SearchReport, SearchResult,
};
pub use step::{AdamStep, NormalizedStep, StepRule};
