//! Parallel multi-restart coordination: many independent descent runs from
//! varied starting points, reduced to the single best local optimum.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use ds_types::{DsResult, Objective, ParamsMut, SearchError};
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cancel::CancelToken;
use crate::descent::{checked_value, Descent, DescentOutcome, DescentReport};
use crate::pool::BufferPool;
use crate::progress::ProgressLogger;

/// Unique search run identifier.
pub type SearchId = Uuid;

/// What to do when a single restart fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum FailurePolicy {
    /// Abort the whole search, reporting the lowest-indexed failure.
    #[default]
    FailFast,
    /// Log and skip failed restarts; error only if every restart failed.
    SkipFailed,
}

/// Configuration for a multi-restart search.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Parameter count of every candidate buffer.
    pub dimensions: usize,

    /// Number of independent descent runs.
    pub restarts: usize,

    /// Iteration budget handed to each run.
    pub iterations_per_restart: usize,

    pub failure_policy: FailurePolicy,
}

impl SearchConfig {
    pub fn new(dimensions: usize, restarts: usize) -> Self {
        Self {
            dimensions,
            restarts,
            iterations_per_restart: 100,
            failure_policy: FailurePolicy::FailFast,
        }
    }

    pub fn with_iterations(mut self, iterations_per_restart: usize) -> Self {
        self.iterations_per_restart = iterations_per_restart;
        self
    }

    pub fn with_failure_policy(mut self, failure_policy: FailurePolicy) -> Self {
        self.failure_policy = failure_policy;
        self
    }
}

/// Outcome of one restart, kept in the search report.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RestartSummary {
    pub index: usize,
    /// Objective value at the restart's final buffer.
    pub objective_value: f64,
    pub iterations: usize,
    pub outcome: DescentOutcome,
}

/// What a whole search did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchReport {
    pub id: SearchId,
    pub config: SearchConfig,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Restarts skipped under [`FailurePolicy::SkipFailed`].
    pub failed_restarts: usize,
    /// Summaries of the restarts that completed, in restart order.
    pub restarts: Vec<RestartSummary>,
}

/// Best local optimum found by a search. Treat as immutable once produced:
/// `parameters` is the winning restart's buffer itself, not a copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub parameters: Vec<f64>,
    /// Objective value at `parameters`; never worse than any completed
    /// restart's final value.
    pub objective_value: f64,
    /// Which restart won. Ties break toward the lowest index.
    pub restart_index: usize,
    pub report: SearchReport,
}

struct RestartRun {
    index: usize,
    parameters: Vec<f64>,
    value: f64,
    report: DescentReport,
}

/// Runs many independent descent executions in parallel from varied starting
/// points and returns the best local optimum found.
///
/// Every restart owns a private buffer; nothing is shared across restarts
/// except the objective, the scratch pool, and the cancellation token. The
/// `init` callbacks run sequentially in restart order before the parallel
/// region, so seeded initializers produce the same buffers regardless of
/// scheduling.
pub struct RestartSearch<O, I, F> {
    config: SearchConfig,
    objective: O,
    init: I,
    descent_factory: F,
    pool: BufferPool,
    cancel: CancelToken,
    logger: Option<Arc<dyn ProgressLogger>>,
}

impl<O, I, F> RestartSearch<O, I, F>
where
    O: Objective,
    I: Fn(&mut dyn ParamsMut) + Sync,
    F: Fn(usize) -> Descent + Sync,
{
    /// A new coordinator. `init` fills each candidate buffer before its run;
    /// `descent_factory` builds the descent for a given restart index. The
    /// coordinator injects its own scratch pool, cancellation token, and
    /// per-restart iteration budget into every descent it runs.
    pub fn new(config: SearchConfig, objective: O, init: I, descent_factory: F) -> Self {
        Self {
            config,
            objective,
            init,
            descent_factory,
            pool: BufferPool::new(),
            cancel: CancelToken::new(),
            logger: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Receive per-iteration progress events from every restart. The logger
    /// is shared across parallel runs, so it must serialize its own output.
    pub fn with_logger(mut self, logger: Arc<dyn ProgressLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Run the whole search.
    ///
    /// Under [`FailurePolicy::FailFast`] sibling restarts still run to
    /// completion before the failure surfaces; fail-fast refers to the
    /// returned error, not to preemption of in-flight work.
    pub fn run(&self) -> DsResult<SearchResult> {
        if self.config.restarts == 0 {
            return Err(SearchError::NoRestarts.into());
        }
        if self.config.dimensions == 0 {
            return Err(SearchError::NoDimensions.into());
        }

        let id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(
            %id,
            restarts = self.config.restarts,
            dimensions = self.config.dimensions,
            "starting multi-restart search"
        );

        let mut buffers = Vec::with_capacity(self.config.restarts);
        for _ in 0..self.config.restarts {
            let mut buffer = vec![0.0; self.config.dimensions];
            (self.init)(&mut buffer);
            buffers.push(buffer);
        }

        let runs: Vec<DsResult<RestartRun>> = buffers
            .into_par_iter()
            .enumerate()
            .map(|(index, buffer)| self.run_restart(index, buffer))
            .collect();

        // Reduce in restart order so ties break toward the lowest index.
        let mut best: Option<RestartRun> = None;
        let mut summaries = Vec::with_capacity(self.config.restarts);
        let mut failed_restarts = 0;
        for (index, run) in runs.into_iter().enumerate() {
            match run {
                Ok(run) => {
                    summaries.push(RestartSummary {
                        index: run.index,
                        objective_value: run.value,
                        iterations: run.report.iterations,
                        outcome: run.report.outcome,
                    });
                    if best.as_ref().map_or(true, |b| run.value < b.value) {
                        best = Some(run);
                    }
                }
                Err(error) => match self.config.failure_policy {
                    FailurePolicy::FailFast => {
                        return Err(SearchError::restart(index, error).into());
                    }
                    FailurePolicy::SkipFailed => {
                        warn!(restart = index, %error, "restart failed, skipping");
                        failed_restarts += 1;
                    }
                },
            }
        }

        let best = best.ok_or(SearchError::AllRestartsFailed {
            restarts: self.config.restarts,
        })?;
        let finished_at = Utc::now();
        info!(
            %id,
            best_restart = best.index,
            best_value = best.value,
            "search finished"
        );

        Ok(SearchResult {
            parameters: best.parameters,
            objective_value: best.value,
            restart_index: best.index,
            report: SearchReport {
                id,
                config: self.config,
                started_at,
                finished_at,
                failed_restarts,
                restarts: summaries,
            },
        })
    }

    fn run_restart(&self, index: usize, mut buffer: Vec<f64>) -> DsResult<RestartRun> {
        let mut descent = (self.descent_factory)(index)
            .with_max_iterations(self.config.iterations_per_restart)
            .with_pool(self.pool.clone())
            .with_cancel(self.cancel.clone());
        if let Some(logger) = &self.logger {
            descent = descent.with_logger(Arc::clone(logger));
        }

        let report = descent.run(&self.objective, &mut buffer)?;
        // Re-evaluate the final buffer so the winner comparison uses the
        // objective itself rather than the loop's bookkeeping.
        let value = checked_value(&self.objective, &buffer)?;
        debug!(
            restart = index,
            value,
            iterations = report.iterations,
            "restart finished"
        );

        Ok(RestartRun {
            index,
            parameters: buffer,
            value,
            report,
        })
    }
}

// ---------------------------------------------------------------------------
// Initializer helpers
// ---------------------------------------------------------------------------

/// Uniform random initializer over `[low, high)` using the thread RNG.
pub fn uniform_init(low: f64, high: f64) -> impl Fn(&mut dyn ParamsMut) + Sync {
    move |params| {
        let mut rng = rand::thread_rng();
        for i in 0..params.len() {
            params.set(i, rng.gen_range(low..high));
        }
    }
}

/// Deterministic uniform initializer over `[low, high)`.
///
/// All restarts draw from one seeded stream; because the coordinator invokes
/// initializers sequentially in restart order, a fixed seed reproduces the
/// same starting buffers on every run.
pub fn seeded_uniform_init(low: f64, high: f64, seed: u64) -> impl Fn(&mut dyn ParamsMut) + Sync {
    let rng = Mutex::new(ChaCha8Rng::seed_from_u64(seed));
    move |params| {
        let mut rng = rng.lock();
        for i in 0..params.len() {
            params.set(i, rng.gen_range(low..high));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descent::DescentConfig;
    use crate::step::{AdamStep, NormalizedStep};
    use approx::assert_abs_diff_eq;
    use ds_types::{DsError, Params};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// f(x0, x1) = (x0 - 3)^2 + (x1 + 2)^2, minimized at (3, -2).
    fn offset_bowl(p: &dyn Params) -> f64 {
        (p.get(0) - 3.0).powi(2) + (p.get(1) + 2.0).powi(2)
    }

    fn bowl_search(
        config: SearchConfig,
        seed: u64,
    ) -> RestartSearch<
        impl Fn(&dyn Params) -> f64 + Sync,
        impl Fn(&mut dyn ParamsMut) + Sync,
        impl Fn(usize) -> Descent + Sync,
    > {
        RestartSearch::new(
            config,
            |p: &dyn Params| offset_bowl(p),
            seeded_uniform_init(-5.0, 5.0, seed),
            |_| {
                Descent::new(
                    NormalizedStep,
                    DescentConfig::default().with_theta(0.0001),
                )
            },
        )
    }

    #[test]
    fn finds_the_bowl_minimum_from_many_starts() {
        let config = SearchConfig::new(2, 8).with_iterations(500);
        let result = bowl_search(config, 42).run().unwrap();

        assert!(result.objective_value < 0.001);
        assert_abs_diff_eq!(result.parameters[0], 3.0, epsilon = 0.1);
        assert_abs_diff_eq!(result.parameters[1], -2.0, epsilon = 0.1);
        assert_eq!(result.report.restarts.len(), 8);
    }

    #[test]
    fn result_is_never_worse_than_any_restart() {
        let config = SearchConfig::new(2, 6).with_iterations(50);
        let result = bowl_search(config, 7).run().unwrap();

        for summary in &result.report.restarts {
            assert!(
                result.objective_value <= summary.objective_value,
                "restart {} beat the returned result",
                summary.index
            );
        }
    }

    #[test]
    fn ties_break_toward_the_lowest_restart_index() {
        // Constant objective: every restart converges immediately to the
        // same value, so the winner must be restart 0.
        let config = SearchConfig::new(3, 5);
        let search = RestartSearch::new(
            config,
            |_: &dyn Params| 7.0,
            |p: &mut dyn ParamsMut| {
                for i in 0..p.len() {
                    p.set(i, i as f64);
                }
            },
            |_| Descent::new(NormalizedStep, DescentConfig::default()),
        );

        let result = search.run().unwrap();
        assert_eq!(result.restart_index, 0);
        assert_eq!(result.objective_value, 7.0);
    }

    #[test]
    fn seeded_searches_are_reproducible() {
        let config = SearchConfig::new(2, 4).with_iterations(200);
        let first = bowl_search(config, 1234).run().unwrap();
        let second = bowl_search(config, 1234).run().unwrap();

        assert_eq!(first.parameters, second.parameters);
        assert_eq!(first.objective_value, second.objective_value);
        assert_eq!(first.restart_index, second.restart_index);
    }

    #[test]
    fn adam_factory_works_per_restart() {
        let config = SearchConfig::new(2, 4).with_iterations(500);
        let search = RestartSearch::new(
            config,
            |p: &dyn Params| offset_bowl(p),
            seeded_uniform_init(-5.0, 5.0, 99),
            |_| {
                Descent::new(
                    AdamStep::default(),
                    DescentConfig::default().with_theta(0.0001),
                )
            },
        );

        let result = search.run().unwrap();
        assert!(result.objective_value < 0.001);
    }

    /// NaN for x0 < 0; otherwise a bowl centered at (2, 2), far enough from
    /// the poisoned half-plane that healthy descents never cross into it.
    fn poisoned(p: &dyn Params) -> f64 {
        if p.get(0) < 0.0 {
            f64::NAN
        } else {
            (p.get(0) - 2.0).powi(2) + (p.get(1) - 2.0).powi(2)
        }
    }

    /// Restart 0 starts in the poisoned region, the rest start healthy.
    fn poisoned_init() -> impl Fn(&mut dyn ParamsMut) + Sync {
        let calls = AtomicUsize::new(0);
        move |p: &mut dyn ParamsMut| {
            let restart = calls.fetch_add(1, Ordering::Relaxed);
            let start = if restart == 0 { -1.0 } else { 1.0 };
            for i in 0..p.len() {
                p.set(i, start);
            }
        }
    }

    #[test]
    fn fail_fast_surfaces_the_lowest_failed_index() {
        let config = SearchConfig::new(2, 3);
        let search = RestartSearch::new(config, poisoned, poisoned_init(), |_| {
            Descent::new(NormalizedStep, DescentConfig::default())
        });

        match search.run() {
            Err(DsError::Search(SearchError::RestartFailed { index: 0, .. })) => {}
            other => panic!("Expected RestartFailed at index 0, got {other:?}"),
        }
    }

    #[test]
    fn skip_failed_returns_the_best_healthy_restart() {
        let config = SearchConfig::new(2, 3).with_failure_policy(FailurePolicy::SkipFailed);
        let search = RestartSearch::new(config, poisoned, poisoned_init(), |_| {
            Descent::new(NormalizedStep, DescentConfig::default())
        });

        let result = search.run().unwrap();
        assert_eq!(result.report.failed_restarts, 1);
        assert_eq!(result.report.restarts.len(), 2);
        assert!(result.objective_value.is_finite());
    }

    #[test]
    fn all_restarts_failing_is_an_error_even_when_skipping() {
        let nan = |_: &dyn Params| f64::NAN;
        let config = SearchConfig::new(2, 3).with_failure_policy(FailurePolicy::SkipFailed);
        let search = RestartSearch::new(config, nan, uniform_init(-1.0, 1.0), |_| {
            Descent::new(NormalizedStep, DescentConfig::default())
        });

        match search.run() {
            Err(DsError::Search(SearchError::AllRestartsFailed { restarts: 3 })) => {}
            other => panic!("Expected AllRestartsFailed, got {other:?}"),
        }
    }

    #[test]
    fn cancelled_search_reports_without_descending() {
        let token = CancelToken::new();
        token.cancel();

        let config = SearchConfig::new(2, 4);
        let search = bowl_search(config, 5).with_cancel(token);
        let result = search.run().unwrap();

        for summary in &result.report.restarts {
            assert_eq!(summary.outcome, DescentOutcome::Cancelled);
            assert_eq!(summary.iterations, 0);
        }
    }

    #[test]
    fn degenerate_configs_are_rejected() {
        let quad = |p: &dyn Params| p.sum_squares();
        let factory = |_: usize| Descent::new(NormalizedStep, DescentConfig::default());

        let none = RestartSearch::new(SearchConfig::new(2, 0), quad, uniform_init(0.0, 1.0), factory);
        match none.run() {
            Err(DsError::Search(SearchError::NoRestarts)) => {}
            other => panic!("Expected NoRestarts, got {other:?}"),
        }

        let flat = RestartSearch::new(SearchConfig::new(0, 2), quad, uniform_init(0.0, 1.0), factory);
        match flat.run() {
            Err(DsError::Search(SearchError::NoDimensions)) => {}
            other => panic!("Expected NoDimensions, got {other:?}"),
        }
    }

    #[test]
    fn shared_logger_hears_every_restart() {
        struct Counting(AtomicUsize);
        impl ProgressLogger for Counting {
            fn on_iteration(&self, _iteration: usize, _error: f64) {
                self.0.fetch_add(1, Ordering::Relaxed);
            }
        }

        let logger = Arc::new(Counting(AtomicUsize::new(0)));
        let config = SearchConfig::new(2, 4).with_iterations(50);
        let search = bowl_search(config, 11).with_logger(logger.clone());
        let result = search.run().unwrap();

        let iterations: usize = result.report.restarts.iter().map(|s| s.iterations).sum();
        assert_eq!(logger.0.load(Ordering::Relaxed), iterations);
    }

    #[test]
    fn uniform_init_respects_bounds() {
        let init = uniform_init(0.5, 1.0);
        let mut buffer = vec![0.0; 50];
        init(&mut buffer);

        for v in &buffer {
            assert!((0.5..1.0).contains(v), "value out of bounds: {v}");
        }
    }

    #[test]
    fn seeded_init_is_deterministic() {
        let mut first = vec![0.0; 10];
        let mut second = vec![0.0; 10];
        seeded_uniform_init(-3.0, 3.0, 77)(&mut first);
        seeded_uniform_init(-3.0, 3.0, 77)(&mut second);

        assert_eq!(first, second);
        assert!(first.iter().all(|v| (-3.0..3.0).contains(v)));
    }
}
