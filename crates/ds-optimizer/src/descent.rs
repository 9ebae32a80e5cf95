use std::sync::Arc;

use ds_types::{DescentError, DsResult, Objective, Params, ParamsMut};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cancel::CancelToken;
use crate::gradient::FiniteDifference;
use crate::pool::BufferPool;
use crate::progress::{NoopLogger, ProgressLogger};
use crate::step::StepRule;

/// Tuning knobs for a single descent run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DescentConfig {
    /// Iteration budget.
    pub max_iterations: usize,

    /// Initial learning rate.
    pub learning_rate: f64,

    /// Convergence threshold on the per-iteration objective change.
    pub theta: f64,

    /// Multiplier applied to the learning rate after a rejected step.
    ///
    /// Configured independently of whichever step rule is active.
    pub backoff: f64,
}

impl Default for DescentConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            learning_rate: 1.0,
            theta: 0.001,
            backoff: 0.1,
        }
    }
}

impl DescentConfig {
    pub fn new(max_iterations: usize) -> Self {
        Self {
            max_iterations,
            ..Self::default()
        }
    }

    pub fn with_learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    pub fn with_theta(mut self, theta: f64) -> Self {
        self.theta = theta;
        self
    }

    pub fn with_backoff(mut self, backoff: f64) -> Self {
        self.backoff = backoff;
        self
    }
}

/// Terminal state of a descent run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DescentOutcome {
    /// The objective change fell within `theta`; the step just applied is kept.
    Converged,
    /// Iteration budget consumed.
    Exhausted,
    /// Cancellation observed at an iteration boundary.
    Cancelled,
}

/// Summary of a finished descent run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DescentReport {
    pub outcome: DescentOutcome,
    /// Iterations actually executed.
    pub iterations: usize,
    pub initial_value: f64,
    pub final_value: f64,
    /// Learning rate in effect when the run ended.
    pub final_learning_rate: f64,
}

/// Iterative descent driver: estimate a gradient, take a step, keep it if it
/// helped and roll it back otherwise.
///
/// The parameter buffer is mutated in place and never copied out; whatever
/// state it holds when `run` returns is the result.
pub struct Descent {
    config: DescentConfig,
    step_rule: Box<dyn StepRule>,
    estimator: FiniteDifference,
    pool: BufferPool,
    logger: Arc<dyn ProgressLogger>,
    cancel: CancelToken,
}

impl Descent {
    pub fn new(step_rule: impl StepRule + 'static, config: DescentConfig) -> Self {
        Self {
            config,
            step_rule: Box::new(step_rule),
            estimator: FiniteDifference::default(),
            pool: BufferPool::new(),
            logger: Arc::new(NoopLogger),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_estimator(mut self, estimator: FiniteDifference) -> Self {
        self.estimator = estimator;
        self
    }

    /// Share scratch buffers with other runs (the multi-restart coordinator
    /// injects its pool here).
    pub fn with_pool(mut self, pool: BufferPool) -> Self {
        self.pool = pool;
        self
    }

    pub fn with_logger(mut self, logger: Arc<dyn ProgressLogger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Override the iteration budget (the multi-restart coordinator owns it).
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.config.max_iterations = max_iterations;
        self
    }

    pub fn config(&self) -> &DescentConfig {
        &self.config
    }

    pub fn step_rule_name(&self) -> &str {
        self.step_rule.name()
    }

    /// Minimize `objective` by mutating `params` in place.
    ///
    /// Costs exactly `2 + N` objective evaluations per executed iteration:
    /// two at the loop level plus one per dimension inside gradient
    /// estimation. Rollback reuses the cached applied delta, so a rejected
    /// step restores the exact pre-step values.
    pub fn run<P, O>(&self, objective: &O, params: &mut P) -> DsResult<DescentReport>
    where
        P: ParamsMut + Sync,
        O: Objective,
    {
        if params.is_empty() {
            return Err(DescentError::EmptyParameters.into());
        }
        let dimensions = params.len();
        let mut gradient = self.pool.acquire(dimensions);
        let mut delta = self.pool.acquire(dimensions);

        debug!(
            rule = self.step_rule.name(),
            dimensions,
            max_iterations = self.config.max_iterations,
            "starting descent"
        );

        let mut learning_rate = self.config.learning_rate;
        let mut iterations = 0;
        let mut initial_value: Option<f64> = None;
        let mut last_value: Option<f64> = None;
        let mut outcome = DescentOutcome::Exhausted;

        for _ in 0..self.config.max_iterations {
            if self.cancel.is_cancelled() {
                outcome = DescentOutcome::Cancelled;
                break;
            }

            let before = checked_value(objective, params)?;
            initial_value.get_or_insert(before);

            self.estimator
                .estimate(objective, params, before, &mut gradient, &self.cancel)?;
            if self.cancel.is_cancelled() {
                // Partial gradient; leave the buffer at its last accepted
                // state and don't count the aborted iteration.
                outcome = DescentOutcome::Cancelled;
                last_value = Some(before);
                break;
            }
            iterations += 1;

            self.step_rule.compute(&gradient, learning_rate, &mut delta);
            apply_step(params, &delta);

            let after = checked_value(objective, params)?;
            self.logger.on_iteration(iterations, after);

            if (after - before).abs() <= self.config.theta {
                last_value = Some(after);
                outcome = DescentOutcome::Converged;
                break;
            }
            if after >= before {
                undo_step(params, &delta);
                learning_rate *= self.config.backoff;
                debug!(iteration = iterations, learning_rate, "step rejected, rolled back");
                last_value = Some(before);
            } else {
                last_value = Some(after);
            }
        }

        // A zero-budget or immediately cancelled run never evaluated.
        let initial_value = match initial_value {
            Some(value) => value,
            None => checked_value(objective, params)?,
        };
        let final_value = last_value.unwrap_or(initial_value);

        Ok(DescentReport {
            outcome,
            iterations,
            initial_value,
            final_value,
            final_learning_rate: learning_rate,
        })
    }
}

/// Evaluate and reject non-finite objective values.
pub(crate) fn checked_value<P, O>(objective: &O, params: &P) -> DsResult<f64>
where
    P: Params,
    O: Objective,
{
    let value = objective.value(params as &dyn Params);
    if !value.is_finite() {
        return Err(DescentError::NonFiniteObjective { value }.into());
    }
    Ok(value)
}

/// Apply `delta` in place. Zero components are skipped, so apply and undo
/// touch exactly the same indices.
fn apply_step<P: ParamsMut>(params: &mut P, delta: &[f64]) {
    for (i, &d) in delta.iter().enumerate() {
        if d == 0.0 {
            continue;
        }
        params.set(i, params.get(i) - d);
    }
}

/// Undo a previously applied `delta` using the same cached values.
fn undo_step<P: ParamsMut>(params: &mut P, delta: &[f64]) {
    for (i, &d) in delta.iter().enumerate() {
        if d == 0.0 {
            continue;
        }
        params.set(i, params.get(i) + d);
    }
}
