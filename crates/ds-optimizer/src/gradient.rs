use ds_types::{DescentError, DsError, DsResult, Objective, Params, Perturbed};
use rayon::prelude::*;

use crate::cancel::CancelToken;

/// Forward-difference gradient estimator.
///
/// One objective evaluation per dimension: the estimate carries an O(epsilon)
/// bias compared to central differences, but costs N+1 evaluations per loop
/// iteration instead of 2N.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FiniteDifference {
    epsilon: f64,
}

impl Default for FiniteDifference {
    fn default() -> Self {
        Self { epsilon: 1e-6 }
    }
}

impl FiniteDifference {
    /// A new estimator with the given finite-difference step.
    ///
    /// `epsilon` must be strictly positive and stays constant for a run.
    pub fn new(epsilon: f64) -> Self {
        assert!(epsilon > 0.0, "finite-difference step must be positive");
        Self { epsilon }
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    /// Estimate the gradient of `objective` around `base` into `gradient`.
    ///
    /// `current` is the objective value at `base`, which the caller has
    /// already paid for. Every dimension runs as an independent rayon task
    /// over its own single-index overlay and writes a disjoint output slot,
    /// so no locking is involved; the objective must be safe to call
    /// concurrently on independent views. A non-finite objective value fails
    /// the whole estimate synchronously; there is no retry.
    pub fn estimate<P, O>(
        &self,
        objective: &O,
        base: &P,
        current: f64,
        gradient: &mut [f64],
        cancel: &CancelToken,
    ) -> DsResult<()>
    where
        P: Params + Sync,
        O: Objective,
    {
        if gradient.len() != base.len() {
            return Err(DescentError::DimensionMismatch {
                gradient: gradient.len(),
                parameters: base.len(),
            }
            .into());
        }

        gradient
            .par_iter_mut()
            .enumerate()
            .try_for_each(|(dimension, slot)| {
                if cancel.is_cancelled() {
                    // The caller observes the token right after this returns;
                    // the partial estimate is discarded, not applied.
                    return Ok(());
                }
                let nudged = Perturbed::new(base, dimension, base.get(dimension) + self.epsilon);
                let shifted = objective.value(&nudged);
                if !shifted.is_finite() {
                    return Err(DsError::from(DescentError::NonFiniteGradient {
                        value: shifted,
                        dimension,
                    }));
                }
                *slot = (shifted - current) / self.epsilon;
                Ok(())
            })
    }
}
