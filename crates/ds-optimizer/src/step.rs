/// Turns a gradient vector into a parameter delta.
///
/// Rules are stateless across calls: whatever running state a rule needs is
/// local to one `compute` invocation.
pub trait StepRule: Send + Sync {
    /// Fill `delta` from `gradient` under the learning rate in effect.
    ///
    /// `gradient` and `delta` have the same length; the delta is later
    /// subtracted from the parameters component-wise.
    fn compute(&self, gradient: &[f64], learning_rate: f64, delta: &mut [f64]);

    /// Human-readable rule name.
    fn name(&self) -> &str;
}

impl<S: StepRule + ?Sized> StepRule for Box<S> {
    fn compute(&self, gradient: &[f64], learning_rate: f64, delta: &mut [f64]) {
        (**self).compute(gradient, learning_rate, delta)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Normalized-direction descent.
///
/// A non-zero delta always has Euclidean norm exactly equal to the learning
/// rate, decoupling step size from raw gradient magnitude. A zero-magnitude
/// gradient yields the zero delta.
#[derive(Debug, Clone, Copy, Default)]
pub struct NormalizedStep;

impl StepRule for NormalizedStep {
    fn compute(&self, gradient: &[f64], learning_rate: f64, delta: &mut [f64]) {
        debug_assert_eq!(gradient.len(), delta.len());

        let magnitude = gradient.iter().map(|g| g * g).sum::<f64>().sqrt();
        if magnitude == 0.0 {
            delta.fill(0.0);
            return;
        }

        let coefficient = learning_rate / magnitude;
        for (d, g) in delta.iter_mut().zip(gradient) {
            *d = g * coefficient;
        }
    }

    fn name(&self) -> &str {
        "normalized"
    }
}

/// Adam-style moment-based update.
///
/// By default a single first/second moment pair is threaded across dimensions
/// in index order and reset at the start of every call, so all dimensions
/// couple through one scalar pair and the timestep equals the dimension
/// ordinal. Set `shared_moments` to `false` for the textbook per-dimension
/// formulation; since moment state never carries across calls, every
/// dimension then sees timestep 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdamStep {
    pub beta1: f64,
    pub beta2: f64,
    pub epsilon: f64,
    pub shared_moments: bool,
}

impl Default for AdamStep {
    fn default() -> Self {
        Self {
            beta1: 0.9,
            beta2: 0.99,
            epsilon: 1e-6,
            shared_moments: true,
        }
    }
}

impl AdamStep {
    /// The textbook variant: independent moments per dimension.
    pub fn per_dimension() -> Self {
        Self {
            shared_moments: false,
            ..Self::default()
        }
    }
}

impl StepRule for AdamStep {
    fn compute(&self, gradient: &[f64], learning_rate: f64, delta: &mut [f64]) {
        debug_assert_eq!(gradient.len(), delta.len());

        let mut first = 0.0;
        let mut second = 0.0;
        let mut t: i32 = 0;
        for (d, &g) in delta.iter_mut().zip(gradient) {
            if self.shared_moments {
                t += 1;
            } else {
                first = 0.0;
                second = 0.0;
                t = 1;
            }
            first = self.beta1 * first + (1.0 - self.beta1) * g;
            second = self.beta2 * second + (1.0 - self.beta2) * g * g;

            // Bias-corrected estimates; at t=1 the correction cancels the
            // (1 - beta) factor exactly.
            let first_hat = first / (1.0 - self.beta1.powi(t));
            let second_hat = second / (1.0 - self.beta2.powi(t));

            *d = learning_rate * first_hat / (second_hat.sqrt() + self.epsilon);
        }
    }

    fn name(&self) -> &str {
        "adam"
    }
}
