use crate::params::Params;

/// The scalar function being minimized.
///
/// Implementations must be pure: the result may depend only on the view they
/// are given, never on hidden mutable state. The engine calls objectives
/// concurrently from independent tasks on independent views during gradient
/// estimation and multi-restart search, so this is a correctness precondition,
/// not a style preference. Objectives must not mutate the view they receive;
/// the engine only ever hands them read access.
pub trait Objective: Sync {
    /// Evaluate the objective at `params`.
    fn value(&self, params: &dyn Params) -> f64;
}

impl<F> Objective for F
where
    F: Fn(&dyn Params) -> f64 + Sync,
{
    fn value(&self, params: &dyn Params) -> f64 {
        self(params)
    }
}
