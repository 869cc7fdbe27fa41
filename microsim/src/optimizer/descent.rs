//! Gradient descent with central finite differences and backtracking.

use crate::parameters::{ParameterDescriptor, ParameterId, ParameterOwner, ParameterRegistry};

use super::search::{
    finite_cost, run_masked_search, CostFunction, SearchError, SearchOutcome, SearchProcedure,
};
use super::{CancelFlag, FitModel, Optimizer, OptimizerKind, RunReport};

pub const ITERATIONS: ParameterId = ParameterId::new("descent_iterations");
pub const STEP_SIZE: ParameterId = ParameterId::new("descent_step_size");
pub const DERIVATIVE_EPSILON: ParameterId = ParameterId::new("descent_derivative_epsilon");
pub const TOLERANCE: ParameterId = ParameterId::new("descent_tolerance");

/// Backtracking gives up after this many halvings
const MAX_HALVINGS: usize = 20;

/// Steepest descent along the normalized finite-difference gradient.
///
/// Each iteration tries a step of the current length, halving it up to
/// [`MAX_HALVINGS`] times until the cost decreases; an accepted step doubles
/// the length tried next. Converges when no decreasing step exists or the
/// decrease falls below the tolerance.
#[derive(Debug, Clone)]
pub struct GradientDescentOptimizer {
    parameters: ParameterRegistry,
}

impl Default for GradientDescentOptimizer {
    fn default() -> Self {
        Self::new()
    }
}

impl GradientDescentOptimizer {
    pub fn new() -> Self {
        let mut parameters = ParameterRegistry::new(ParameterOwner::Optimizer);
        parameters.register(
            ParameterDescriptor::integer(ITERATIONS, "Iterations", 100.0, "")
                .with_range(0.0, 1e9)
                .fixed(),
        );
        parameters.register(
            ParameterDescriptor::double(STEP_SIZE, "Step size", 1.0, "")
                .with_range(0.0, f64::MAX)
                .fixed(),
        );
        parameters.register(
            ParameterDescriptor::double(DERIVATIVE_EPSILON, "Derivative epsilon", 1e-3, "")
                .with_range(f64::MIN_POSITIVE, f64::MAX)
                .fixed(),
        );
        parameters.register(
            ParameterDescriptor::double(TOLERANCE, "Tolerance", 1e-9, "")
                .with_range(0.0, f64::MAX)
                .fixed(),
        );
        Self { parameters }
    }

    fn setting(&self, id: ParameterId) -> f64 {
        self.parameters.value(id).unwrap_or(0.0)
    }

    fn gradient(&self, x: &[f64], cost: &mut dyn CostFunction) -> Result<Vec<f64>, SearchError> {
        let epsilon = self.setting(DERIVATIVE_EPSILON);
        let mut probe = x.to_vec();
        let mut gradient = Vec::with_capacity(x.len());
        for i in 0..x.len() {
            let h = epsilon * x[i].abs().max(1.0);
            probe[i] = x[i] + h;
            let forward = finite_cost(cost, &probe)?;
            probe[i] = x[i] - h;
            let backward = finite_cost(cost, &probe)?;
            probe[i] = x[i];
            gradient.push((forward - backward) / (2.0 * h));
        }
        Ok(gradient)
    }
}

impl SearchProcedure for GradientDescentOptimizer {
    fn minimize(
        &mut self,
        x0: &[f64],
        cost: &mut dyn CostFunction,
        cancel: &CancelFlag,
    ) -> Result<SearchOutcome, SearchError> {
        let max_iterations = self.setting(ITERATIONS) as usize;
        let tolerance = self.setting(TOLERANCE);
        let mut step = self.setting(STEP_SIZE);

        let mut x = x0.to_vec();
        let mut f = finite_cost(cost, &x)?;
        let outcome = |best: Vec<f64>, cost: f64, iterations: usize, converged: bool, cancelled: bool| {
            SearchOutcome {
                best,
                cost,
                iterations,
                converged,
                cancelled,
            }
        };

        for iteration in 0..max_iterations {
            if cancel.is_cancelled() {
                return Ok(outcome(x, f, iteration, false, true));
            }

            let gradient = self.gradient(&x, cost)?;
            let norm = gradient.iter().map(|g| g * g).sum::<f64>().sqrt();
            if norm == 0.0 {
                return Ok(outcome(x, f, iteration, true, false));
            }

            let mut accepted = None;
            for _ in 0..=MAX_HALVINGS {
                let trial: Vec<f64> = x
                    .iter()
                    .zip(&gradient)
                    .map(|(xi, gi)| xi - step * gi / norm)
                    .collect();
                let trial_cost = finite_cost(cost, &trial)?;
                if trial_cost < f {
                    accepted = Some((trial, trial_cost));
                    break;
                }
                step *= 0.5;
            }

            let Some((trial, trial_cost)) = accepted else {
                return Ok(outcome(x, f, iteration, true, false));
            };
            let decrease = f - trial_cost;
            x = trial;
            f = trial_cost;
            log::debug!(
                "Gradient descent iteration {}: cost {f:.6e}, step {step:.3e}",
                iteration + 1
            );

            if decrease < tolerance {
                return Ok(outcome(x, f, iteration + 1, true, false));
            }
            step *= 2.0;
        }

        Ok(outcome(x, f, max_iterations, false, false))
    }
}

impl Optimizer for GradientDescentOptimizer {
    fn kind(&self) -> OptimizerKind {
        OptimizerKind::GradientDescent
    }

    fn parameters(&self) -> &ParameterRegistry {
        &self.parameters
    }

    fn parameters_mut(&mut self) -> &mut ParameterRegistry {
        &mut self.parameters
    }

    fn run(&mut self, model: &mut dyn FitModel, cancel: &CancelFlag) -> RunReport {
        run_masked_search(self.name(), model, self, cancel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_minimizes_shifted_quadratic() {
        let mut optimizer = GradientDescentOptimizer::new();
        optimizer.parameters_mut().set_by_id(ITERATIONS, 500.0).unwrap();
        let mut cost = |x: &[f64]| -> Result<f64, SearchError> {
            Ok((x[0] - 3.0).powi(2) + 4.0 * (x[1] + 1.0).powi(2))
        };
        let outcome = optimizer
            .minimize(&[0.0, 0.0], &mut cost, &CancelFlag::new())
            .unwrap();
        assert!(outcome.converged);
        assert_relative_eq!(outcome.best[0], 3.0, epsilon = 1e-3);
        assert_relative_eq!(outcome.best[1], -1.0, epsilon = 1e-3);
    }

    #[test]
    fn test_non_finite_cost_fails() {
        let mut optimizer = GradientDescentOptimizer::new();
        let mut cost = |x: &[f64]| -> Result<f64, SearchError> { Ok((x[0] - 1.0).ln()) };
        let result = optimizer.minimize(&[0.0], &mut cost, &CancelFlag::new());
        assert!(matches!(result, Err(SearchError::NonFiniteCost(_))));
    }

    #[test]
    fn test_cancelled_before_first_iteration() {
        let mut optimizer = GradientDescentOptimizer::new();
        let cancel = CancelFlag::new();
        cancel.cancel();
        let mut cost = |x: &[f64]| -> Result<f64, SearchError> { Ok(x[0] * x[0]) };
        let outcome = optimizer.minimize(&[2.0], &mut cost, &cancel).unwrap();
        assert!(outcome.cancelled);
        assert_eq!(outcome.iterations, 0);
        assert_eq!(outcome.best, vec![2.0]);
    }

    #[test]
    fn test_tuning_values_are_never_optimizable() {
        let optimizer = GradientDescentOptimizer::new();
        let names: Vec<&str> = optimizer
            .parameters()
            .descriptors()
            .iter()
            .map(|d| d.name.as_str())
            .collect();
        assert_eq!(names, ["Iterations", "Step size", "Derivative epsilon", "Tolerance"]);
        assert!((0..4).all(|i| !optimizer.parameters().is_optimizable(i)));
    }
}
