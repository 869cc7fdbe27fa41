//! Nelder–Mead downhill simplex.

use crate::parameters::{ParameterDescriptor, ParameterId, ParameterOwner, ParameterRegistry};

use super::search::{
    finite_cost, run_masked_search, CostFunction, SearchError, SearchOutcome, SearchProcedure,
};
use super::{CancelFlag, FitModel, Optimizer, OptimizerKind, RunReport};

pub const ITERATIONS: ParameterId = ParameterId::new("simplex_iterations");
pub const INITIAL_STEP: ParameterId = ParameterId::new("simplex_initial_step");
pub const TOLERANCE: ParameterId = ParameterId::new("simplex_tolerance");

/// Smallest initial edge of the simplex along any axis
const MIN_INITIAL_STEP: f64 = 1e-3;

const REFLECTION: f64 = 1.0;
const EXPANSION: f64 = 2.0;
const CONTRACTION: f64 = 0.5;
const SHRINK: f64 = 0.5;

/// Derivative-free simplex search; converged when the spread of costs across
/// the simplex falls below the tolerance
#[derive(Debug, Clone)]
pub struct NelderMeadOptimizer {
    parameters: ParameterRegistry,
}

impl Default for NelderMeadOptimizer {
    fn default() -> Self {
        Self::new()
    }
}

impl NelderMeadOptimizer {
    pub fn new() -> Self {
        let mut parameters = ParameterRegistry::new(ParameterOwner::Optimizer);
        parameters.register(
            ParameterDescriptor::integer(ITERATIONS, "Iterations", 200.0, "")
                .with_range(0.0, 1e9)
                .fixed(),
        );
        parameters.register(
            ParameterDescriptor::double(INITIAL_STEP, "Initial step", 0.05, "")
                .with_range(0.0, f64::MAX)
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
}

/// `centroid + coefficient · (centroid − worst)`
fn along(centroid: &[f64], worst: &[f64], coefficient: f64) -> Vec<f64> {
    centroid
        .iter()
        .zip(worst)
        .map(|(c, w)| c + coefficient * (c - w))
        .collect()
}

impl SearchProcedure for NelderMeadOptimizer {
    fn minimize(
        &mut self,
        x0: &[f64],
        cost: &mut dyn CostFunction,
        cancel: &CancelFlag,
    ) -> Result<SearchOutcome, SearchError> {
        let max_iterations = self.setting(ITERATIONS) as usize;
        let tolerance = self.setting(TOLERANCE);
        let fraction = self.setting(INITIAL_STEP);
        let n = x0.len();
        if n == 0 {
            return Ok(SearchOutcome {
                best: Vec::new(),
                cost: finite_cost(cost, x0)?,
                iterations: 0,
                converged: true,
                cancelled: false,
            });
        }

        let mut simplex: Vec<(Vec<f64>, f64)> = Vec::with_capacity(n + 1);
        simplex.push((x0.to_vec(), finite_cost(cost, x0)?));
        for i in 0..n {
            let mut vertex = x0.to_vec();
            vertex[i] += (fraction * x0[i].abs()).max(MIN_INITIAL_STEP);
            let value = finite_cost(cost, &vertex)?;
            simplex.push((vertex, value));
        }

        let mut iterations = 0;
        let mut converged = false;
        let mut cancelled = false;

        while iterations < max_iterations {
            simplex.sort_by(|a, b| a.1.total_cmp(&b.1));
            let best = simplex[0].1;
            let worst = simplex[n].1;
            if worst - best < tolerance {
                converged = true;
                break;
            }
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            iterations += 1;

            let mut centroid = vec![0.0; n];
            for (vertex, _) in &simplex[..n] {
                for (c, v) in centroid.iter_mut().zip(vertex) {
                    *c += v / n as f64;
                }
            }

            let worst_vertex = simplex[n].0.clone();
            let second_worst = simplex[n - 1].1;

            let reflected = along(&centroid, &worst_vertex, REFLECTION);
            let reflected_cost = finite_cost(cost, &reflected)?;

            if reflected_cost < best {
                let expanded = along(&centroid, &worst_vertex, EXPANSION);
                let expanded_cost = finite_cost(cost, &expanded)?;
                simplex[n] = if expanded_cost < reflected_cost {
                    (expanded, expanded_cost)
                } else {
                    (reflected, reflected_cost)
                };
            } else if reflected_cost < second_worst {
                simplex[n] = (reflected, reflected_cost);
            } else {
                let (contracted, contracted_cost) = if reflected_cost < worst {
                    let outside = along(&centroid, &worst_vertex, REFLECTION * CONTRACTION);
                    let value = finite_cost(cost, &outside)?;
                    (outside, value)
                } else {
                    let inside = along(&centroid, &worst_vertex, -CONTRACTION);
                    let value = finite_cost(cost, &inside)?;
                    (inside, value)
                };

                if contracted_cost < reflected_cost.min(worst) {
                    simplex[n] = (contracted, contracted_cost);
                } else {
                    let anchor = simplex[0].0.clone();
                    for (vertex, value) in simplex.iter_mut().skip(1) {
                        for (v, a) in vertex.iter_mut().zip(&anchor) {
                            *v = a + SHRINK * (*v - a);
                        }
                        *value = finite_cost(cost, vertex)?;
                    }
                }
            }

            log::debug!("Nelder-Mead iteration {iterations}: best cost {best:.6e}");
        }

        simplex.sort_by(|a, b| a.1.total_cmp(&b.1));
        let (best, cost) = simplex.swap_remove(0);
        Ok(SearchOutcome {
            best,
            cost,
            iterations,
            converged,
            cancelled,
        })
    }
}

impl Optimizer for NelderMeadOptimizer {
    fn kind(&self) -> OptimizerKind {
        OptimizerKind::NelderMead
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
    fn test_minimizes_quadratic() {
        let mut optimizer = NelderMeadOptimizer::new();
        optimizer.parameters_mut().set_by_id(ITERATIONS, 1000.0).unwrap();
        optimizer.parameters_mut().set_by_id(TOLERANCE, 1e-14).unwrap();
        let mut cost = |x: &[f64]| -> Result<f64, SearchError> {
            Ok((x[0] - 2.0).powi(2) + 10.0 * (x[1] - 0.5).powi(2) + (x[2] + 1.0).powi(2))
        };
        let outcome = optimizer
            .minimize(&[0.0, 0.0, 0.0], &mut cost, &CancelFlag::new())
            .unwrap();
        assert!(outcome.converged);
        assert_relative_eq!(outcome.best[0], 2.0, epsilon = 1e-4);
        assert_relative_eq!(outcome.best[1], 0.5, epsilon = 1e-4);
        assert_relative_eq!(outcome.best[2], -1.0, epsilon = 1e-4);
    }

    #[test]
    fn test_iteration_limit() {
        let mut optimizer = NelderMeadOptimizer::new();
        optimizer.parameters_mut().set_by_id(ITERATIONS, 3.0).unwrap();
        let mut cost = |x: &[f64]| -> Result<f64, SearchError> { Ok((x[0] - 100.0).powi(2)) };
        let outcome = optimizer.minimize(&[0.0], &mut cost, &CancelFlag::new()).unwrap();
        assert!(!outcome.converged);
        assert_eq!(outcome.iterations, 3);
        assert!(outcome.cost < 100.0 * 100.0);
    }

    #[test]
    fn test_initial_step_has_a_floor() {
        let mut optimizer = NelderMeadOptimizer::new();
        optimizer.parameters_mut().set_by_id(ITERATIONS, 0.0).unwrap();
        let mut probes = Vec::new();
        let mut cost = |x: &[f64]| -> Result<f64, SearchError> {
            probes.push(x[0]);
            Ok(x[0].abs())
        };
        optimizer.minimize(&[0.0], &mut cost, &CancelFlag::new()).unwrap();
        assert_eq!(probes, vec![0.0, MIN_INITIAL_STEP]);
    }
}
