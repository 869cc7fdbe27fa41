//! Masked parameter search shared by the generic strategies.
//!
//! A [`SearchProcedure`] minimizes a cost over a plain `Vec<f64>`. The masked
//! driver [`run_masked_search`] reduces the model's parameter vector to its
//! active entries, hands the procedure a cost closure that scatters trial
//! points back into the model, and either commits the best point or restores
//! the vector captured at the start.

use thiserror::Error;

use super::{CancelFlag, FitModel, RunReport, RunState};

/// Errors raised inside a search procedure
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SearchError {
    #[error("Cost evaluated to non-finite value {0}")]
    NonFiniteCost(f64),
    #[error("Cost evaluation failed: {0}")]
    Evaluation(String),
}

/// Objective seen by a search procedure
pub trait CostFunction {
    fn cost(&mut self, x: &[f64]) -> Result<f64, SearchError>;
}

impl<F> CostFunction for F
where
    F: FnMut(&[f64]) -> Result<f64, SearchError>,
{
    fn cost(&mut self, x: &[f64]) -> Result<f64, SearchError> {
        self(x)
    }
}

/// Evaluate `cost` and reject non-finite results
pub fn finite_cost(cost: &mut dyn CostFunction, x: &[f64]) -> Result<f64, SearchError> {
    let value = cost.cost(x)?;
    if value.is_finite() {
        Ok(value)
    } else {
        Err(SearchError::NonFiniteCost(value))
    }
}

/// Result of a search that did not fail
#[derive(Debug, Clone, PartialEq)]
pub struct SearchOutcome {
    pub best: Vec<f64>,
    pub cost: f64,
    pub iterations: usize,
    pub converged: bool,
    pub cancelled: bool,
}

/// Unconstrained minimizer over a reduced parameter vector
pub trait SearchProcedure {
    fn minimize(
        &mut self,
        x0: &[f64],
        cost: &mut dyn CostFunction,
        cancel: &CancelFlag,
    ) -> Result<SearchOutcome, SearchError>;
}

/// Run `search` over the active entries of `model`.
///
/// # Arguments
/// * `name` - Strategy name for log messages
/// * `model` - Model whose masked, optimizable parameters are searched
/// * `search` - The search procedure
/// * `cancel` - Checked by the procedure between iterations
///
/// # Returns
/// A report in a terminal state. Only the best point is written back; on
/// failure the active entries are restored to their starting values.
pub fn run_masked_search(
    name: &str,
    model: &mut dyn FitModel,
    search: &mut dyn SearchProcedure,
    cancel: &CancelFlag,
) -> RunReport {
    if !model.has_reference() {
        return RunReport::finished(RunState::Failed, "No reference image is bound", 0, None);
    }

    let active = model.active_indices();
    if active.is_empty() {
        return RunReport::finished(RunState::Converged, "No active parameters", 0, None);
    }

    let start = model.gather(&active);
    log::info!(
        "{name}: searching {} parameters ({})",
        active.len(),
        active
            .iter()
            .filter_map(|&i| model.parameter_name(i))
            .collect::<Vec<_>>()
            .join(", ")
    );

    let result = {
        let mut evaluate = |x: &[f64]| -> Result<f64, SearchError> {
            model
                .scatter(&active, x)
                .map_err(|e| SearchError::Evaluation(e.to_string()))?;
            model
                .evaluate_cost()
                .map_err(|e| SearchError::Evaluation(e.to_string()))
        };
        search.minimize(&start, &mut evaluate, cancel)
    };

    match result {
        Ok(outcome) => {
            if let Err(e) = model.scatter(&active, &outcome.best) {
                restore(model, &active, &start);
                return RunReport::finished(
                    RunState::Failed,
                    format!("Could not write the best point back: {e}"),
                    outcome.iterations,
                    None,
                );
            }
            let (state, message) = if outcome.cancelled {
                (RunState::IterationLimitReached, "cancelled".to_string())
            } else if outcome.converged {
                (RunState::Converged, format!("converged after {} iterations", outcome.iterations))
            } else {
                (RunState::IterationLimitReached, "iteration limit reached".to_string())
            };
            RunReport::finished(state, message, outcome.iterations, Some(outcome.cost))
        }
        Err(e) => {
            log::warn!("{name} failed: {e}");
            restore(model, &active, &start);
            RunReport::finished(RunState::Failed, e.to_string(), 0, None)
        }
    }
}

fn restore(model: &mut dyn FitModel, active: &[usize], values: &[f64]) {
    if let Err(e) = model.scatter(active, values) {
        log::warn!("Could not restore the starting parameters: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finite_cost_rejects_nan() {
        let mut nan = |_: &[f64]| -> Result<f64, SearchError> { Ok(f64::NAN) };
        assert!(matches!(
            finite_cost(&mut nan, &[0.0]),
            Err(SearchError::NonFiniteCost(v)) if v.is_nan()
        ));
        let mut square = |x: &[f64]| -> Result<f64, SearchError> { Ok(x[0] * x[0]) };
        assert_eq!(finite_cost(&mut square, &[3.0]), Ok(9.0));
    }
}
