//! Direct repositioning of label points along the image gradient.

use crate::parameters::{ParameterDescriptor, ParameterId, ParameterOwner, ParameterRegistry};

use super::{CancelFlag, FitModel, Optimizer, OptimizerKind, RunReport, RunState};

pub const ITERATIONS: ParameterId = ParameterId::new("point_gradient_iterations");
pub const LEARNING_RATE: ParameterId = ParameterId::new("point_gradient_learning_rate");
pub const TARGET_OBJECT: ParameterId = ParameterId::new("point_gradient_target_object");

/// Moves every point of one object by `learning rate × gradient` per
/// iteration. There is no scoring and no convergence test; the full budget
/// always runs.
#[derive(Debug, Clone)]
pub struct PointGradientOptimizer {
    parameters: ParameterRegistry,
}

impl Default for PointGradientOptimizer {
    fn default() -> Self {
        Self::new()
    }
}

impl PointGradientOptimizer {
    pub fn new() -> Self {
        let mut parameters = ParameterRegistry::new(ParameterOwner::Optimizer);
        parameters.register(
            ParameterDescriptor::integer(ITERATIONS, "Iterations", 50.0, "")
                .with_range(0.0, 1e9)
                .fixed(),
        );
        parameters.register(
            ParameterDescriptor::double(LEARNING_RATE, "Learning rate", 20.0, "")
                .fixed(),
        );
        parameters.register(
            ParameterDescriptor::integer(TARGET_OBJECT, "Target object", 0.0, "")
                .with_range(0.0, 1e9)
                .fixed(),
        );
        Self { parameters }
    }

    /// Point at the object whose points are repositioned
    pub fn with_target(mut self, object_index: usize) -> Self {
        if let Err(e) = self.parameters.set_by_id(TARGET_OBJECT, object_index as f64) {
            log::warn!("Could not set target object: {e}");
        }
        self
    }

    pub fn target_object(&self) -> usize {
        self.parameters.value(TARGET_OBJECT).unwrap_or(0.0) as usize
    }

    fn iterations(&self) -> usize {
        self.parameters.value(ITERATIONS).unwrap_or(0.0) as usize
    }

    fn learning_rate(&self) -> f64 {
        self.parameters.value(LEARNING_RATE).unwrap_or(0.0)
    }
}

impl Optimizer for PointGradientOptimizer {
    fn kind(&self) -> OptimizerKind {
        OptimizerKind::PointGradient
    }

    fn parameters(&self) -> &ParameterRegistry {
        &self.parameters
    }

    fn parameters_mut(&mut self) -> &mut ParameterRegistry {
        &mut self.parameters
    }

    fn run(&mut self, model: &mut dyn FitModel, cancel: &CancelFlag) -> RunReport {
        let target = self.target_object();
        if !model.has_reference() {
            return RunReport::finished(RunState::Failed, "No reference image is bound", 0, None);
        }
        match model.supports_point_forces(target) {
            None => {
                return RunReport::finished(
                    RunState::Failed,
                    format!("No specimen object with index {target}"),
                    0,
                    None,
                )
            }
            Some(false) => {
                return RunReport::finished(
                    RunState::Failed,
                    format!("Object {target} does not support point forces"),
                    0,
                    None,
                )
            }
            Some(true) => {}
        }

        let budget = self.iterations();
        let rate = self.learning_rate();
        for iteration in 0..budget {
            if cancel.is_cancelled() {
                return RunReport::finished(
                    RunState::IterationLimitReached,
                    "cancelled",
                    iteration,
                    None,
                );
            }

            let gradient = match model.point_gradient(target) {
                Ok(gradient) => gradient,
                Err(e) => {
                    return RunReport::finished(RunState::Failed, e.to_string(), iteration, None)
                }
            };

            for (point, g) in gradient.gradients.iter().enumerate() {
                if !model.apply_point_forces(target, point, &(g * rate)) {
                    log::warn!("Object {target} rejected the displacement of point {point}");
                }
            }
            log::debug!(
                "Point gradient iteration {}: largest gradient {:.3e}",
                iteration + 1,
                gradient.max_norm()
            );
        }

        RunReport::finished(
            RunState::IterationLimitReached,
            format!("moved points for {budget} iterations"),
            budget,
            None,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let optimizer = PointGradientOptimizer::new();
        assert_eq!(optimizer.iterations(), 50);
        assert_eq!(optimizer.learning_rate(), 20.0);
        assert_eq!(optimizer.target_object(), 0);
        assert_eq!(optimizer.with_target(3).target_object(), 3);
    }
}
