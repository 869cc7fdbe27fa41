//! Fitting strategies and the run state machine.
//!
//! A run moves `Idle → Running → {Converged, IterationLimitReached, Failed}`.
//! Strategies never propagate errors: every failure of the search, the
//! synthesizer, the objective or the sampler ends the run in
//! [`RunState::Failed`] with a message.
//!
//! Two families are shipped:
//! * masked generic search over the active parameter entries
//!   ([`GradientDescentOptimizer`], [`NelderMeadOptimizer`])
//! * direct repositioning of label points along the image gradient
//!   ([`PointGradientOptimizer`])

pub mod descent;
pub mod point_gradient;
pub mod search;
pub mod simplex;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::parameters::{ParameterId, ParameterRegistry, ParameterVector};
use crate::simulation::SimulationError;
use crate::synth::PointGradient;
pub use descent::GradientDescentOptimizer;
pub use point_gradient::PointGradientOptimizer;
pub use search::{CostFunction, SearchError, SearchOutcome, SearchProcedure};
pub use simplex::NelderMeadOptimizer;

/// Optimization run states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    /// Constructed, not started
    Idle,
    /// Strategy is iterating
    Running,
    /// Convergence criterion met, or nothing to optimize
    Converged,
    /// Budget exhausted or run cancelled
    IterationLimitReached,
    /// Configuration or numerical error; see the report message
    Failed,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunState::Converged | RunState::IterationLimitReached | RunState::Failed
        )
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Idle => "idle",
            RunState::Running => "running",
            RunState::Converged => "converged",
            RunState::IterationLimitReached => "iteration limit reached",
            RunState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Outcome of a finished run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub state: RunState,
    pub message: String,
    pub iterations: usize,
    /// Cost at the committed point; `None` for strategies that never score
    pub best_cost: Option<f64>,
}

impl RunReport {
    pub fn finished(
        state: RunState,
        message: impl Into<String>,
        iterations: usize,
        best_cost: Option<f64>,
    ) -> Self {
        Self {
            state,
            message: message.into(),
            iterations,
            best_cost,
        }
    }
}

/// Shared cancellation request, checked between iterations
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// What a strategy may do to the model it fits
pub trait FitModel: ParameterVector {
    fn has_reference(&self) -> bool;

    /// Render the current parameters and score them against the reference
    fn evaluate_cost(&mut self) -> Result<f64, SimulationError>;

    /// Descent direction for every point of `object_index`
    fn point_gradient(&mut self, object_index: usize) -> Result<PointGradient, SimulationError>;

    /// `None` when no such object exists
    fn supports_point_forces(&self, object_index: usize) -> Option<bool>;

    fn apply_point_forces(
        &mut self,
        object_index: usize,
        point_index: usize,
        displacement: &Vector3<f64>,
    ) -> bool;
}

/// A fitting strategy with its tuning values as parameter descriptors
pub trait Optimizer: fmt::Debug {
    fn kind(&self) -> OptimizerKind;

    fn name(&self) -> &'static str {
        self.kind().name()
    }

    fn parameters(&self) -> &ParameterRegistry;

    fn parameters_mut(&mut self) -> &mut ParameterRegistry;

    /// Run to a terminal state
    fn run(&mut self, model: &mut dyn FitModel, cancel: &CancelFlag) -> RunReport;
}

/// Shipped strategies, selectable by name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OptimizerKind {
    GradientDescent,
    NelderMead,
    PointGradient,
}

impl OptimizerKind {
    pub const ALL: [OptimizerKind; 3] = [
        OptimizerKind::GradientDescent,
        OptimizerKind::NelderMead,
        OptimizerKind::PointGradient,
    ];

    pub fn name(self) -> &'static str {
        match self {
            OptimizerKind::GradientDescent => "Gradient descent",
            OptimizerKind::NelderMead => "Nelder-Mead simplex",
            OptimizerKind::PointGradient => "Point gradient",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    pub fn build(self) -> Box<dyn Optimizer> {
        match self {
            OptimizerKind::GradientDescent => Box::new(GradientDescentOptimizer::new()),
            OptimizerKind::NelderMead => Box::new(NelderMeadOptimizer::new()),
            OptimizerKind::PointGradient => Box::new(PointGradientOptimizer::new()),
        }
    }

    /// Descriptor holding the strategy's iteration budget
    pub fn iteration_budget(self) -> ParameterId {
        match self {
            OptimizerKind::GradientDescent => descent::ITERATIONS,
            OptimizerKind::NelderMead => simplex::ITERATIONS,
            OptimizerKind::PointGradient => point_gradient::ITERATIONS,
        }
    }
}

impl fmt::Display for OptimizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One optimization of one model by one strategy.
///
/// Holds the only mutable borrow of the model for its lifetime. `execute`
/// consumes the run, so a terminal run cannot be restarted.
pub struct OptimizationRun<'a> {
    model: &'a mut dyn FitModel,
    optimizer: &'a mut dyn Optimizer,
    cancel: CancelFlag,
    state: RunState,
}

impl<'a> OptimizationRun<'a> {
    pub fn new(model: &'a mut dyn FitModel, optimizer: &'a mut dyn Optimizer) -> Self {
        Self {
            model,
            optimizer,
            cancel: CancelFlag::new(),
            state: RunState::Idle,
        }
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn execute(mut self) -> RunReport {
        self.state = RunState::Running;
        let name = self.optimizer.name();
        log::info!(
            "{name}: starting with {} active parameters",
            self.model.active_indices().len()
        );

        let report = self.optimizer.run(self.model, &self.cancel);
        self.state = report.state;

        match report.state {
            RunState::Failed => log::warn!("{name}: {} ({})", report.state, report.message),
            _ => log::info!(
                "{name}: {} after {} iterations ({})",
                report.state,
                report.iterations,
                report.message
            ),
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names_round_trip() {
        for kind in OptimizerKind::ALL {
            assert_eq!(OptimizerKind::from_name(kind.name()), Some(kind));
            assert_eq!(kind.build().kind(), kind);
        }
        assert_eq!(OptimizerKind::from_name("Simulated annealing"), None);
    }

    #[test]
    fn test_iteration_budget_is_a_registered_descriptor() {
        for kind in OptimizerKind::ALL {
            let mut optimizer = kind.build();
            optimizer
                .parameters_mut()
                .set_by_id(kind.iteration_budget(), 7.0)
                .unwrap();
            assert_eq!(
                optimizer.parameters().value(kind.iteration_budget()),
                Some(7.0)
            );
        }
    }

    #[test]
    fn test_terminal_states() {
        assert!(!RunState::Idle.is_terminal());
        assert!(!RunState::Running.is_terminal());
        assert!(RunState::Converged.is_terminal());
        assert!(RunState::IterationLimitReached.is_terminal());
        assert!(RunState::Failed.is_terminal());
    }

    #[test]
    fn test_cancel_flag_is_shared_between_clones() {
        let flag = CancelFlag::new();
        let observer = flag.clone();
        assert!(!observer.is_cancelled());
        flag.cancel();
        assert!(observer.is_cancelled());
        observer.reset();
        assert!(!flag.is_cancelled());
    }
}
