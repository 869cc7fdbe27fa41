//! End-to-end fitting runs against references rendered by the simulation itself

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use nalgebra::Vector3;

use common::{
    bead_simulation, bind_current_render, full_vector, init_logging, sheet_simulation,
    shift_and_activate,
};
use microsim::config::ImagingConfig;
use microsim::optimizer::{
    descent, point_gradient, GradientDescentOptimizer, NelderMeadOptimizer,
    PointGradientOptimizer,
};
use microsim::psf::KernelProvider;
use microsim::specimen::{PointSetObject, SpecimenObject};
use microsim::synth::{ImageSynthesizer, LabelBatch, PointGradient, SynthesisError};
use microsim::{CancelFlag, Optimizer, ParameterVector, RunState, Simulation, SimulationConfig};
use shared::Volume;

#[test]
fn test_all_false_mask_converges_without_touching_the_vector() {
    init_logging();
    let mut simulation = sheet_simulation(100.0, 3);
    bind_current_render(&mut simulation);
    let before = full_vector(&simulation);

    let mut optimizer = GradientDescentOptimizer::new();
    let report = simulation.start_optimization(&mut optimizer, None);

    assert_eq!(report.state, RunState::Converged);
    assert_eq!(report.iterations, 0);
    assert_eq!(full_vector(&simulation), before);
}

#[test]
fn test_no_reference_scores_max_and_fails_runs() {
    init_logging();
    let mut simulation = bead_simulation();
    assert_eq!(simulation.objective_function_value(), f64::MAX);

    shift_and_activate(&mut simulation, "bead/Point 0 X", 10.0);
    let mut optimizer = NelderMeadOptimizer::new();
    let report = simulation.start_optimization(&mut optimizer, None);
    assert_eq!(report.state, RunState::Failed);

    let mut optimizer = PointGradientOptimizer::new();
    let report = simulation.start_optimization(&mut optimizer, None);
    assert_eq!(report.state, RunState::Failed);
}

#[test]
fn test_mask_rejects_non_optimizable_entries() {
    let mut simulation = sheet_simulation(100.0, 3);
    for name in [
        "Kernel/Kernel voxels X",
        "Kernel/Summed intensity",
        "sheet/Area",
        "sheet/membrane/Number of fluorophores",
    ] {
        let index = simulation.find_parameter(name).unwrap();
        assert!(!simulation.is_optimizable(index), "{name}");
        assert!(!simulation.set_mask(index, true), "{name}");
        assert!(!simulation.mask(index), "{name}");
    }
    let density = simulation.find_parameter("sheet/membrane/Density").unwrap();
    assert!(simulation.set_mask(density, true));
    assert_eq!(simulation.active_indices(), vec![density]);
}

#[test]
fn test_descent_recovers_shifted_bead() {
    init_logging();
    let mut simulation = bead_simulation();
    bind_current_render(&mut simulation);
    let x = shift_and_activate(&mut simulation, "bead/Point 0 X", 40.0);
    let shifted_cost = simulation.objective_function_value();

    let mut optimizer = GradientDescentOptimizer::new();
    let report = simulation.start_optimization(&mut optimizer, None);

    assert!(matches!(
        report.state,
        RunState::Converged | RunState::IterationLimitReached
    ));
    let recovered = simulation.parameter(x).unwrap();
    assert!(recovered.abs() < 1.0, "recovered x = {recovered}");
    assert!(report.best_cost.unwrap() < shifted_cost);
}

#[test]
fn test_poisson_descent_recovers_intensity_scale() {
    init_logging();
    let mut simulation = sheet_simulation(100.0, 5);
    simulation
        .set_active_objective_function_by_name("Poisson noise maximum likelihood")
        .unwrap();
    bind_current_render(&mut simulation);
    let truth_cost = simulation.objective_function_value();
    let scale = shift_and_activate(&mut simulation, "sheet/membrane/Intensity scale", 1.5);

    let mut optimizer = GradientDescentOptimizer::new();
    let report = simulation.start_optimization(&mut optimizer, None);

    assert_ne!(report.state, RunState::Failed, "{}", report.message);
    let fitted = simulation.parameter(scale).unwrap();
    assert!((fitted - 1.0).abs() < 0.05, "fitted scale = {fitted}");

    // A dark candidate is no match for the truth.
    simulation.set_parameter(scale, 0.0).unwrap();
    assert!(simulation.objective_function_value() > truth_cost);
}

#[test]
fn test_simplex_recovers_sheet_position() {
    init_logging();
    let mut simulation = sheet_simulation(100.0, 11);
    bind_current_render(&mut simulation);
    let x = shift_and_activate(&mut simulation, "sheet/Position X", 60.0);
    let y = shift_and_activate(&mut simulation, "sheet/Position Y", -45.0);

    let mut optimizer = NelderMeadOptimizer::new();
    let report = simulation.start_optimization(&mut optimizer, None);

    assert_ne!(report.state, RunState::Failed, "{}", report.message);
    assert!(simulation.parameter(x).unwrap().abs() < 2.0);
    assert!(simulation.parameter(y).unwrap().abs() < 2.0);
    // Only the active entries moved.
    let z = simulation.find_parameter("sheet/Position Z").unwrap();
    assert_eq!(simulation.parameter(z), Some(0.0));
}

#[test]
fn test_cancelled_run_keeps_start_point() {
    let mut simulation = bead_simulation();
    bind_current_render(&mut simulation);
    let x = shift_and_activate(&mut simulation, "bead/Point 0 X", 25.0);

    let cancel = CancelFlag::new();
    cancel.cancel();
    let mut optimizer = GradientDescentOptimizer::new();
    let report = simulation.start_optimization(&mut optimizer, Some(cancel));

    assert_eq!(report.state, RunState::IterationLimitReached);
    assert_eq!(report.message, "cancelled");
    assert_eq!(simulation.parameter(x), Some(25.0));
}

#[test]
fn test_degenerate_ncc_fails_and_restores() {
    let mut simulation = bead_simulation();
    // A constant reference has no variance to correlate against.
    simulation.set_reference(simulation.imaging().blank());
    simulation
        .set_active_objective_function_by_name("Normalized cross correlation")
        .unwrap();
    let x = shift_and_activate(&mut simulation, "bead/Point 0 X", 5.0);

    let mut optimizer = NelderMeadOptimizer::new();
    let report = simulation.start_optimization(&mut optimizer, None);

    assert_eq!(report.state, RunState::Failed);
    assert_eq!(simulation.parameter(x), Some(5.0));
    assert_eq!(simulation.objective_function_value(), f64::MAX);
}

#[test]
fn test_point_gradient_moves_bead_toward_truth() {
    init_logging();
    let mut simulation = bead_simulation();
    bind_current_render(&mut simulation);
    let x = simulation.find_parameter("bead/Point 0 X").unwrap();
    simulation.set_parameter(x, 60.0).unwrap();

    let mut optimizer = PointGradientOptimizer::new();
    let report = simulation.start_optimization(&mut optimizer, None);

    assert_eq!(report.state, RunState::IterationLimitReached);
    assert_eq!(report.iterations, 50);
    let moved = simulation.parameter(x).unwrap();
    assert!(moved.abs() < 60.0, "bead ended at x = {moved}");
}

#[test]
fn test_point_gradient_requires_point_forces() {
    let mut simulation = sheet_simulation(100.0, 3);
    bind_current_render(&mut simulation);

    let mut optimizer = PointGradientOptimizer::new();
    let report = simulation.start_optimization(&mut optimizer, None);
    assert_eq!(report.state, RunState::Failed);

    let mut optimizer = PointGradientOptimizer::new().with_target(4);
    let report = simulation.start_optimization(&mut optimizer, None);
    assert_eq!(report.state, RunState::Failed);
    assert_eq!(report.iterations, 0);
}

/// Renders nothing and reports a zero gradient for every bound point
#[derive(Debug, Default)]
struct ZeroGradientSynthesizer {
    gradient_calls: Arc<AtomicUsize>,
}

impl ImageSynthesizer for ZeroGradientSynthesizer {
    fn name(&self) -> &str {
        "zero"
    }

    fn render(
        &self,
        _batches: &[LabelBatch],
        _kernel: &KernelProvider,
        config: &ImagingConfig,
    ) -> Result<Volume, SynthesisError> {
        Ok(config.blank())
    }

    fn render_point_gradient(
        &self,
        batches: &[LabelBatch],
        _kernel: &KernelProvider,
        _config: &ImagingConfig,
        object_index: usize,
        _reference: &Volume,
    ) -> Result<PointGradient, SynthesisError> {
        self.gradient_calls.fetch_add(1, Ordering::SeqCst);
        let len = batches
            .iter()
            .filter(|b| b.object_index == object_index && b.point_bound)
            .map(|b| b.points.len())
            .max()
            .unwrap_or(0);
        Ok(PointGradient {
            object_index,
            gradients: vec![Vector3::zeros(); len],
        })
    }
}

#[test]
fn test_zero_gradient_leaves_points_in_place() {
    let synthesizer = ZeroGradientSynthesizer::default();
    let calls = synthesizer.gradient_calls.clone();
    let mut simulation = Simulation::new(SimulationConfig::default(), Box::new(synthesizer));
    let points = vec![Vector3::new(100.0, -50.0, 0.0), Vector3::new(-200.0, 0.0, 50.0)];
    simulation.add_object(Box::new(PointSetObject::new("beads", &points)));
    bind_current_render(&mut simulation);

    let mut optimizer = PointGradientOptimizer::new();
    let report = simulation.start_optimization(&mut optimizer, None);

    assert_eq!(report.state, RunState::IterationLimitReached);
    assert_eq!(report.iterations, 50);
    assert_eq!(calls.load(Ordering::SeqCst), 50);
    let geometry = simulation.object(0).unwrap().geometry();
    assert_eq!(geometry.vertices(), points.as_slice());
}

#[test]
fn test_tuning_values_are_editable_descriptors() {
    let mut simulation = bead_simulation();
    bind_current_render(&mut simulation);
    let x = shift_and_activate(&mut simulation, "bead/Point 0 X", 30.0);

    let mut optimizer = GradientDescentOptimizer::new();
    optimizer
        .parameters_mut()
        .set_by_id(descent::ITERATIONS, 2.0)
        .unwrap();
    let report = simulation.start_optimization(&mut optimizer, None);
    assert!(report.iterations <= 2);
    assert!(simulation.parameter(x).unwrap() < 30.0);

    let mut optimizer = PointGradientOptimizer::new();
    optimizer
        .parameters_mut()
        .set_by_id(point_gradient::ITERATIONS, 3.0)
        .unwrap();
    let report = simulation.start_optimization(&mut optimizer, None);
    assert_eq!(report.iterations, 3);
}
