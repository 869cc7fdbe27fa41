//! Common fixtures for microsim integration tests

#![allow(dead_code)]

use nalgebra::Vector3;

use microsim::geometry::{DomainKind, GeometricDomain, TriangleMesh};
use microsim::psf::SUMMED_INTENSITY;
use microsim::specimen::{FluorophoreProperty, MeshObject, PointSetObject};
use microsim::{ParameterVector, Simulation, SimulationConfig};

/// Photons per emitter, bright enough that costs sit well above the
/// optimizers' tolerances
pub const BRIGHT: f64 = 1e4;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Default imaging with a bright Gaussian kernel and no objects
pub fn bright_simulation() -> Simulation {
    let mut simulation = Simulation::with_cpu(SimulationConfig::default());
    simulation
        .kernel_mut()
        .parameters_mut()
        .set_by_id(SUMMED_INTENSITY, BRIGHT)
        .unwrap();
    simulation
}

/// A single bead at the origin
pub fn bead_simulation() -> Simulation {
    let mut simulation = bright_simulation();
    simulation.add_object(Box::new(PointSetObject::new("bead", &[Vector3::zeros()])));
    simulation
}

/// A 1 µm labelled square at the origin
pub fn sheet_simulation(density: f64, seed: u64) -> Simulation {
    let mut simulation = bright_simulation();
    let sheet = MeshObject::new(
        "sheet",
        GeometricDomain::Surface(TriangleMesh::rectangle(1000.0, 1000.0)),
    )
    .with_fluorophore(FluorophoreProperty::sampled(
        "membrane",
        0,
        DomainKind::Surface,
        density,
        seed,
    ));
    simulation.add_object(Box::new(sheet));
    simulation
}

/// Bind the current render as the reference
pub fn bind_current_render(simulation: &mut Simulation) {
    let image = simulation.synthesize_image().unwrap();
    simulation.set_reference(image);
}

/// Add `delta` to the named parameter and activate it
pub fn shift_and_activate(simulation: &mut Simulation, name: &str, delta: f64) -> usize {
    let index = simulation
        .find_parameter(name)
        .unwrap_or_else(|| panic!("no parameter named {name}"));
    let value = simulation.parameter(index).unwrap();
    simulation.set_parameter(index, value + delta).unwrap();
    assert!(simulation.set_mask(index, true));
    index
}

pub fn full_vector(simulation: &Simulation) -> Vec<f64> {
    (0..simulation.parameter_count())
        .map(|i| simulation.parameter(i).unwrap())
        .collect()
}
