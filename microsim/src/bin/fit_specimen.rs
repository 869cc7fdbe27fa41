//! Fit a synthetic specimen back to its own rendered image.
//!
//! Builds a labelled specimen, renders a ground-truth image (optionally with
//! photon and read noise) as the reference, shifts the specimen away from the
//! truth, and runs the chosen fitting strategy to recover it.
//!
//! Usage:
//! ```
//! cargo run --release --bin fit_specimen -- --strategy simplex --noise
//! cargo run --release --bin fit_specimen -- --shape points --strategy point-gradient --report fit.json
//! ```

use std::fs::File;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use nalgebra::Vector3;
use serde::Serialize;

use microsim::geometry::{DomainKind, GeometricDomain, TriangleMesh};
use microsim::parameters::ParameterSnapshot;
use microsim::psf::SUMMED_INTENSITY;
use microsim::specimen::{FluorophoreProperty, MeshObject, PointSetObject};
use microsim::{
    NoiseModel, Optimizer, OptimizerKind, ParameterVector, RunReport, Simulation,
    SimulationConfig,
};
use shared::algo::{init_worker_pool, WORKER_THREADS_ENV};
use shared::image_proc::{apply_gaussian_read_noise, apply_poisson_photon_noise};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Strategy {
    Descent,
    Simplex,
    PointGradient,
}

impl Strategy {
    fn kind(self) -> OptimizerKind {
        match self {
            Strategy::Descent => OptimizerKind::GradientDescent,
            Strategy::Simplex => OptimizerKind::NelderMead,
            Strategy::PointGradient => OptimizerKind::PointGradient,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Objective {
    Gaussian,
    Poisson,
    Ncc,
}

impl Objective {
    fn model(self) -> NoiseModel {
        match self {
            Objective::Gaussian => NoiseModel::Gaussian,
            Objective::Poisson => NoiseModel::Poisson,
            Objective::Ncc => NoiseModel::NormalizedCrossCorrelation,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Shape {
    /// Labelled 1 µm square sheet
    Rect,
    /// Three free beads
    Points,
}

#[derive(Parser)]
#[command(name = "fit_specimen")]
#[command(about = "Recover a shifted specimen from its synthesized image")]
#[command(version)]
struct Args {
    /// Fitting strategy
    #[arg(long, value_enum, default_value_t = Strategy::Simplex)]
    strategy: Strategy,

    /// Noise model used to score candidates
    #[arg(long, value_enum, default_value_t = Objective::Gaussian)]
    objective: Objective,

    /// Specimen to fit
    #[arg(long, value_enum, default_value_t = Shape::Rect)]
    shape: Shape,

    /// Label density of the sheet in labels per µm²
    #[arg(long, default_value_t = 100.0)]
    density: f64,

    /// Photons per emitter
    #[arg(long, default_value_t = 2000.0)]
    photons: f64,

    /// Distance the specimen is shifted from the truth (nm)
    #[arg(long, default_value_t = 60.0)]
    shift: f64,

    /// Override the strategy's iteration budget
    #[arg(long)]
    iterations: Option<usize>,

    /// Seed for label placement and noise
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Worker threads; defaults to one per core
    #[arg(long)]
    threads: Option<usize>,

    /// Add Poisson photon noise to the reference
    #[arg(long)]
    noise: bool,

    /// Standard deviation of Gaussian read noise added to the reference (counts)
    #[arg(long, default_value_t = 0.0)]
    read_noise: f64,

    /// Write a JSON report to this path instead of stdout
    #[arg(long)]
    report: Option<PathBuf>,
}

#[derive(Serialize)]
struct FitReport {
    strategy: &'static str,
    objective: &'static str,
    run: RunReport,
    initial_cost: f64,
    final_cost: f64,
    parameters: Vec<ParameterSnapshot>,
}

fn build_specimen(simulation: &mut Simulation, args: &Args) -> Vec<&'static str> {
    match args.shape {
        Shape::Rect => {
            let sheet = MeshObject::new(
                "sheet",
                GeometricDomain::Surface(TriangleMesh::rectangle(1000.0, 1000.0)),
            )
            .with_fluorophore(FluorophoreProperty::sampled(
                "membrane",
                0,
                DomainKind::Surface,
                args.density,
                args.seed,
            ));
            simulation.add_object(Box::new(sheet));
            vec!["sheet/Position X", "sheet/Position Y"]
        }
        Shape::Points => {
            let beads = PointSetObject::new(
                "beads",
                &[
                    Vector3::new(-400.0, -300.0, 0.0),
                    Vector3::new(250.0, 100.0, 0.0),
                    Vector3::new(0.0, 450.0, 0.0),
                ],
            );
            simulation.add_object(Box::new(beads));
            vec!["beads/Point 0 X", "beads/Point 1 Y", "beads/Point 2 X"]
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    if let Some(threads) = args.threads {
        std::env::set_var(WORKER_THREADS_ENV, threads.to_string());
    }
    init_worker_pool();

    let config = SimulationConfig {
        objective: args.objective.model(),
        ..SimulationConfig::default()
    };
    let mut simulation = Simulation::with_cpu(config);
    simulation
        .kernel_mut()
        .parameters_mut()
        .set_by_id(SUMMED_INTENSITY, args.photons)?;
    let fitted = build_specimen(&mut simulation, &args);

    let truth = simulation.synthesize_image()?;
    log::info!("Ground truth {} with {:.0} counts", truth.shape(), truth.sum());
    let mut reference = if args.noise {
        apply_poisson_photon_noise(&truth, Some(args.seed))
    } else {
        truth
    };
    if args.read_noise > 0.0 {
        reference = apply_gaussian_read_noise(&reference, args.read_noise, Some(args.seed + 1));
    }
    simulation.set_reference(reference);

    for name in &fitted {
        let index = simulation
            .find_parameter(name)
            .ok_or_else(|| format!("No parameter named '{name}'"))?;
        let value = simulation.parameter(index).unwrap_or(0.0);
        simulation.set_parameter(index, value + args.shift)?;
        if !simulation.set_mask(index, true) {
            log::warn!("'{name}' cannot be optimized");
        }
    }

    let kind = args.strategy.kind();
    let mut optimizer = kind.build();
    if let Some(iterations) = args.iterations {
        optimizer
            .parameters_mut()
            .set_by_id(kind.iteration_budget(), iterations as f64)?;
    }

    let initial_cost = simulation.objective_function_value();
    let run = simulation.start_optimization(optimizer.as_mut(), None);
    let final_cost = simulation.objective_function_value();
    log::info!(
        "{}: {} (cost {initial_cost:.4e} -> {final_cost:.4e})",
        kind,
        run.state
    );

    let report = FitReport {
        strategy: kind.name(),
        objective: args.objective.model().name(),
        run,
        initial_cost,
        final_cost,
        parameters: simulation.parameter_snapshot(),
    };
    match &args.report {
        Some(path) => serde_json::to_writer_pretty(File::create(path)?, &report)?,
        None => println!("{}", serde_json::to_string_pretty(&report)?),
    }
    Ok(())
}
