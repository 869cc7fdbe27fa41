//! Fluorescence microscopy image synthesis and specimen fitting.
//!
//! A [`Simulation`] holds a PSF [`psf::KernelProvider`], a set of
//! [`specimen::SpecimenObject`]s carrying fluorescent labels, an
//! [`synth::ImageSynthesizer`] and an [`objective::ObjectiveHost`]. Fitting
//! strategies in [`optimizer`] adjust the simulation's masked parameters
//! until the synthesized image matches a bound reference.

pub mod config;
pub mod geometry;
pub mod objective;
pub mod optimizer;
pub mod parameters;
pub mod psf;
pub mod sampling;
pub mod simulation;
pub mod specimen;
pub mod synth;

pub use config::{ImagingConfig, KernelConfig, SimulationConfig};
pub use objective::NoiseModel;
pub use optimizer::{CancelFlag, Optimizer, OptimizerKind, RunReport, RunState};
pub use parameters::{ParameterId, ParameterVector};
pub use simulation::{Simulation, SimulationError};
