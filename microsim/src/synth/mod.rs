//! Image synthesis contract.
//!
//! An [`ImageSynthesizer`] turns label points plus the current kernel into a
//! candidate image, either a single focal plane or a stack, and can report the
//! image-space gradient of a squared-residual cost with respect to the label
//! points of one specimen object. [`CpuSynthesizer`] is the shipped
//! implementation.

pub mod cpu;

use std::fmt;

use nalgebra::Vector3;
use thiserror::Error;

use shared::{Volume, VoxelShape};

use crate::config::ImagingConfig;
use crate::psf::KernelProvider;
pub use cpu::CpuSynthesizer;

/// Errors raised while rendering
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SynthesisError {
    #[error("Kernel parameters changed since the last kernel update")]
    StaleKernel,
    #[error("Cannot render an image of size {0}")]
    EmptyImage(VoxelShape),
    #[error("Rendered image is {image} but the reference is {reference}")]
    ReferenceMismatch {
        image: VoxelShape,
        reference: VoxelShape,
    },
    #[error("Object {0} has no labels bound to its points")]
    NoPointLabels(usize),
}

/// Emitters of one fluorophore property of one specimen object
#[derive(Debug, Clone, PartialEq)]
pub struct LabelBatch {
    pub object_index: usize,
    pub channel: usize,
    /// Brightness of each emitter relative to the kernel's summed intensity
    pub intensity_scale: f64,
    /// Emitter positions (nm)
    pub points: Vec<Vector3<f64>>,
    /// `points[i]` is geometry point `i` of the object, so per-point
    /// gradients can be applied back to it
    pub point_bound: bool,
}

/// Descent direction for every point of one object
#[derive(Debug, Clone, PartialEq)]
pub struct PointGradient {
    pub object_index: usize,
    /// `-∂cost/∂p` per point, in cost units per nm
    pub gradients: Vec<Vector3<f64>>,
}

impl PointGradient {
    pub fn len(&self) -> usize {
        self.gradients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gradients.is_empty()
    }

    pub fn max_norm(&self) -> f64 {
        self.gradients.iter().map(|g| g.norm()).fold(0.0, f64::max)
    }
}

pub trait ImageSynthesizer: fmt::Debug + Send + Sync {
    fn name(&self) -> &str;

    /// Render the labels of all batches in the configured channel
    fn render(
        &self,
        batches: &[LabelBatch],
        kernel: &KernelProvider,
        config: &ImagingConfig,
    ) -> Result<Volume, SynthesisError>;

    /// Per-point descent direction of the mean squared residual against
    /// `reference` for the point-bound labels of `object_index`
    fn render_point_gradient(
        &self,
        batches: &[LabelBatch],
        kernel: &KernelProvider,
        config: &ImagingConfig,
        object_index: usize,
        reference: &Volume,
    ) -> Result<PointGradient, SynthesisError>;
}
