//! Point spread function kernels and their spatial derivatives.
//!
//! The [`KernelProvider`] samples a pluggable [`PsfModel`] onto a voxel grid
//! centred on the origin, rescales it to a fixed summed intensity and derives
//! a three-channel gradient field with a derivative-of-Gaussian filter. The
//! provider's physical and geometric settings are parameter descriptors;
//! changing one marks the provider stale and nothing is regenerated until the
//! next explicit [`KernelProvider::update`].

pub mod derivative;
pub mod gaussian;
pub mod widefield;

use std::fmt;

use nalgebra::Vector3;
use ndarray::{Array3, Array4, ArrayView3, Axis, Zip};
use serde::{Deserialize, Serialize};

use shared::image_proc::trilinear;
use shared::{Volume, VoxelShape};

use crate::parameters::{ParameterDescriptor, ParameterId, ParameterOwner, ParameterRegistry};
pub use derivative::derivative_along_axis;
pub use gaussian::GaussianPsf;
pub use widefield::WidefieldPsf;

pub const KERNEL_VOXELS_X: ParameterId = ParameterId::new("kernel_voxels_x");
pub const KERNEL_VOXELS_Y: ParameterId = ParameterId::new("kernel_voxels_y");
pub const KERNEL_VOXELS_Z: ParameterId = ParameterId::new("kernel_voxels_z");
pub const KERNEL_SPACING_X: ParameterId = ParameterId::new("kernel_spacing_x");
pub const KERNEL_SPACING_Y: ParameterId = ParameterId::new("kernel_spacing_y");
pub const KERNEL_SPACING_Z: ParameterId = ParameterId::new("kernel_spacing_z");
pub const SUMMED_INTENSITY: ParameterId = ParameterId::new("kernel_summed_intensity");
pub const GRADIENT_SIGMA: ParameterId = ParameterId::new("kernel_gradient_sigma");

const VOXEL_IDS: [ParameterId; 3] = [KERNEL_VOXELS_X, KERNEL_VOXELS_Y, KERNEL_VOXELS_Z];
const SPACING_IDS: [ParameterId; 3] = [KERNEL_SPACING_X, KERNEL_SPACING_Y, KERNEL_SPACING_Z];

/// Continuous intensity profile of a point emitter at the origin.
///
/// Models read their physical parameters from the provider's registry in
/// [`PsfModel::configure`] and are then evaluated concurrently from many
/// worker threads.
pub trait PsfModel: fmt::Debug + Send + Sync {
    fn name(&self) -> &'static str;

    /// Physical parameters of the model, registered ahead of the provider's
    /// own geometry descriptors
    fn descriptors(&self) -> Vec<ParameterDescriptor>;

    fn configure(&mut self, parameters: &ParameterRegistry);

    /// Unnormalized intensity at `offset` (nm) from the emitter
    fn intensity(&self, offset: &Vector3<f64>) -> f64;
}

/// Shipped PSF models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PsfKind {
    Gaussian,
    Widefield,
}

/// Normalized PSF sampled on a grid centred on its support point
#[derive(Debug, Clone, PartialEq)]
pub struct Kernel {
    volume: Volume,
    normalization: f64,
}

impl Kernel {
    pub fn volume(&self) -> &Volume {
        &self.volume
    }

    pub fn shape(&self) -> VoxelShape {
        self.volume.shape()
    }

    pub fn sum(&self) -> f64 {
        self.volume.sum()
    }

    /// Factor that was applied to the raw model samples
    pub fn normalization(&self) -> f64 {
        self.normalization
    }

    /// Fewer than two voxels along some axis
    pub fn is_degenerate(&self) -> bool {
        self.shape().min_extent() < 2
    }

    /// World half extent of the support (nm)
    pub fn half_extent(&self) -> Vector3<f64> {
        self.volume.half_extent()
    }

    /// Interpolated kernel value at `offset` (nm) from the emitter, zero
    /// outside the support
    pub fn value_at(&self, offset: &Vector3<f64>) -> f64 {
        self.volume.interpolate(offset)
    }
}

/// Spatial derivative of the raw kernel, channels X, Y, Z on the last axis
#[derive(Debug, Clone, PartialEq)]
pub struct KernelGradient {
    data: Array4<f64>,
    spacing: [f64; 3],
    origin: [f64; 3],
}

impl KernelGradient {
    /// Filter the raw kernel along each axis and stack the results as channels
    pub fn from_raw(raw: &Volume, sigma: f64) -> Self {
        let (nz, ny, nx) = raw.data().dim();
        let spacing = raw.spacing();
        let mut data = Array4::zeros((nz, ny, nx, 3));
        for axis in 0..3 {
            let component = derivative_along_axis(raw.data(), axis, sigma, spacing[axis]);
            data.index_axis_mut(Axis(3), axis).assign(&component);
        }
        Self {
            data,
            spacing,
            origin: raw.origin(),
        }
    }

    /// `[z, y, x, channel]` array
    pub fn data(&self) -> &Array4<f64> {
        &self.data
    }

    /// One derivative image; `axis` 0 = X, 1 = Y, 2 = Z
    pub fn component(&self, axis: usize) -> ArrayView3<'_, f64> {
        self.data.index_axis(Axis(3), axis)
    }

    /// Interpolated raw gradient at `offset` (nm) from the emitter
    pub fn sample(&self, offset: &Vector3<f64>) -> Vector3<f64> {
        let index = [
            (offset.x - self.origin[0]) / self.spacing[0],
            (offset.y - self.origin[1]) / self.spacing[1],
            (offset.z - self.origin[2]) / self.spacing[2],
        ];
        Vector3::new(
            trilinear(self.component(0), index),
            trilinear(self.component(1), index),
            trilinear(self.component(2), index),
        )
    }
}

/// Owner of the current kernel and its gradient
#[derive(Debug)]
pub struct KernelProvider {
    model: Box<dyn PsfModel>,
    parameters: ParameterRegistry,
    kernel: Kernel,
    gradient: KernelGradient,
    built_revision: u64,
}

impl KernelProvider {
    /// Create a provider and build its first kernel.
    ///
    /// # Arguments
    /// * `model` - PSF model; its descriptors are registered first
    /// * `voxels` - Kernel voxel counts `(x, y, z)`, clamped to at least 1
    /// * `spacing` - Voxel spacing `(x, y, z)` in nm
    pub fn new(model: Box<dyn PsfModel>, voxels: [usize; 3], spacing: [f64; 3]) -> Self {
        let mut parameters = ParameterRegistry::new(ParameterOwner::Kernel);
        for descriptor in model.descriptors() {
            parameters.register(descriptor);
        }
        for (axis, label) in ["X", "Y", "Z"].iter().enumerate() {
            parameters.register(
                ParameterDescriptor::integer(
                    VOXEL_IDS[axis],
                    format!("Kernel voxels {label}"),
                    voxels[axis] as f64,
                    "",
                )
                .with_range(1.0, 4096.0)
                .fixed(),
            );
        }
        for (axis, label) in ["X", "Y", "Z"].iter().enumerate() {
            parameters.register(
                ParameterDescriptor::double(
                    SPACING_IDS[axis],
                    format!("Kernel spacing {label}"),
                    spacing[axis],
                    "nm",
                )
                .with_range(1e-3, f64::MAX)
                .fixed(),
            );
        }
        parameters.register(
            ParameterDescriptor::double(SUMMED_INTENSITY, "Summed intensity", 1.0, "").fixed(),
        );
        parameters.register(
            ParameterDescriptor::double(GRADIENT_SIGMA, "Gradient sigma", 50.0, "nm")
                .with_range(0.0, f64::MAX)
                .fixed(),
        );

        let empty = Volume::zeros(VoxelShape::new(1, 1, 1), [1.0; 3], [0.0; 3]);
        let mut provider = Self {
            model,
            parameters,
            gradient: KernelGradient::from_raw(&empty, 1.0),
            kernel: Kernel {
                volume: empty,
                normalization: 1.0,
            },
            built_revision: 0,
        };
        provider.update();
        provider
    }

    pub fn model_name(&self) -> &'static str {
        self.model.name()
    }

    pub fn parameters(&self) -> &ParameterRegistry {
        &self.parameters
    }

    /// Mutable descriptors; changes take effect on the next [`Self::update`]
    pub fn parameters_mut(&mut self) -> &mut ParameterRegistry {
        &mut self.parameters
    }

    /// Whether descriptors changed since the kernel was built
    pub fn is_stale(&self) -> bool {
        self.parameters.revision() != self.built_revision
    }

    /// Voxel counts as currently configured, each at least 1
    pub fn voxel_shape(&self) -> VoxelShape {
        let count = |id| self.parameters.value(id).unwrap_or(1.0).max(1.0) as usize;
        VoxelShape::new(count(VOXEL_IDS[0]), count(VOXEL_IDS[1]), count(VOXEL_IDS[2]))
    }

    pub fn spacing(&self) -> [f64; 3] {
        SPACING_IDS.map(|id| self.parameters.value(id).unwrap_or(1.0))
    }

    pub fn summed_intensity(&self) -> f64 {
        self.parameters.value(SUMMED_INTENSITY).unwrap_or(1.0)
    }

    pub fn gradient_sigma(&self) -> f64 {
        self.parameters.value(GRADIENT_SIGMA).unwrap_or(0.0)
    }

    /// Regenerate if stale and return the kernel
    pub fn generate(&mut self) -> &Kernel {
        if self.is_stale() {
            self.update();
        }
        &self.kernel
    }

    /// Resample the model, renormalize, and recompute the gradient
    pub fn update(&mut self) {
        self.model.configure(&self.parameters);
        let shape = self.voxel_shape();
        let spacing = self.spacing();

        let raw = sample_model(self.model.as_ref(), shape, spacing);
        let gradient = KernelGradient::from_raw(&raw, self.gradient_sigma());

        let target = self.summed_intensity();
        let raw_sum = raw.sum();
        let (volume, normalization) = if raw_sum > 0.0 && raw_sum.is_finite() {
            let factor = target / raw_sum;
            let origin = raw.origin();
            let data = raw.into_data() * factor;
            (Volume::from_array(data, spacing, origin), factor)
        } else {
            log::warn!(
                "{} kernel sums to {raw_sum}; placing the summed intensity on the centre voxel",
                self.model.name()
            );
            let mut collapsed = Volume::zeros(shape, spacing, raw.origin());
            let (nz, ny, nx) = shape.to_array_dim();
            collapsed.data_mut()[[nz / 2, ny / 2, nx / 2]] = target;
            (collapsed, 1.0)
        };

        self.kernel = Kernel {
            volume,
            normalization,
        };
        if self.kernel.is_degenerate() {
            log::debug!("Kernel grid {shape} is degenerate");
        }
        self.gradient = gradient;
        self.built_revision = self.parameters.revision();
        log::debug!(
            "Built {} kernel {shape} (normalization {normalization:.4e})",
            self.model.name()
        );
    }

    /// Kernel as of the last update
    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    /// Raw gradient as of the last update
    pub fn gradient(&self) -> &KernelGradient {
        &self.gradient
    }

    /// Gradient of the normalized kernel at `offset` (nm) from the emitter
    pub fn gradient_at(&self, offset: &Vector3<f64>) -> Vector3<f64> {
        self.gradient.sample(offset) * self.kernel.normalization
    }
}

/// Evaluate `model` at every voxel centre of a grid centred on the origin
fn sample_model(model: &dyn PsfModel, shape: VoxelShape, spacing: [f64; 3]) -> Volume {
    let [nx, ny, nz] = shape.as_xyz();
    let origin = [
        -0.5 * (nx - 1) as f64 * spacing[0],
        -0.5 * (ny - 1) as f64 * spacing[1],
        -0.5 * (nz - 1) as f64 * spacing[2],
    ];

    let mut data = Array3::zeros(shape.to_array_dim());
    Zip::indexed(&mut data).par_for_each(|(k, j, i), value| {
        let offset = Vector3::new(
            origin[0] + i as f64 * spacing[0],
            origin[1] + j as f64 * spacing[1],
            origin[2] + k as f64 * spacing[2],
        );
        *value = model.intensity(&offset);
    });

    Volume::from_array(data, spacing, origin)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn gaussian_provider() -> KernelProvider {
        KernelProvider::new(
            Box::new(GaussianPsf::new(100.0, 200.0)),
            [21, 21, 11],
            [25.0, 25.0, 50.0],
        )
    }

    #[test]
    fn test_kernel_sums_to_summed_intensity() {
        let mut provider = gaussian_provider();
        assert_relative_eq!(provider.kernel().sum(), 1.0, epsilon = 1e-12);

        provider.parameters_mut().set_by_id(SUMMED_INTENSITY, 250.0).unwrap();
        assert!(provider.is_stale());
        // Not regenerated until update.
        assert_relative_eq!(provider.kernel().sum(), 1.0, epsilon = 1e-12);

        provider.update();
        assert!(!provider.is_stale());
        assert_relative_eq!(provider.kernel().sum(), 250.0, epsilon = 1e-9);
    }

    #[test]
    fn test_normalization_is_idempotent() {
        let mut provider = gaussian_provider();
        let first = provider.kernel().clone();
        provider.update();
        provider.update();
        assert_eq!(provider.kernel(), &first);
    }

    #[test]
    fn test_kernel_peak_is_centred() {
        let provider = gaussian_provider();
        let data = provider.kernel().volume().data();
        let centre = data[[5, 10, 10]];
        assert!(data.iter().all(|&v| v <= centre));
        assert_relative_eq!(
            provider.kernel().value_at(&Vector3::zeros()),
            centre,
            epsilon = 1e-15
        );
    }

    #[test]
    fn test_degenerate_sizes_are_clamped() {
        let provider =
            KernelProvider::new(Box::new(GaussianPsf::default()), [0, 5, 1], [10.0, 10.0, 10.0]);
        assert_eq!(provider.voxel_shape(), VoxelShape::new(1, 5, 1));
        assert!(provider.kernel().is_degenerate());
        assert_relative_eq!(provider.kernel().sum(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_collapsed_model_puts_intensity_on_centre() {
        let provider =
            KernelProvider::new(Box::new(GaussianPsf::new(0.0, 0.0)), [4, 4, 4], [10.0; 3]);
        // No voxel centre sits exactly on the origin of an even grid.
        let data = provider.kernel().volume().data();
        assert_eq!(data[[2, 2, 2]], 1.0);
        assert_relative_eq!(provider.kernel().sum(), 1.0);
    }

    #[test]
    fn test_gradient_is_antisymmetric() {
        let provider = gaussian_provider();
        let offset = Vector3::new(60.0, -35.0, 40.0);
        let g = provider.gradient_at(&offset);
        let mirrored = provider.gradient_at(&-offset);
        for axis in 0..3 {
            assert_relative_eq!(g[axis], -mirrored[axis], epsilon = 1e-15);
        }
        // Gaussian falls off away from the centre.
        assert!(g.x < 0.0);
        assert!(g.y > 0.0);
        assert!(g.z < 0.0);
    }

    #[test]
    fn test_gradient_matches_finite_difference() {
        let mut provider = gaussian_provider();
        provider.parameters_mut().set_by_id(GRADIENT_SIGMA, 10.0).unwrap();
        provider.update();
        let kernel = provider.kernel();
        let h = 25.0;
        let p = Vector3::new(75.0, 0.0, 0.0);
        let fd = (kernel.value_at(&(p + Vector3::new(h, 0.0, 0.0)))
            - kernel.value_at(&(p - Vector3::new(h, 0.0, 0.0))))
            / (2.0 * h);
        let g = provider.gradient_at(&p);
        // The filter smooths, so agreement is approximate.
        assert_relative_eq!(g.x, fd, max_relative = 0.2);
    }

    #[test]
    fn test_widefield_kernel_builds() {
        let provider = KernelProvider::new(
            Box::new(WidefieldPsf::default()),
            [15, 15, 9],
            [40.0, 40.0, 150.0],
        );
        assert_eq!(provider.model_name(), "Widefield");
        assert_relative_eq!(provider.kernel().sum(), 1.0, epsilon = 1e-12);
        assert!(provider.parameters().index_of(widefield::NUMERICAL_APERTURE).is_some());
    }
}
