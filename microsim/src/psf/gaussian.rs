//! Separable 3-D Gaussian point spread function.

use nalgebra::Vector3;

use super::PsfModel;
use crate::parameters::{ParameterDescriptor, ParameterId, ParameterRegistry};

pub const LATERAL_SIGMA: ParameterId = ParameterId::new("psf_lateral_sigma");
pub const AXIAL_SIGMA: ParameterId = ParameterId::new("psf_axial_sigma");

/// Gaussian PSF with independent lateral (XY) and axial (Z) widths.
///
/// `I(x, y, z) = exp(-(x² + y²) / 2σ_xy² - z² / 2σ_z²)`, unnormalized; the
/// kernel provider rescales the sampled kernel to its summed intensity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GaussianPsf {
    /// Lateral standard deviation in nm
    pub lateral_sigma: f64,
    /// Axial standard deviation in nm
    pub axial_sigma: f64,
}

impl Default for GaussianPsf {
    fn default() -> Self {
        Self {
            lateral_sigma: 100.0,
            axial_sigma: 300.0,
        }
    }
}

impl GaussianPsf {
    pub fn new(lateral_sigma: f64, axial_sigma: f64) -> Self {
        Self {
            lateral_sigma,
            axial_sigma,
        }
    }
}

/// `exp(-d² / 2σ²)`, collapsing to a delta at the origin when `σ` is zero
fn gaussian_1d(d2: f64, sigma: f64) -> f64 {
    if sigma <= 0.0 {
        return if d2 == 0.0 { 1.0 } else { 0.0 };
    }
    (-d2 / (2.0 * sigma * sigma)).exp()
}

impl PsfModel for GaussianPsf {
    fn name(&self) -> &'static str {
        "Gaussian"
    }

    fn descriptors(&self) -> Vec<ParameterDescriptor> {
        vec![
            ParameterDescriptor::double(LATERAL_SIGMA, "Lateral sigma", self.lateral_sigma, "nm")
                .with_range(0.0, f64::MAX),
            ParameterDescriptor::double(AXIAL_SIGMA, "Axial sigma", self.axial_sigma, "nm")
                .with_range(0.0, f64::MAX),
        ]
    }

    fn configure(&mut self, parameters: &ParameterRegistry) {
        if let Some(sigma) = parameters.value(LATERAL_SIGMA) {
            self.lateral_sigma = sigma;
        }
        if let Some(sigma) = parameters.value(AXIAL_SIGMA) {
            self.axial_sigma = sigma;
        }
    }

    fn intensity(&self, offset: &Vector3<f64>) -> f64 {
        let r2 = offset.x * offset.x + offset.y * offset.y;
        gaussian_1d(r2, self.lateral_sigma) * gaussian_1d(offset.z * offset.z, self.axial_sigma)
    }
}
