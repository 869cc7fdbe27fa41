//! Diffraction-limited widefield point spread function.
//!
//! The lateral profile is the Airy pattern of a circular pupil,
//!
//! ```text
//! I(r) = [2·J₁(v)/v]²,   v = 2π·NA·r / λ
//! ```
//!
//! where `J₁` is the first-order Bessel function, `NA` the numerical aperture
//! and `λ` the emission wavelength. Along the optical axis the profile is a
//! Gaussian envelope whose FWHM equals the axial resolution `2λn / NA²` of an
//! objective immersed in a medium of refractive index `n`.

use nalgebra::Vector3;
use once_cell::sync::Lazy;
use scilib::math::bessel;
use std::f64::consts::PI;

use super::PsfModel;
use crate::parameters::{ParameterDescriptor, ParameterId, ParameterRegistry};

pub const EMISSION_WAVELENGTH: ParameterId = ParameterId::new("psf_emission_wavelength");
pub const NUMERICAL_APERTURE: ParameterId = ParameterId::new("psf_numerical_aperture");
pub const REFRACTIVE_INDEX: ParameterId = ParameterId::new("psf_refractive_index");

/// FWHM of a Gaussian in units of its standard deviation
const FWHM_PER_SIGMA: f64 = 2.354_820_045_030_949;

/// First zero of `J₁`, i.e. the first dark ring in units of `v`
pub static AIRY_FIRST_ZERO: Lazy<f64> = Lazy::new(|| {
    let mut x = 3.83;
    let mut step = 0.01;
    while step > 1e-12 {
        if bessel::j_n(1, x) < 0.0 {
            x -= step;
        } else {
            x += step;
        }
        step *= 0.5;
    }
    x
});

/// Normalized Airy intensity `[2·J₁(v)/v]²`, equal to 1 at the centre
pub fn airy_intensity(v: f64) -> f64 {
    if v.abs() < 1e-10 {
        return 1.0;
    }
    let term = 2.0 * bessel::j_n(1, v) / v;
    term * term
}

/// Widefield PSF from emission wavelength, NA and immersion index
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WidefieldPsf {
    /// Emission wavelength in nm
    pub wavelength: f64,
    pub numerical_aperture: f64,
    pub refractive_index: f64,
}

impl Default for WidefieldPsf {
    fn default() -> Self {
        Self {
            wavelength: 520.0,
            numerical_aperture: 1.4,
            refractive_index: 1.518,
        }
    }
}

impl WidefieldPsf {
    pub fn new(wavelength: f64, numerical_aperture: f64, refractive_index: f64) -> Self {
        Self {
            wavelength,
            numerical_aperture,
            refractive_index,
        }
    }

    /// Radius of the first dark ring in nm (`0.61 λ / NA`)
    pub fn first_dark_ring(&self) -> f64 {
        *AIRY_FIRST_ZERO * self.wavelength / (2.0 * PI * self.numerical_aperture)
    }

    /// Standard deviation of the axial envelope in nm
    pub fn axial_sigma(&self) -> f64 {
        let na2 = self.numerical_aperture * self.numerical_aperture;
        2.0 * self.wavelength * self.refractive_index / na2 / FWHM_PER_SIGMA
    }
}

impl PsfModel for WidefieldPsf {
    fn name(&self) -> &'static str {
        "Widefield"
    }

    fn descriptors(&self) -> Vec<ParameterDescriptor> {
        vec![
            ParameterDescriptor::double(
                EMISSION_WAVELENGTH,
                "Emission wavelength",
                self.wavelength,
                "nm",
            )
            .with_range(1.0, f64::MAX),
            ParameterDescriptor::double(
                NUMERICAL_APERTURE,
                "Numerical aperture",
                self.numerical_aperture,
                "",
            )
            .with_range(1e-3, f64::MAX),
            ParameterDescriptor::double(
                REFRACTIVE_INDEX,
                "Refractive index",
                self.refractive_index,
                "",
            )
            .with_range(1.0, f64::MAX)
            .fixed(),
        ]
    }

    fn configure(&mut self, parameters: &ParameterRegistry) {
        if let Some(v) = parameters.value(EMISSION_WAVELENGTH) {
            self.wavelength = v;
        }
        if let Some(v) = parameters.value(NUMERICAL_APERTURE) {
            self.numerical_aperture = v;
        }
        if let Some(v) = parameters.value(REFRACTIVE_INDEX) {
            self.refractive_index = v;
        }
    }

    fn intensity(&self, offset: &Vector3<f64>) -> f64 {
        let r = (offset.x * offset.x + offset.y * offset.y).sqrt();
        let v = 2.0 * PI * self.numerical_aperture * r / self.wavelength;
        let sigma_z = self.axial_sigma();
        let axial = (-offset.z * offset.z / (2.0 * sigma_z * sigma_z)).exp();
        airy_intensity(v) * axial
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_first_zero_of_bessel_j1() {
        assert_relative_eq!(*AIRY_FIRST_ZERO, 3.831_705_97, epsilon = 1e-6);
    }

    #[test]
    fn test_dark_ring_radius() {
        let psf = WidefieldPsf::new(500.0, 1.0, 1.0);
        // Rayleigh criterion: 0.61 λ / NA
        assert_relative_eq!(psf.first_dark_ring(), 0.61 * 500.0, epsilon = 0.5);
        let ring = Vector3::new(psf.first_dark_ring(), 0.0, 0.0);
        assert!(psf.intensity(&ring) < 1e-10);
    }

    #[test]
    fn test_axial_envelope_half_maximum() {
        let psf = WidefieldPsf::default();
        let fwhm_z = 2.0 * psf.wavelength * psf.refractive_index
            / (psf.numerical_aperture * psf.numerical_aperture);
        let at_half = psf.intensity(&Vector3::new(0.0, 0.0, fwhm_z / 2.0));
        assert_relative_eq!(at_half, 0.5, epsilon = 1e-9);
    }
}
