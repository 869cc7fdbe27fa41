use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use shared::{Volume, VoxelShape};

use crate::objective::NoiseModel;
use crate::psf::{GaussianPsf, KernelProvider, PsfKind, PsfModel, WidefieldPsf};

/// Camera and focal-plane stack geometry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImagingConfig {
    /// Image width in pixels
    pub width: usize,
    /// Image height in pixels
    pub height: usize,
    /// Pixel size in specimen space (nm)
    pub pixel_size: f64,
    /// Number of focal planes; 1 renders a single image
    pub focal_planes: usize,
    /// Distance between focal planes (nm)
    pub plane_spacing: f64,
    /// Z position of the central focal plane (nm)
    pub focus_z: f64,
    /// Photons to counts conversion
    pub gain: f64,
    /// Constant background added to every pixel (counts)
    pub offset: f64,
    /// Render only labels of this channel; `None` renders all
    pub channel: Option<usize>,
}

impl Default for ImagingConfig {
    fn default() -> Self {
        Self {
            width: 64,
            height: 64,
            pixel_size: 50.0,
            focal_planes: 1,
            plane_spacing: 200.0,
            focus_z: 0.0,
            gain: 1.0,
            offset: 0.0,
            channel: None,
        }
    }
}

impl ImagingConfig {
    pub fn shape(&self) -> VoxelShape {
        VoxelShape::new(self.width, self.height, self.focal_planes)
    }

    pub fn spacing(&self) -> [f64; 3] {
        [self.pixel_size, self.pixel_size, self.plane_spacing]
    }

    /// World position of pixel `(0, 0)` of the first plane; the image is
    /// centred laterally on the optical axis and axially on `focus_z`
    pub fn origin(&self) -> [f64; 3] {
        let centre = |n: usize, step: f64| -0.5 * n.saturating_sub(1) as f64 * step;
        [
            centre(self.width, self.pixel_size),
            centre(self.height, self.pixel_size),
            self.focus_z + centre(self.focal_planes, self.plane_spacing),
        ]
    }

    /// Empty image on this grid
    pub fn blank(&self) -> Volume {
        Volume::zeros(self.shape(), self.spacing(), self.origin())
    }

    /// Centre of pixel `(i, j)` of plane `k`
    pub fn pixel_position(&self, i: usize, j: usize, k: usize) -> Vector3<f64> {
        let origin = self.origin();
        Vector3::new(
            origin[0] + i as f64 * self.pixel_size,
            origin[1] + j as f64 * self.pixel_size,
            origin[2] + k as f64 * self.plane_spacing,
        )
    }

    pub fn includes_channel(&self, channel: usize) -> bool {
        self.channel.map_or(true, |selected| selected == channel)
    }
}

/// PSF model and kernel grid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelConfig {
    pub model: PsfKind,
    /// Kernel voxel counts (x, y, z)
    pub voxels: [usize; 3],
    /// Kernel voxel spacing (x, y, z) in nm
    pub spacing: [f64; 3],
    /// Gaussian lateral sigma (nm)
    pub lateral_sigma: f64,
    /// Gaussian axial sigma (nm)
    pub axial_sigma: f64,
    /// Widefield emission wavelength (nm)
    pub wavelength: f64,
    /// Widefield numerical aperture
    pub numerical_aperture: f64,
    /// Widefield immersion refractive index
    pub refractive_index: f64,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            model: PsfKind::Gaussian,
            voxels: [31, 31, 21],
            spacing: [25.0, 25.0, 100.0],
            lateral_sigma: 100.0,
            axial_sigma: 300.0,
            wavelength: 520.0,
            numerical_aperture: 1.4,
            refractive_index: 1.518,
        }
    }
}

impl KernelConfig {
    pub fn build_model(&self) -> Box<dyn PsfModel> {
        match self.model {
            PsfKind::Gaussian => Box::new(GaussianPsf::new(self.lateral_sigma, self.axial_sigma)),
            PsfKind::Widefield => Box::new(WidefieldPsf::new(
                self.wavelength,
                self.numerical_aperture,
                self.refractive_index,
            )),
        }
    }

    pub fn build_provider(&self) -> KernelProvider {
        KernelProvider::new(self.build_model(), self.voxels, self.spacing)
    }
}

/// Top-level settings of a [`crate::Simulation`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub imaging: ImagingConfig,
    pub kernel: KernelConfig,
    /// Initially active objective
    pub objective: NoiseModel,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            imaging: ImagingConfig::default(),
            kernel: KernelConfig::default(),
            objective: NoiseModel::Gaussian,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_image_grid_is_centred() {
        let config = ImagingConfig {
            width: 5,
            height: 3,
            pixel_size: 10.0,
            focal_planes: 3,
            plane_spacing: 100.0,
            focus_z: 50.0,
            ..ImagingConfig::default()
        };
        assert_eq!(config.origin(), [-20.0, -10.0, -50.0]);
        let centre = config.pixel_position(2, 1, 1);
        assert_relative_eq!(centre.norm(), 50.0);
        assert_eq!(config.blank().shape(), VoxelShape::new(5, 3, 3));
    }

    #[test]
    fn test_channel_selection() {
        let mut config = ImagingConfig::default();
        assert!(config.includes_channel(3));
        config.channel = Some(1);
        assert!(config.includes_channel(1));
        assert!(!config.includes_channel(0));
    }

    #[test]
    fn test_config_serializes() {
        let config = SimulationConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: SimulationConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
