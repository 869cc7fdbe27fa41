//! Image containers and image-level processing shared across the workspace.
//!
//! - **volume**: spacing/origin aware 3-D scalar images (single planes are
//!   volumes with one plane)
//! - **region**: axis-aligned voxel regions used to restrict scoring
//! - **noise**: Poisson photon noise for synthesizing observed images

pub mod noise;
pub mod region;
pub mod volume;

pub use noise::{apply_gaussian_read_noise, apply_poisson_photon_noise};
pub use region::VoxelRegion;
pub use volume::{trilinear, Volume, VoxelShape};
