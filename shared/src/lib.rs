//! Shared components and utilities for the microsim workspace.
//!
//! This crate contains the numeric substrate the simulation core is built on:
//! a spacing-aware 3-D image container, voxel regions, worker pool setup,
//! quaternion rotations and noise generation.

pub mod algo;
pub mod image_proc;

pub use algo::quaternion::Quaternion;
pub use image_proc::region::VoxelRegion;
pub use image_proc::volume::{Volume, VoxelShape};
