//! Spacing-aware 3-D scalar images.
//!
//! Arrays are stored in ndarray's matrix order `[z, y, x]` while all physical
//! quantities (spacing, origin, positions) are given in `(x, y, z)` order in
//! nanometres. A focal plane is a volume with `nz == 1`.

use nalgebra::Vector3;
use ndarray::{Array3, ArrayView3};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Voxel dimensions of a volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VoxelShape {
    /// Voxels along X (columns)
    pub nx: usize,
    /// Voxels along Y (rows)
    pub ny: usize,
    /// Voxels along Z (planes)
    pub nz: usize,
}

impl VoxelShape {
    /// Create a new VoxelShape
    pub fn new(nx: usize, ny: usize, nz: usize) -> Self {
        Self { nx, ny, nz }
    }

    /// Total number of voxels
    pub fn voxel_count(&self) -> usize {
        self.nx * self.ny * self.nz
    }

    /// Shape in ndarray `[z, y, x]` order
    pub fn to_array_dim(&self) -> (usize, usize, usize) {
        (self.nz, self.ny, self.nx)
    }

    /// Create from an ndarray `(z, y, x)` dimension tuple
    pub fn from_array_dim(dim: (usize, usize, usize)) -> Self {
        Self::new(dim.2, dim.1, dim.0)
    }

    /// Voxel counts in `(x, y, z)` order
    pub fn as_xyz(&self) -> [usize; 3] {
        [self.nx, self.ny, self.nz]
    }

    /// Smallest extent over the three axes
    pub fn min_extent(&self) -> usize {
        self.nx.min(self.ny).min(self.nz)
    }
}

impl fmt::Display for VoxelShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.nx, self.ny, self.nz)
    }
}

/// A 3-D scalar image with physical voxel spacing and origin.
///
/// The origin is the world position (nm) of voxel `[0, 0, 0]`; voxel
/// `(i, j, k)` sits at `origin + (i·sx, j·sy, k·sz)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Volume {
    data: Array3<f64>,
    spacing: [f64; 3],
    origin: [f64; 3],
}

impl Volume {
    /// Create a zero-filled volume
    pub fn zeros(shape: VoxelShape, spacing: [f64; 3], origin: [f64; 3]) -> Self {
        Self {
            data: Array3::zeros(shape.to_array_dim()),
            spacing,
            origin,
        }
    }

    /// Wrap an existing `[z, y, x]` array
    pub fn from_array(data: Array3<f64>, spacing: [f64; 3], origin: [f64; 3]) -> Self {
        Self {
            data,
            spacing,
            origin,
        }
    }

    pub fn shape(&self) -> VoxelShape {
        VoxelShape::from_array_dim(self.data.dim())
    }

    pub fn spacing(&self) -> [f64; 3] {
        self.spacing
    }

    pub fn origin(&self) -> [f64; 3] {
        self.origin
    }

    pub fn data(&self) -> &Array3<f64> {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut Array3<f64> {
        &mut self.data
    }

    pub fn into_data(self) -> Array3<f64> {
        self.data
    }

    /// Sum of all voxel intensities
    pub fn sum(&self) -> f64 {
        self.data.sum()
    }

    /// Whether both volumes share shape, spacing and origin
    pub fn same_grid(&self, other: &Volume) -> bool {
        self.data.dim() == other.data.dim()
            && self.spacing == other.spacing
            && self.origin == other.origin
    }

    /// World position (nm) of the voxel with indices `(i, j, k)` = `(x, y, z)`
    pub fn world_position(&self, i: usize, j: usize, k: usize) -> Vector3<f64> {
        Vector3::new(
            self.origin[0] + i as f64 * self.spacing[0],
            self.origin[1] + j as f64 * self.spacing[1],
            self.origin[2] + k as f64 * self.spacing[2],
        )
    }

    /// Continuous `(x, y, z)` voxel index of a world position
    pub fn continuous_index(&self, position: &Vector3<f64>) -> [f64; 3] {
        [
            (position[0] - self.origin[0]) / self.spacing[0],
            (position[1] - self.origin[1]) / self.spacing[1],
            (position[2] - self.origin[2]) / self.spacing[2],
        ]
    }

    /// World-space half extent (nm) of the volume around its centre.
    pub fn half_extent(&self) -> Vector3<f64> {
        let shape = self.shape().as_xyz();
        Vector3::new(
            0.5 * (shape[0].saturating_sub(1)) as f64 * self.spacing[0],
            0.5 * (shape[1].saturating_sub(1)) as f64 * self.spacing[1],
            0.5 * (shape[2].saturating_sub(1)) as f64 * self.spacing[2],
        )
    }

    /// Trilinearly interpolated intensity at a world position, zero outside.
    pub fn interpolate(&self, position: &Vector3<f64>) -> f64 {
        trilinear(self.data.view(), self.continuous_index(position))
    }
}

/// Trilinear interpolation into a `[z, y, x]` view at a continuous `(x, y, z)` index.
///
/// Samples outside the array contribute zero, so the result falls off to zero
/// within one voxel of the border.
pub fn trilinear(view: ArrayView3<f64>, index: [f64; 3]) -> f64 {
    let (nz, ny, nx) = view.dim();
    let dims = [nx as isize, ny as isize, nz as isize];

    let mut base = [0isize; 3];
    let mut frac = [0.0f64; 3];
    for axis in 0..3 {
        if !index[axis].is_finite() {
            return 0.0;
        }
        let floor = index[axis].floor();
        base[axis] = floor as isize;
        frac[axis] = index[axis] - floor;
        if base[axis] < -1 || base[axis] >= dims[axis] {
            return 0.0;
        }
    }

    let fetch = |x: isize, y: isize, z: isize| -> f64 {
        if x < 0 || y < 0 || z < 0 || x >= dims[0] || y >= dims[1] || z >= dims[2] {
            0.0
        } else {
            view[[z as usize, y as usize, x as usize]]
        }
    };

    let mut value = 0.0;
    for dz in 0..2 {
        let wz = if dz == 0 { 1.0 - frac[2] } else { frac[2] };
        if wz == 0.0 {
            continue;
        }
        for dy in 0..2 {
            let wy = if dy == 0 { 1.0 - frac[1] } else { frac[1] };
            if wy == 0.0 {
                continue;
            }
            for dx in 0..2 {
                let wx = if dx == 0 { 1.0 - frac[0] } else { frac[0] };
                if wx == 0.0 {
                    continue;
                }
                value += wx * wy * wz * fetch(base[0] + dx, base[1] + dy, base[2] + dz);
            }
        }
    }
    value
}
