//! Axis-aligned voxel regions.

use ndarray::{s, Array3, ArrayView3};
use serde::{Deserialize, Serialize};

use super::volume::VoxelShape;

/// Half-open voxel box `[min, max)` with indices in `(x, y, z)` order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoxelRegion {
    pub min: [usize; 3],
    pub max: [usize; 3],
}

impl VoxelRegion {
    pub fn new(min: [usize; 3], max: [usize; 3]) -> Self {
        Self { min, max }
    }

    /// Region covering every voxel of `shape`
    pub fn full(shape: VoxelShape) -> Self {
        Self {
            min: [0, 0, 0],
            max: shape.as_xyz(),
        }
    }

    /// Intersect with the bounds of `shape`; `None` if nothing remains.
    pub fn clamp_to(&self, shape: VoxelShape) -> Option<Self> {
        let dims = shape.as_xyz();
        let mut min = [0usize; 3];
        let mut max = [0usize; 3];
        for axis in 0..3 {
            min[axis] = self.min[axis].min(dims[axis]);
            max[axis] = self.max[axis].min(dims[axis]);
            if max[axis] <= min[axis] {
                return None;
            }
        }
        Some(Self { min, max })
    }

    pub fn voxel_count(&self) -> usize {
        (0..3)
            .map(|axis| self.max[axis].saturating_sub(self.min[axis]))
            .product()
    }

    /// View of the region inside a `[z, y, x]` array.
    ///
    /// The region must already be clamped to the array's shape.
    pub fn view<'a>(&self, data: &'a Array3<f64>) -> ArrayView3<'a, f64> {
        data.slice(s![
            self.min[2]..self.max[2],
            self.min[1]..self.max[1],
            self.min[0]..self.max[0]
        ])
    }
}
