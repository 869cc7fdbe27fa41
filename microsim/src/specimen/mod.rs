//! Virtual specimen objects.
//!
//! A specimen object owns its geometry parameters and its fluorescent
//! labellings. The core only asks it for the current [`GeometricDomain`], its
//! bounding measure and, for objects whose points may move freely, to apply
//! per-point displacements.

pub mod fluorophore;
pub mod mesh_object;
pub mod point_set;

use std::fmt;

use nalgebra::Vector3;

use crate::geometry::GeometricDomain;
use crate::parameters::ParameterRegistry;
pub use fluorophore::{FluorophoreProperty, LabelSource};
pub use mesh_object::MeshObject;
pub use point_set::PointSetObject;

pub trait SpecimenObject: fmt::Debug + Send {
    fn name(&self) -> &str;

    fn parameters(&self) -> &ParameterRegistry;

    fn parameters_mut(&mut self) -> &mut ParameterRegistry;

    /// Current geometry in world coordinates (nm)
    fn geometry(&self) -> GeometricDomain;

    /// Area of a surface or volume of a solid, zero for point sets
    fn bounding_measure(&self) -> f64 {
        self.geometry().measure()
    }

    fn fluorophores(&self) -> &[FluorophoreProperty];

    fn fluorophores_mut(&mut self) -> &mut [FluorophoreProperty];

    /// Recompute read-only derived descriptors after a parameter change
    fn refresh_derived(&mut self) {}

    fn supports_point_forces(&self) -> bool {
        false
    }

    /// Move geometry point `point_index` by `displacement` (nm).
    ///
    /// # Returns
    /// `false` when the object does not support point forces or the index is
    /// out of range
    fn apply_point_forces(&mut self, _point_index: usize, _displacement: &Vector3<f64>) -> bool {
        false
    }
}
