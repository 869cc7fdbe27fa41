//! Geometric domains that label points are placed on or inside.
//!
//! A specimen object hands the core a [`GeometricDomain`] describing its
//! current shape. The core only reads it: measures it, samples it, and uses
//! its vertices as point labels.

pub mod mesh;

use nalgebra::{Rotation3, Vector3};
use serde::{Deserialize, Serialize};

pub use mesh::{GeometryError, TetrahedralMesh, TriangleMesh};

/// Kind of continuous domain a sampler can draw from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DomainKind {
    /// Triangulated surface; densities in labels per µm²
    Surface,
    /// Tetrahedralized solid; densities in labels per µm³
    Volume,
}

impl DomainKind {
    /// Factor that converts a user-facing density into labels per native unit.
    ///
    /// Geometry is in nanometres, densities are given per µm² or µm³.
    pub fn density_scale(self) -> f64 {
        match self {
            DomainKind::Surface => 1e-6,
            DomainKind::Volume => 1e-9,
        }
    }

    pub fn density_units(self) -> &'static str {
        match self {
            DomainKind::Surface => "1/µm^2",
            DomainKind::Volume => "1/µm^3",
        }
    }
}

/// Current geometry of a specimen object (nanometres)
#[derive(Debug, Clone, PartialEq)]
pub enum GeometricDomain {
    Surface(TriangleMesh),
    Solid(TetrahedralMesh),
    /// Bare point set; has no area or volume to sample
    Points(Vec<Vector3<f64>>),
}

impl GeometricDomain {
    /// Samplable kind of the domain, `None` for point sets
    pub fn kind(&self) -> Option<DomainKind> {
        match self {
            GeometricDomain::Surface(_) => Some(DomainKind::Surface),
            GeometricDomain::Solid(_) => Some(DomainKind::Volume),
            GeometricDomain::Points(_) => None,
        }
    }

    /// Area (surface) or volume (solid); zero for point sets
    pub fn measure(&self) -> f64 {
        match self {
            GeometricDomain::Surface(mesh) => mesh.area(),
            GeometricDomain::Solid(mesh) => mesh.volume(),
            GeometricDomain::Points(_) => 0.0,
        }
    }

    pub fn vertices(&self) -> &[Vector3<f64>] {
        match self {
            GeometricDomain::Surface(mesh) => mesh.vertices(),
            GeometricDomain::Solid(mesh) => mesh.vertices(),
            GeometricDomain::Points(points) => points,
        }
    }

    /// The domain's boundary surface, used by surface labels on solids
    pub fn surface(&self) -> Option<TriangleMesh> {
        match self {
            GeometricDomain::Surface(mesh) => Some(mesh.clone()),
            GeometricDomain::Solid(mesh) => Some(mesh.boundary_surface()),
            GeometricDomain::Points(_) => None,
        }
    }

    pub fn map_vertices(&self, f: impl Fn(&Vector3<f64>) -> Vector3<f64>) -> Self {
        match self {
            GeometricDomain::Surface(mesh) => GeometricDomain::Surface(mesh.map_vertices(f)),
            GeometricDomain::Solid(mesh) => GeometricDomain::Solid(mesh.map_vertices(f)),
            GeometricDomain::Points(points) => {
                GeometricDomain::Points(points.iter().map(f).collect())
            }
        }
    }
}

/// Scale, then rotate (X, then Y, then Z, degrees), then translate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub translation: [f64; 3],
    pub rotation_deg: [f64; 3],
    pub scale: [f64; 3],
}

impl Default for Pose {
    fn default() -> Self {
        Self {
            translation: [0.0; 3],
            rotation_deg: [0.0; 3],
            scale: [1.0; 3],
        }
    }
}

impl Pose {
    pub fn apply(&self, point: &Vector3<f64>) -> Vector3<f64> {
        let scaled = Vector3::new(
            point.x * self.scale[0],
            point.y * self.scale[1],
            point.z * self.scale[2],
        );
        let rotation = Rotation3::from_axis_angle(&Vector3::z_axis(), self.rotation_deg[2].to_radians())
            * Rotation3::from_axis_angle(&Vector3::y_axis(), self.rotation_deg[1].to_radians())
            * Rotation3::from_axis_angle(&Vector3::x_axis(), self.rotation_deg[0].to_radians());
        rotation * scaled + Vector3::from(self.translation)
    }

    pub fn transform(&self, domain: &GeometricDomain) -> GeometricDomain {
        domain.map_vertices(|v| self.apply(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_density_scales() {
        assert_eq!(DomainKind::Surface.density_scale(), 1e-6);
        assert_eq!(DomainKind::Volume.density_scale(), 1e-9);
    }

    #[test]
    fn test_point_domain_has_no_kind() {
        let domain = GeometricDomain::Points(vec![Vector3::zeros()]);
        assert_eq!(domain.kind(), None);
        assert_eq!(domain.measure(), 0.0);
    }

    #[test]
    fn test_pose_scales_measure() {
        let domain = GeometricDomain::Surface(TriangleMesh::rectangle(100.0, 100.0));
        let pose = Pose {
            scale: [2.0, 3.0, 1.0],
            rotation_deg: [30.0, 10.0, 45.0],
            translation: [5.0, -5.0, 100.0],
        };
        assert_relative_eq!(pose.transform(&domain).measure(), 60_000.0, epsilon = 1e-6);
    }

    #[test]
    fn test_pose_rotation_about_z() {
        let pose = Pose {
            rotation_deg: [0.0, 0.0, 90.0],
            ..Pose::default()
        };
        let p = pose.apply(&Vector3::new(1.0, 0.0, 0.0));
        assert_relative_eq!(p.x, 0.0, epsilon = 1e-12);
        assert_relative_eq!(p.y, 1.0, epsilon = 1e-12);
    }
}
