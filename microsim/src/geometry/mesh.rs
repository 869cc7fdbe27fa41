//! Triangle and tetrahedral meshes handed to the core by geometry collaborators.
//!
//! The meshes are plain value types: vertex positions in nanometres plus
//! index lists. They know their own measure and how to draw a uniformly
//! distributed point inside one of their elements; everything else about how
//! they were produced stays with the collaborator.

use std::collections::HashMap;

use nalgebra::Vector3;
use rand::Rng;
use thiserror::Error;

/// Errors raised when validating mesh connectivity
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeometryError {
    #[error("Element {element} references vertex {vertex} but the mesh has {vertex_count} vertices")]
    InvalidIndex {
        element: usize,
        vertex: usize,
        vertex_count: usize,
    },
    #[error("Vertex {0} has a non-finite coordinate")]
    NonFiniteVertex(usize),
}

fn validate<const N: usize>(
    vertices: &[Vector3<f64>],
    elements: &[[usize; N]],
) -> Result<(), GeometryError> {
    if let Some(i) = vertices.iter().position(|v| !v.iter().all(|c| c.is_finite())) {
        return Err(GeometryError::NonFiniteVertex(i));
    }
    for (element, indices) in elements.iter().enumerate() {
        if let Some(&vertex) = indices.iter().find(|&&v| v >= vertices.len()) {
            return Err(GeometryError::InvalidIndex {
                element,
                vertex,
                vertex_count: vertices.len(),
            });
        }
    }
    Ok(())
}

/// Triangulated surface
#[derive(Debug, Clone, PartialEq)]
pub struct TriangleMesh {
    vertices: Vec<Vector3<f64>>,
    triangles: Vec<[usize; 3]>,
}

impl TriangleMesh {
    pub fn new(
        vertices: Vec<Vector3<f64>>,
        triangles: Vec<[usize; 3]>,
    ) -> Result<Self, GeometryError> {
        validate(&vertices, &triangles)?;
        Ok(Self {
            vertices,
            triangles,
        })
    }

    /// Axis-aligned rectangle in the z = 0 plane, centred on the origin
    pub fn rectangle(width: f64, height: f64) -> Self {
        let (hw, hh) = (width / 2.0, height / 2.0);
        Self {
            vertices: vec![
                Vector3::new(-hw, -hh, 0.0),
                Vector3::new(hw, -hh, 0.0),
                Vector3::new(hw, hh, 0.0),
                Vector3::new(-hw, hh, 0.0),
            ],
            triangles: vec![[0, 1, 2], [0, 2, 3]],
        }
    }

    pub fn vertices(&self) -> &[Vector3<f64>] {
        &self.vertices
    }

    pub fn triangles(&self) -> &[[usize; 3]] {
        &self.triangles
    }

    pub fn triangle_area(&self, index: usize) -> f64 {
        let [a, b, c] = self.triangles[index];
        let (a, b, c) = (self.vertices[a], self.vertices[b], self.vertices[c]);
        0.5 * (b - a).cross(&(c - a)).norm()
    }

    /// Total surface area (nm²)
    pub fn area(&self) -> f64 {
        (0..self.triangles.len())
            .map(|i| self.triangle_area(i))
            .sum()
    }

    /// Uniformly distributed point inside triangle `index`.
    ///
    /// Square-root barycentric warp, so density is independent of the
    /// triangle's shape.
    pub fn sample_triangle<R: Rng + ?Sized>(&self, index: usize, rng: &mut R) -> Vector3<f64> {
        let [a, b, c] = self.triangles[index];
        let (a, b, c) = (self.vertices[a], self.vertices[b], self.vertices[c]);

        let s = rng.gen::<f64>().sqrt();
        let r2: f64 = rng.gen();
        a * (1.0 - s) + b * (s * (1.0 - r2)) + c * (s * r2)
    }

    /// Apply `f` to every vertex
    pub fn map_vertices(&self, f: impl Fn(&Vector3<f64>) -> Vector3<f64>) -> Self {
        Self {
            vertices: self.vertices.iter().map(f).collect(),
            triangles: self.triangles.clone(),
        }
    }
}

/// Tetrahedralized solid
#[derive(Debug, Clone, PartialEq)]
pub struct TetrahedralMesh {
    vertices: Vec<Vector3<f64>>,
    tetrahedra: Vec<[usize; 4]>,
}

impl TetrahedralMesh {
    pub fn new(
        vertices: Vec<Vector3<f64>>,
        tetrahedra: Vec<[usize; 4]>,
    ) -> Result<Self, GeometryError> {
        validate(&vertices, &tetrahedra)?;
        Ok(Self {
            vertices,
            tetrahedra,
        })
    }

    /// Axis-aligned box centred on the origin, split into six tetrahedra
    /// around its main diagonal.
    pub fn cuboid(size_x: f64, size_y: f64, size_z: f64) -> Self {
        let half = Vector3::new(size_x / 2.0, size_y / 2.0, size_z / 2.0);
        // Corner n has bits (x, y, z) = (n & 1, n & 2, n & 4).
        let vertices = (0..8)
            .map(|n| {
                Vector3::new(
                    if n & 1 == 0 { -half.x } else { half.x },
                    if n & 2 == 0 { -half.y } else { half.y },
                    if n & 4 == 0 { -half.z } else { half.z },
                )
            })
            .collect();
        let tetrahedra = vec![
            [0, 1, 3, 7],
            [0, 1, 5, 7],
            [0, 2, 3, 7],
            [0, 2, 6, 7],
            [0, 4, 5, 7],
            [0, 4, 6, 7],
        ];
        Self {
            vertices,
            tetrahedra,
        }
    }

    pub fn vertices(&self) -> &[Vector3<f64>] {
        &self.vertices
    }

    pub fn tetrahedra(&self) -> &[[usize; 4]] {
        &self.tetrahedra
    }

    pub fn tetrahedron_volume(&self, index: usize) -> f64 {
        let [a, b, c, d] = self.tetrahedra[index];
        let a = self.vertices[a];
        let (b, c, d) = (
            self.vertices[b] - a,
            self.vertices[c] - a,
            self.vertices[d] - a,
        );
        b.dot(&c.cross(&d)).abs() / 6.0
    }

    /// Total volume (nm³)
    pub fn volume(&self) -> f64 {
        (0..self.tetrahedra.len())
            .map(|i| self.tetrahedron_volume(i))
            .sum()
    }

    /// Uniformly distributed point inside tetrahedron `index`.
    ///
    /// Folds a uniform point of the unit cube into the unit tetrahedron
    /// (Rocchini & Cignoni) and maps it through barycentric weights.
    pub fn sample_tetrahedron<R: Rng + ?Sized>(&self, index: usize, rng: &mut R) -> Vector3<f64> {
        let mut s: f64 = rng.gen();
        let mut t: f64 = rng.gen();
        let mut u: f64 = rng.gen();

        if s + t > 1.0 {
            s = 1.0 - s;
            t = 1.0 - t;
        }
        if t + u > 1.0 {
            let tmp = u;
            u = 1.0 - s - t;
            t = 1.0 - tmp;
        } else if s + t + u > 1.0 {
            let tmp = u;
            u = s + t + u - 1.0;
            s = 1.0 - t - tmp;
        }
        let a = 1.0 - s - t - u;

        let [i0, i1, i2, i3] = self.tetrahedra[index];
        self.vertices[i0] * a
            + self.vertices[i1] * s
            + self.vertices[i2] * t
            + self.vertices[i3] * u
    }

    /// Triangles that belong to exactly one tetrahedron
    pub fn boundary_surface(&self) -> TriangleMesh {
        let mut faces: HashMap<[usize; 3], ([usize; 3], usize)> = HashMap::new();
        for tet in &self.tetrahedra {
            for skip in 0..4 {
                let face: Vec<usize> = (0..4).filter(|&i| i != skip).map(|i| tet[i]).collect();
                let original = [face[0], face[1], face[2]];
                let mut key = original;
                key.sort_unstable();
                faces
                    .entry(key)
                    .and_modify(|entry| entry.1 += 1)
                    .or_insert((original, 1));
            }
        }

        let mut triangles: Vec<[usize; 3]> = faces
            .into_values()
            .filter(|&(_, count)| count == 1)
            .map(|(face, _)| face)
            .collect();
        triangles.sort_unstable();

        TriangleMesh {
            vertices: self.vertices.clone(),
            triangles,
        }
    }

    pub fn map_vertices(&self, f: impl Fn(&Vector3<f64>) -> Vector3<f64>) -> Self {
        Self {
            vertices: self.vertices.iter().map(f).collect(),
            tetrahedra: self.tetrahedra.clone(),
        }
    }
}
