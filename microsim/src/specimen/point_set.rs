//! Free point set whose every coordinate is a parameter.

use nalgebra::Vector3;

use crate::geometry::GeometricDomain;
use crate::parameters::{ParameterDescriptor, ParameterId, ParameterOwner, ParameterRegistry};

use super::{FluorophoreProperty, SpecimenObject};

const KEYS: [&str; 3] = ["point_x", "point_y", "point_z"];
const AXES: [&str; 3] = ["X", "Y", "Z"];

pub fn point_id(point: usize, axis: usize) -> ParameterId {
    ParameterId::indexed(KEYS[axis], point)
}

/// Point cloud labelled on its points; supports direct point forces
#[derive(Debug, Clone)]
pub struct PointSetObject {
    name: String,
    point_count: usize,
    parameters: ParameterRegistry,
    fluorophores: Vec<FluorophoreProperty>,
}

impl PointSetObject {
    /// Create from initial positions (nm) with one point-bound label property
    pub fn new(name: impl Into<String>, points: &[Vector3<f64>]) -> Self {
        let name = name.into();
        let mut parameters = ParameterRegistry::new(ParameterOwner::Unattached);
        for (i, p) in points.iter().enumerate() {
            for axis in 0..3 {
                parameters.register(ParameterDescriptor::double(
                    point_id(i, axis),
                    format!("Point {i} {}", AXES[axis]),
                    p[axis],
                    "nm",
                ));
            }
        }
        let labels = FluorophoreProperty::on_points(format!("{name} labels"), 0);
        Self {
            name,
            point_count: points.len(),
            parameters,
            fluorophores: vec![labels],
        }
    }

    pub fn with_fluorophore(mut self, property: FluorophoreProperty) -> Self {
        self.fluorophores.push(property);
        self
    }

    pub fn point_count(&self) -> usize {
        self.point_count
    }

    pub fn point(&self, index: usize) -> Option<Vector3<f64>> {
        if index >= self.point_count {
            return None;
        }
        // Coordinates are registered in point order, three per point.
        let coordinate = |axis: usize| self.parameters.get(3 * index + axis);
        Some(Vector3::new(coordinate(0)?, coordinate(1)?, coordinate(2)?))
    }

    pub fn points(&self) -> Vec<Vector3<f64>> {
        (0..self.point_count).filter_map(|i| self.point(i)).collect()
    }
}

impl SpecimenObject for PointSetObject {
    fn name(&self) -> &str {
        &self.name
    }

    fn parameters(&self) -> &ParameterRegistry {
        &self.parameters
    }

    fn parameters_mut(&mut self) -> &mut ParameterRegistry {
        &mut self.parameters
    }

    fn geometry(&self) -> GeometricDomain {
        GeometricDomain::Points(self.points())
    }

    fn bounding_measure(&self) -> f64 {
        0.0
    }

    fn fluorophores(&self) -> &[FluorophoreProperty] {
        &self.fluorophores
    }

    fn fluorophores_mut(&mut self) -> &mut [FluorophoreProperty] {
        &mut self.fluorophores
    }

    fn supports_point_forces(&self) -> bool {
        true
    }

    fn apply_point_forces(&mut self, point_index: usize, displacement: &Vector3<f64>) -> bool {
        let Some(current) = self.point(point_index) else {
            return false;
        };
        let target = current + displacement;
        (0..3).all(|axis| {
            self.parameters
                .set(3 * point_index + axis, target[axis])
                .is_ok()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_points_round_trip_through_parameters() {
        let points = vec![Vector3::new(1.0, 2.0, 3.0), Vector3::new(-5.0, 0.5, 0.0)];
        let object = PointSetObject::new("beads", &points);
        assert_eq!(object.points(), points);
        assert_eq!(object.parameters().len(), 6);
        assert_eq!(object.parameters().value(point_id(1, 0)), Some(-5.0));
        assert_eq!(object.bounding_measure(), 0.0);
    }

    #[test]
    fn test_point_forces_move_points() {
        let mut object = PointSetObject::new("beads", &[Vector3::zeros(), Vector3::zeros()]);
        let revision = object.parameters().revision();
        assert!(object.apply_point_forces(1, &Vector3::new(3.0, -1.0, 0.5)));
        assert_eq!(object.point(1), Some(Vector3::new(3.0, -1.0, 0.5)));
        assert_eq!(object.point(0), Some(Vector3::zeros()));
        assert!(object.parameters().revision() > revision);

        assert!(!object.apply_point_forces(2, &Vector3::x()));
    }
}
