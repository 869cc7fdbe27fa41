//! Rigid mesh object with pose and anisotropic scale.

use crate::geometry::{DomainKind, GeometricDomain, Pose};
use crate::parameters::{ParameterDescriptor, ParameterId, ParameterOwner, ParameterRegistry};

use super::{FluorophoreProperty, SpecimenObject};

pub const POSITION: [ParameterId; 3] = [
    ParameterId::new("position_x"),
    ParameterId::new("position_y"),
    ParameterId::new("position_z"),
];
pub const ROTATION: [ParameterId; 3] = [
    ParameterId::new("rotation_x"),
    ParameterId::new("rotation_y"),
    ParameterId::new("rotation_z"),
];
pub const SCALE: [ParameterId; 3] = [
    ParameterId::new("scale_x"),
    ParameterId::new("scale_y"),
    ParameterId::new("scale_z"),
];
pub const MEASURE: ParameterId = ParameterId::new("measure");

const AXES: [&str; 3] = ["X", "Y", "Z"];

/// A surface or solid mesh placed in the world by its pose parameters
#[derive(Debug, Clone)]
pub struct MeshObject {
    name: String,
    base: GeometricDomain,
    parameters: ParameterRegistry,
    fluorophores: Vec<FluorophoreProperty>,
}

impl MeshObject {
    /// Wrap a mesh given in its local frame (nm)
    pub fn new(name: impl Into<String>, base: GeometricDomain) -> Self {
        let mut parameters = ParameterRegistry::new(ParameterOwner::Unattached);
        for (axis, label) in AXES.iter().enumerate() {
            parameters.register(ParameterDescriptor::double(
                POSITION[axis],
                format!("Position {label}"),
                0.0,
                "nm",
            ));
        }
        for (axis, label) in AXES.iter().enumerate() {
            parameters.register(ParameterDescriptor::double(
                ROTATION[axis],
                format!("Rotation {label}"),
                0.0,
                "deg",
            ));
        }
        for (axis, label) in AXES.iter().enumerate() {
            parameters.register(
                ParameterDescriptor::double(SCALE[axis], format!("Scale {label}"), 1.0, "")
                    .with_range(0.0, f64::MAX),
            );
        }
        let (measure_name, measure_units) = match base.kind() {
            Some(DomainKind::Volume) => ("Volume", "nm^3"),
            _ => ("Area", "nm^2"),
        };
        parameters.register(
            ParameterDescriptor::double(MEASURE, measure_name, base.measure(), measure_units)
                .read_only(),
        );

        Self {
            name: name.into(),
            base,
            parameters,
            fluorophores: Vec::new(),
        }
    }

    pub fn with_fluorophore(mut self, property: FluorophoreProperty) -> Self {
        self.fluorophores.push(property);
        self
    }

    pub fn pose(&self) -> Pose {
        let read = |ids: [ParameterId; 3], default: f64| {
            ids.map(|id| self.parameters.value(id).unwrap_or(default))
        };
        Pose {
            translation: read(POSITION, 0.0),
            rotation_deg: read(ROTATION, 0.0),
            scale: read(SCALE, 1.0),
        }
    }
}

impl SpecimenObject for MeshObject {
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
        self.pose().transform(&self.base)
    }

    fn fluorophores(&self) -> &[FluorophoreProperty] {
        &self.fluorophores
    }

    fn fluorophores_mut(&mut self) -> &mut [FluorophoreProperty] {
        &mut self.fluorophores
    }

    fn refresh_derived(&mut self) {
        let measure = self.bounding_measure();
        self.parameters.update_derived(MEASURE, measure);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{TetrahedralMesh, TriangleMesh};
    use approx::assert_relative_eq;

    #[test]
    fn test_scale_updates_derived_area() {
        let mut object = MeshObject::new(
            "sheet",
            GeometricDomain::Surface(TriangleMesh::rectangle(1000.0, 1000.0)),
        );
        assert_relative_eq!(object.parameters().value(MEASURE).unwrap(), 1e6, epsilon = 1e-6);

        object.parameters_mut().set_by_id(SCALE[0], 2.0).unwrap();
        let revision = object.parameters().revision();
        object.refresh_derived();
        assert_relative_eq!(object.parameters().value(MEASURE).unwrap(), 2e6, epsilon = 1e-6);
        // Derived updates do not count as user changes.
        assert_eq!(object.parameters().revision(), revision);
    }

    #[test]
    fn test_measure_is_read_only() {
        let mut object = MeshObject::new(
            "block",
            GeometricDomain::Solid(TetrahedralMesh::cuboid(10.0, 10.0, 10.0)),
        );
        let index = object.parameters().index_of(MEASURE).unwrap();
        assert_eq!(object.parameters().descriptor(index).map(|d| d.name.as_str()), Some("Volume"));
        assert!(object.parameters_mut().set(index, 1.0).is_err());
        assert!(!object.parameters().is_optimizable(index));
    }

    #[test]
    fn test_translation_moves_geometry() {
        let mut object = MeshObject::new(
            "sheet",
            GeometricDomain::Surface(TriangleMesh::rectangle(10.0, 10.0)),
        );
        object.parameters_mut().set_by_id(POSITION[2], 250.0).unwrap();
        assert!(object.geometry().vertices().iter().all(|v| v.z == 250.0));
        assert!(!object.supports_point_forces());
    }
}
