//! Model parameters, activation masks and change tokens.
//!
//! Every tunable scalar of the model (kernel physics, object pose and
//! dimensions, label densities, optimizer tuning values) is a
//! [`ParameterDescriptor`] stored in the [`ParameterRegistry`] of the component
//! that owns it. Descriptors are addressed by a typed [`ParameterId`], never by
//! formatted strings.
//!
//! Each registry carries a revision counter. Mutations return a
//! [`ChangeToken`] with the new revision; owners compare it against the
//! revision their cached products (sample sets, kernels) were built from and
//! regenerate lazily before the next render.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by parameter access
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParameterError {
    #[error("Parameter index {index} is out of range for a vector of length {len}")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("Parameter '{0}' is read-only")]
    ReadOnly(String),
    #[error("Parameter '{name}' cannot take non-finite value {value}")]
    NotFinite { name: String, value: f64 },
    #[error("No parameter with id '{0}'")]
    UnknownId(String),
}

/// Stable identifier of a parameter within its owner.
///
/// Indexed ids address per-element parameters such as the coordinates of
/// point `i` of a point set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParameterId {
    pub key: &'static str,
    pub index: Option<usize>,
}

impl ParameterId {
    pub const fn new(key: &'static str) -> Self {
        Self { key, index: None }
    }

    pub const fn indexed(key: &'static str, index: usize) -> Self {
        Self {
            key,
            index: Some(index),
        }
    }
}

impl fmt::Display for ParameterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index {
            Some(index) => write!(f, "{}[{}]", self.key, index),
            None => write!(f, "{}", self.key),
        }
    }
}

/// Numeric storage kind of a parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NumericKind {
    Integer,
    Float,
    Double,
}

impl NumericKind {
    /// Bring a value to the precision of this kind
    pub fn coerce(self, value: f64) -> f64 {
        match self {
            NumericKind::Integer => value.round(),
            NumericKind::Float => value as f32 as f64,
            NumericKind::Double => value,
        }
    }
}

/// Description and current value of one model parameter
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterDescriptor {
    pub id: ParameterId,
    pub name: String,
    pub kind: NumericKind,
    value: f64,
    pub units: &'static str,
    pub editable: bool,
    pub optimizable: bool,
    pub range: Option<(f64, f64)>,
}

impl ParameterDescriptor {
    fn with_kind(
        id: ParameterId,
        name: impl Into<String>,
        kind: NumericKind,
        value: f64,
        units: &'static str,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
            value: kind.coerce(value),
            units,
            editable: true,
            optimizable: true,
            range: None,
        }
    }

    pub fn double(
        id: ParameterId,
        name: impl Into<String>,
        value: f64,
        units: &'static str,
    ) -> Self {
        Self::with_kind(id, name, NumericKind::Double, value, units)
    }

    pub fn float(id: ParameterId, name: impl Into<String>, value: f64, units: &'static str) -> Self {
        Self::with_kind(id, name, NumericKind::Float, value, units)
    }

    pub fn integer(
        id: ParameterId,
        name: impl Into<String>,
        value: f64,
        units: &'static str,
    ) -> Self {
        Self::with_kind(id, name, NumericKind::Integer, value, units)
    }

    /// Editable by users but never placed in a search
    pub fn fixed(mut self) -> Self {
        self.optimizable = false;
        self
    }

    /// Derived quantity: neither editable nor optimizable
    pub fn read_only(mut self) -> Self {
        self.editable = false;
        self.optimizable = false;
        self
    }

    /// Clamp all future values into `[min, max]`
    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.range = Some((min, max));
        self.value = self.normalize(self.value);
        self
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    fn normalize(&self, value: f64) -> f64 {
        let value = match self.range {
            Some((min, max)) => value.clamp(min, max),
            None => value,
        };
        self.kind.coerce(value)
    }
}

/// Component that owns a registry, used to route change tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterOwner {
    Kernel,
    Object(usize),
    Fluorophore { object: usize, property: usize },
    Optimizer,
    Unattached,
}

/// Proof of a mutation: the owner and the registry revision it produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeToken {
    pub owner: ParameterOwner,
    pub revision: u64,
}

/// Serializable view of one parameter for reports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSnapshot {
    pub name: String,
    pub value: f64,
    pub units: String,
    pub optimizable: bool,
    pub active: bool,
}

/// Ordered descriptors plus their activation mask
#[derive(Debug, Clone)]
pub struct ParameterRegistry {
    owner: ParameterOwner,
    descriptors: Vec<ParameterDescriptor>,
    mask: Vec<bool>,
    revision: u64,
}

impl ParameterRegistry {
    pub fn new(owner: ParameterOwner) -> Self {
        Self {
            owner,
            descriptors: Vec::new(),
            mask: Vec::new(),
            revision: 0,
        }
    }

    pub fn owner(&self) -> ParameterOwner {
        self.owner
    }

    /// Re-home the registry, e.g. when an object is added to a specimen
    pub fn set_owner(&mut self, owner: ParameterOwner) {
        self.owner = owner;
    }

    /// Append a descriptor and return its index
    pub fn register(&mut self, descriptor: ParameterDescriptor) -> usize {
        debug_assert!(
            self.index_of(descriptor.id).is_none(),
            "duplicate parameter id {}",
            descriptor.id
        );
        self.descriptors.push(descriptor);
        self.mask.push(false);
        self.descriptors.len() - 1
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn descriptors(&self) -> &[ParameterDescriptor] {
        &self.descriptors
    }

    pub fn descriptor(&self, index: usize) -> Option<&ParameterDescriptor> {
        self.descriptors.get(index)
    }

    pub fn index_of(&self, id: ParameterId) -> Option<usize> {
        self.descriptors.iter().position(|d| d.id == id)
    }

    pub fn get(&self, index: usize) -> Option<f64> {
        self.descriptors.get(index).map(|d| d.value)
    }

    pub fn value(&self, id: ParameterId) -> Option<f64> {
        self.index_of(id).and_then(|i| self.get(i))
    }

    /// Set a value through the public path (respects the editable flag)
    pub fn set(&mut self, index: usize, value: f64) -> Result<ChangeToken, ParameterError> {
        let len = self.descriptors.len();
        let descriptor = self
            .descriptors
            .get_mut(index)
            .ok_or(ParameterError::IndexOutOfRange { index, len })?;

        if !descriptor.editable {
            return Err(ParameterError::ReadOnly(descriptor.name.clone()));
        }
        if !value.is_finite() {
            return Err(ParameterError::NotFinite {
                name: descriptor.name.clone(),
                value,
            });
        }

        let normalized = descriptor.normalize(value);
        if normalized != descriptor.value {
            descriptor.value = normalized;
            self.revision += 1;
        }
        Ok(self.token())
    }

    pub fn set_by_id(&mut self, id: ParameterId, value: f64) -> Result<ChangeToken, ParameterError> {
        let index = self
            .index_of(id)
            .ok_or_else(|| ParameterError::UnknownId(id.to_string()))?;
        self.set(index, value)
    }

    /// Refresh a derived (read-only) value without bumping the revision
    pub fn update_derived(&mut self, id: ParameterId, value: f64) {
        if let Some(index) = self.index_of(id) {
            let descriptor = &mut self.descriptors[index];
            descriptor.value = descriptor.kind.coerce(value);
        }
    }

    /// Record a structural change that did not go through `set`
    pub fn touch(&mut self) -> ChangeToken {
        self.revision += 1;
        self.token()
    }

    pub fn is_optimizable(&self, index: usize) -> bool {
        self.descriptors
            .get(index)
            .map(|d| d.optimizable && d.editable)
            .unwrap_or(false)
    }

    pub fn mask(&self, index: usize) -> bool {
        self.mask.get(index).copied().unwrap_or(false)
    }

    /// Activate or deactivate a parameter for searches.
    ///
    /// Activating a non-optimizable parameter is rejected and leaves the mask
    /// false. Returns whether the request was applied.
    pub fn set_mask(&mut self, index: usize, active: bool) -> bool {
        if index >= self.mask.len() || (active && !self.is_optimizable(index)) {
            return false;
        }
        self.mask[index] = active;
        true
    }

    pub fn snapshot(&self) -> Vec<ParameterSnapshot> {
        self.descriptors
            .iter()
            .zip(&self.mask)
            .map(|(d, &active)| ParameterSnapshot {
                name: d.name.clone(),
                value: d.value,
                units: d.units.to_string(),
                optimizable: d.optimizable && d.editable,
                active,
            })
            .collect()
    }

    fn token(&self) -> ChangeToken {
        ChangeToken {
            owner: self.owner,
            revision: self.revision,
        }
    }
}

/// Flat, ordered view over all parameters of a model.
///
/// Implemented by a single registry and by the simulation aggregate, which
/// concatenates the registries of all of its components.
pub trait ParameterVector {
    fn parameter_count(&self) -> usize;
    fn parameter(&self, index: usize) -> Option<f64>;
    fn set_parameter(&mut self, index: usize, value: f64) -> Result<ChangeToken, ParameterError>;
    fn is_optimizable(&self, index: usize) -> bool;
    fn mask(&self, index: usize) -> bool;
    fn set_mask(&mut self, index: usize, active: bool) -> bool;
    fn parameter_name(&self, index: usize) -> Option<String>;

    /// Indices exposed to a search: optimizable and masked on
    fn active_indices(&self) -> Vec<usize> {
        (0..self.parameter_count())
            .filter(|&i| self.is_optimizable(i) && self.mask(i))
            .collect()
    }

    /// Values at `indices`, in order
    fn gather(&self, indices: &[usize]) -> Vec<f64> {
        indices
            .iter()
            .map(|&i| self.parameter(i).unwrap_or(f64::NAN))
            .collect()
    }

    /// Write `values` back to `indices`; other entries keep their value
    fn scatter(&mut self, indices: &[usize], values: &[f64]) -> Result<(), ParameterError> {
        for (&index, &value) in indices.iter().zip(values) {
            self.set_parameter(index, value)?;
        }
        Ok(())
    }
}

impl ParameterVector for ParameterRegistry {
    fn parameter_count(&self) -> usize {
        self.len()
    }

    fn parameter(&self, index: usize) -> Option<f64> {
        self.get(index)
    }

    fn set_parameter(&mut self, index: usize, value: f64) -> Result<ChangeToken, ParameterError> {
        self.set(index, value)
    }

    fn is_optimizable(&self, index: usize) -> bool {
        ParameterRegistry::is_optimizable(self, index)
    }

    fn mask(&self, index: usize) -> bool {
        ParameterRegistry::mask(self, index)
    }

    fn set_mask(&mut self, index: usize, active: bool) -> bool {
        ParameterRegistry::set_mask(self, index, active)
    }

    fn parameter_name(&self, index: usize) -> Option<String> {
        self.descriptor(index).map(|d| d.name.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WIDTH: ParameterId = ParameterId::new("width");
    const COUNT: ParameterId = ParameterId::new("count");
    const AREA: ParameterId = ParameterId::new("area");

    fn registry() -> ParameterRegistry {
        let mut r = ParameterRegistry::new(ParameterOwner::Object(0));
        r.register(ParameterDescriptor::double(WIDTH, "Width", 100.0, "nm").with_range(0.0, 1e6));
        r.register(ParameterDescriptor::integer(COUNT, "Count", 3.0, "").fixed());
        r.register(ParameterDescriptor::double(AREA, "Area", 0.0, "nm^2").read_only());
        r
    }

    #[test]
    fn test_set_bumps_revision_and_returns_token() {
        let mut r = registry();
        let token = r.set(0, 250.0).unwrap();
        assert_eq!(token.owner, ParameterOwner::Object(0));
        assert_eq!(token.revision, 1);
        assert_eq!(r.get(0), Some(250.0));
    }

    #[test]
    fn test_setting_same_value_keeps_revision() {
        let mut r = registry();
        r.set(0, 100.0).unwrap();
        assert_eq!(r.revision(), 0);
    }

    #[test]
    fn test_integer_kind_rounds_and_range_clamps() {
        let mut r = registry();
        r.set(1, 4.6).unwrap();
        assert_eq!(r.get(1), Some(5.0));
        r.set(0, -20.0).unwrap();
        assert_eq!(r.get(0), Some(0.0));
    }

    #[test]
    fn test_read_only_rejects_set() {
        let mut r = registry();
        assert!(matches!(r.set(2, 1.0), Err(ParameterError::ReadOnly(_))));
        r.update_derived(AREA, 42.0);
        assert_eq!(r.value(AREA), Some(42.0));
        assert_eq!(r.revision(), 0);
    }

    #[test]
    fn test_non_finite_rejected() {
        let mut r = registry();
        assert!(matches!(
            r.set(0, f64::NAN),
            Err(ParameterError::NotFinite { .. })
        ));
    }

    #[test]
    fn test_mask_rejects_non_optimizable() {
        let mut r = registry();
        assert!(!r.set_mask(1, true));
        assert!(!r.mask(1));
        assert!(!r.set_mask(2, true));
        assert!(!r.mask(2));
        assert!(r.set_mask(0, true));
        assert!(r.mask(0));
        assert!(!r.set_mask(17, true));
    }

    #[test]
    fn test_active_indices_and_scatter() {
        let mut r = registry();
        r.set_mask(0, true);
        let active = r.active_indices();
        assert_eq!(active, vec![0]);
        assert_eq!(r.gather(&active), vec![100.0]);

        r.scatter(&active, &[7.0]).unwrap();
        assert_eq!(r.get(0), Some(7.0));
        assert_eq!(r.get(1), Some(3.0));
    }

    #[test]
    fn test_set_by_unknown_id() {
        let mut r = registry();
        assert!(matches!(
            r.set_by_id(ParameterId::indexed("x", 3), 1.0),
            Err(ParameterError::UnknownId(ref s)) if s == "x[3]"
        ));
    }
}
