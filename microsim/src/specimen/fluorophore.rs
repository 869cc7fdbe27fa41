//! Fluorescent labelling attached to a specimen object.

use nalgebra::Vector3;

use crate::geometry::{DomainKind, GeometricDomain};
use crate::parameters::{ParameterDescriptor, ParameterId, ParameterOwner, ParameterRegistry};
use crate::sampling::{FluorophoreSampler, SamplePattern, SampleSet, SamplingError, SamplingMode};
use crate::synth::LabelBatch;

pub const INTENSITY_SCALE: ParameterId = ParameterId::new("label_intensity_scale");
pub const DENSITY: ParameterId = ParameterId::new("label_density");
pub const FLUOROPHORE_COUNT: ParameterId = ParameterId::new("label_count");

/// Where the label points of a property come from
#[derive(Debug, Clone)]
pub enum LabelSource {
    /// Stochastically placed on or inside the object's domain
    Sampled(FluorophoreSampler),
    /// One label on every geometry point of the object
    Points,
}

/// Emitters computed for a given pair of revisions
#[derive(Debug, Clone)]
struct LabelCache {
    object_revision: u64,
    property_revision: u64,
    emitters: Vec<Vector3<f64>>,
}

/// One labelling of one object: brightness, channel and label placement.
///
/// Emitter positions are cached and rebuilt when either the owning object's
/// or this property's registry revision moves.
#[derive(Debug, Clone)]
pub struct FluorophoreProperty {
    name: String,
    channel: usize,
    parameters: ParameterRegistry,
    source: LabelSource,
    cache: Option<LabelCache>,
}

impl FluorophoreProperty {
    fn with_source(name: impl Into<String>, channel: usize, source: LabelSource) -> Self {
        let mut parameters = ParameterRegistry::new(ParameterOwner::Unattached);
        parameters.register(
            ParameterDescriptor::double(INTENSITY_SCALE, "Intensity scale", 1.0, "")
                .with_range(0.0, f64::MAX),
        );
        if let LabelSource::Sampled(sampler) = &source {
            parameters.register(
                ParameterDescriptor::double(
                    DENSITY,
                    "Density",
                    sampler.density(),
                    sampler.kind().density_units(),
                )
                .with_range(0.0, f64::MAX),
            );
            parameters.register(
                ParameterDescriptor::integer(
                    FLUOROPHORE_COUNT,
                    "Number of fluorophores",
                    sampler.number_of_fluorophores() as f64,
                    "",
                )
                .with_range(0.0, f64::MAX)
                .fixed(),
            );
        }
        Self {
            name: name.into(),
            channel,
            parameters,
            source,
            cache: None,
        }
    }

    /// Labels placed at a fixed density (per µm² or µm³) over a domain
    pub fn sampled(
        name: impl Into<String>,
        channel: usize,
        kind: DomainKind,
        density: f64,
        seed: u64,
    ) -> Self {
        let mut sampler = FluorophoreSampler::new(kind, seed);
        sampler.set_density(density);
        Self::with_source(name, channel, LabelSource::Sampled(sampler))
    }

    /// One label on every point of the object
    pub fn on_points(name: impl Into<String>, channel: usize) -> Self {
        Self::with_source(name, channel, LabelSource::Points)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn channel(&self) -> usize {
        self.channel
    }

    pub fn parameters(&self) -> &ParameterRegistry {
        &self.parameters
    }

    pub fn parameters_mut(&mut self) -> &mut ParameterRegistry {
        &mut self.parameters
    }

    pub fn source(&self) -> &LabelSource {
        &self.source
    }

    pub fn intensity_scale(&self) -> f64 {
        self.parameters.value(INTENSITY_SCALE).unwrap_or(1.0)
    }

    pub fn is_point_bound(&self) -> bool {
        matches!(self.source, LabelSource::Points)
    }

    fn sampler_mut(&mut self) -> Option<&mut FluorophoreSampler> {
        match &mut self.source {
            LabelSource::Sampled(sampler) => Some(sampler),
            LabelSource::Points => None,
        }
    }

    /// No effect on point-bound labels
    pub fn set_sampling_mode(&mut self, mode: SamplingMode) {
        if let Some(sampler) = self.sampler_mut() {
            sampler.set_sampling_mode(mode);
            self.parameters.touch();
        }
    }

    /// Switch to a fixed label count and set it
    pub fn set_number_of_fluorophores(&mut self, count: usize) -> bool {
        if self.sampler_mut().is_none() {
            return false;
        }
        self.set_sampling_mode(SamplingMode::FixedNumber);
        self.parameters
            .set_by_id(FLUOROPHORE_COUNT, count as f64)
            .is_ok()
    }

    pub fn set_sample_pattern(&mut self, pattern: SamplePattern) {
        if let Some(sampler) = self.sampler_mut() {
            sampler.set_sample_pattern(pattern);
            self.parameters.touch();
        }
    }

    pub fn set_randomize_pattern_orientations(&mut self, randomize: bool) {
        if let Some(sampler) = self.sampler_mut() {
            sampler.set_randomize_pattern_orientations(randomize);
            self.parameters.touch();
        }
    }

    /// Draw a new label arrangement on the next refresh
    pub fn reseed(&mut self, seed: u64) {
        if let Some(sampler) = self.sampler_mut() {
            sampler.reseed(seed);
            self.parameters.touch();
        }
    }

    /// Current sample set of a sampled property
    pub fn samples(&self) -> Option<&SampleSet> {
        match &self.source {
            LabelSource::Sampled(sampler) => Some(sampler.samples()),
            LabelSource::Points => None,
        }
    }

    /// Whether the cached emitters were built for these revisions
    pub fn is_current(&self, object_revision: u64) -> bool {
        self.cache.as_ref().is_some_and(|cache| {
            cache.object_revision == object_revision
                && cache.property_revision == self.parameters.revision()
        })
    }

    /// Rebuild the emitters from `domain` if either revision moved.
    ///
    /// # Arguments
    /// * `domain` - Current geometry of the owning object
    /// * `object_revision` - Registry revision of the owning object
    ///
    /// # Returns
    /// Emitter positions in nm
    pub fn refresh(
        &mut self,
        domain: &GeometricDomain,
        object_revision: u64,
    ) -> Result<&[Vector3<f64>], SamplingError> {
        if !self.is_current(object_revision) {
            let emitters = match &mut self.source {
                LabelSource::Sampled(sampler) => {
                    if let Some(density) = self.parameters.value(DENSITY) {
                        sampler.set_density(density);
                    }
                    if let Some(count) = self.parameters.value(FLUOROPHORE_COUNT) {
                        sampler.set_number_of_fluorophores(count.max(0.0) as usize);
                    }
                    sampler.update(domain)?.emitter_positions()
                }
                LabelSource::Points => domain.vertices().to_vec(),
            };
            log::debug!("Refreshed '{}' with {} emitters", self.name, emitters.len());
            self.cache = Some(LabelCache {
                object_revision,
                property_revision: self.parameters.revision(),
                emitters,
            });
        }
        Ok(self
            .cache
            .as_ref()
            .map(|cache| cache.emitters.as_slice())
            .unwrap_or_default())
    }

    /// Emitters from the last refresh
    pub fn emitters(&self) -> &[Vector3<f64>] {
        self.cache
            .as_ref()
            .map(|cache| cache.emitters.as_slice())
            .unwrap_or_default()
    }

    /// Render input for the emitters from the last refresh
    pub fn label_batch(&self, object_index: usize) -> LabelBatch {
        LabelBatch {
            object_index,
            channel: self.channel,
            intensity_scale: self.intensity_scale(),
            points: self.emitters().to_vec(),
            point_bound: self.is_point_bound(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::TriangleMesh;

    fn square() -> GeometricDomain {
        GeometricDomain::Surface(TriangleMesh::rectangle(1000.0, 1000.0))
    }

    #[test]
    fn test_refresh_is_cached_until_a_revision_moves() {
        let domain = square();
        let mut property = FluorophoreProperty::sampled("membrane", 0, DomainKind::Surface, 100.0, 4);
        let first = property.refresh(&domain, 0).unwrap().to_vec();
        assert!(!first.is_empty());
        assert!(property.is_current(0));
        assert!(!property.is_current(1));

        property.parameters_mut().set_by_id(DENSITY, 400.0).unwrap();
        assert!(!property.is_current(0));
        let denser = property.refresh(&domain, 0).unwrap().len();
        assert!(denser > first.len());
    }

    #[test]
    fn test_fixed_count_through_property() {
        let domain = square();
        let mut property = FluorophoreProperty::sampled("spots", 1, DomainKind::Surface, 0.0, 4);
        assert!(property.set_number_of_fluorophores(12));
        assert_eq!(property.refresh(&domain, 0).unwrap().len(), 12);

        property.set_sample_pattern(SamplePattern::PointRing {
            points: 3,
            radius: 10.0,
        });
        assert_eq!(property.refresh(&domain, 0).unwrap().len(), 36);
        assert_eq!(property.samples().map(|s| s.len()), Some(12));
    }

    #[test]
    fn test_point_labels_follow_vertices() {
        let points = vec![Vector3::new(1.0, 2.0, 3.0), Vector3::new(-4.0, 0.0, 0.0)];
        let domain = GeometricDomain::Points(points.clone());
        let mut property = FluorophoreProperty::on_points("beads", 0);
        assert!(!property.set_number_of_fluorophores(5));
        assert_eq!(property.refresh(&domain, 7).unwrap(), points.as_slice());

        let batch = property.label_batch(2);
        assert!(batch.point_bound);
        assert_eq!(batch.object_index, 2);
        assert_eq!(batch.points, points);
    }

    #[test]
    fn test_domain_mismatch_propagates() {
        let domain = GeometricDomain::Points(vec![Vector3::zeros()]);
        let mut property = FluorophoreProperty::sampled("bulk", 0, DomainKind::Volume, 10.0, 0);
        assert!(property.refresh(&domain, 0).is_err());
    }
}
