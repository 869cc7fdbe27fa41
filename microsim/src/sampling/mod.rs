//! Density-controlled placement of fluorescent label points.
//!
//! A [`FluorophoreSampler`] turns a continuous domain (triangulated surface or
//! tetrahedralized solid) into an ordered [`SampleSet`]. Placement is uniform
//! over area or volume: an element is picked with probability proportional to
//! its measure and a uniform point is drawn inside it, so the outcome does not
//! depend on how finely the collaborator tessellated the geometry.
//!
//! # Counts
//!
//! - [`SamplingMode::FixedDensity`]: the number of samples is Poisson
//!   distributed with mean `density × measure`.
//! - [`SamplingMode::FixedNumber`]: exactly the requested number.
//!
//! # Reproducibility
//!
//! Every [`FluorophoreSampler::update`] reseeds from the sampler's seed, so
//! unchanged inputs reproduce the same sample set, positions included. Call
//! [`FluorophoreSampler::reseed`] to draw a new arrangement.

pub mod pattern;

use nalgebra::Vector3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Poisson};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use shared::Quaternion;

use crate::geometry::{DomainKind, GeometricDomain, TetrahedralMesh, TriangleMesh};
pub use pattern::{place_template, ring_template, SamplePattern};

/// Errors raised while sampling a domain
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SamplingError {
    #[error("A {expected:?} sampler cannot sample this domain")]
    DomainMismatch { expected: DomainKind },
    #[error("Cannot place {requested} labels on a domain with zero measure")]
    EmptyDomain { requested: usize },
}

/// How the number of samples is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SamplingMode {
    FixedDensity,
    FixedNumber,
}

/// One sample: a centre and, for randomized ring patterns, its orientation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplePoint {
    pub position: Vector3<f64>,
    pub orientation: Option<Quaternion>,
}

/// Ordered samples plus the pattern that expands them into emitters
#[derive(Debug, Clone, PartialEq)]
pub struct SampleSet {
    points: Vec<SamplePoint>,
    pattern: SamplePattern,
}

impl SampleSet {
    pub fn new(points: Vec<SamplePoint>, pattern: SamplePattern) -> Self {
        Self { points, pattern }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new(), SamplePattern::SinglePoint)
    }

    /// Number of samples (not emitters)
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[SamplePoint] {
        &self.points
    }

    pub fn pattern(&self) -> SamplePattern {
        self.pattern
    }

    pub fn emitter_count(&self) -> usize {
        self.points.len() * self.pattern.emitters_per_sample()
    }

    /// World positions of all emitters, samples in order
    pub fn emitter_positions(&self) -> Vec<Vector3<f64>> {
        match self.pattern {
            SamplePattern::SinglePoint => self.points.iter().map(|p| p.position).collect(),
            SamplePattern::PointRing { points, radius } => {
                let template = ring_template(points, radius);
                self.points
                    .iter()
                    .flat_map(|p| place_template(&template, &p.position, p.orientation.as_ref()))
                    .collect()
            }
        }
    }
}

/// Cumulative measure table for picking elements proportionally to measure
struct ElementTable {
    cumulative: Vec<f64>,
}

impl ElementTable {
    fn new(measures: impl Iterator<Item = f64>) -> Self {
        let mut total = 0.0;
        let cumulative = measures
            .map(|m| {
                total += m.max(0.0);
                total
            })
            .collect();
        Self { cumulative }
    }

    fn total(&self) -> f64 {
        self.cumulative.last().copied().unwrap_or(0.0)
    }

    fn pick<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        let target = rng.gen::<f64>() * self.total();
        let index = self.cumulative.partition_point(|&c| c <= target);
        index.min(self.cumulative.len().saturating_sub(1))
    }
}

enum Sampleable {
    Surface(TriangleMesh),
    Solid(TetrahedralMesh),
}

impl Sampleable {
    fn table(&self) -> ElementTable {
        match self {
            Sampleable::Surface(mesh) => {
                ElementTable::new((0..mesh.triangles().len()).map(|i| mesh.triangle_area(i)))
            }
            Sampleable::Solid(mesh) => ElementTable::new(
                (0..mesh.tetrahedra().len()).map(|i| mesh.tetrahedron_volume(i)),
            ),
        }
    }

    fn sample<R: Rng + ?Sized>(&self, element: usize, rng: &mut R) -> Vector3<f64> {
        match self {
            Sampleable::Surface(mesh) => mesh.sample_triangle(element, rng),
            Sampleable::Solid(mesh) => mesh.sample_tetrahedron(element, rng),
        }
    }
}

/// Sampler bound to one domain kind that owns its current sample set
#[derive(Debug, Clone)]
pub struct FluorophoreSampler {
    kind: DomainKind,
    mode: SamplingMode,
    scaled_density: f64,
    count: usize,
    pattern: SamplePattern,
    randomize_orientations: bool,
    seed: u64,
    samples: SampleSet,
}

impl FluorophoreSampler {
    pub fn new(kind: DomainKind, seed: u64) -> Self {
        Self {
            kind,
            mode: SamplingMode::FixedDensity,
            scaled_density: 0.0,
            count: 0,
            pattern: SamplePattern::SinglePoint,
            randomize_orientations: true,
            seed,
            samples: SampleSet::empty(),
        }
    }

    pub fn kind(&self) -> DomainKind {
        self.kind
    }

    pub fn sampling_mode(&self) -> SamplingMode {
        self.mode
    }

    pub fn set_sampling_mode(&mut self, mode: SamplingMode) {
        self.mode = mode;
    }

    /// Set the density in user units (per µm² or µm³).
    ///
    /// The domain kind's scale is applied here, once, and the scaled value is
    /// what sampling uses.
    pub fn set_density(&mut self, density: f64) {
        self.scaled_density = density.max(0.0) * self.kind.density_scale();
    }

    /// Density in user units
    pub fn density(&self) -> f64 {
        self.scaled_density / self.kind.density_scale()
    }

    /// Density in labels per nm² or nm³
    pub fn scaled_density(&self) -> f64 {
        self.scaled_density
    }

    pub fn number_of_fluorophores(&self) -> usize {
        self.count
    }

    pub fn set_number_of_fluorophores(&mut self, count: usize) {
        self.count = count;
    }

    pub fn sample_pattern(&self) -> SamplePattern {
        self.pattern
    }

    pub fn set_sample_pattern(&mut self, pattern: SamplePattern) {
        self.pattern = pattern;
    }

    pub fn set_randomize_pattern_orientations(&mut self, randomize: bool) {
        self.randomize_orientations = randomize;
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn reseed(&mut self, seed: u64) {
        self.seed = seed;
    }

    /// Expected number of samples for a domain of the given measure
    pub fn expected_count(&self, measure: f64) -> f64 {
        match self.mode {
            SamplingMode::FixedDensity => self.scaled_density * measure.max(0.0),
            SamplingMode::FixedNumber => self.count as f64,
        }
    }

    pub fn samples(&self) -> &SampleSet {
        &self.samples
    }

    /// Regenerate the sample set from scratch for `domain`.
    ///
    /// Surface samplers accept solids and sample their boundary surface.
    pub fn update(&mut self, domain: &GeometricDomain) -> Result<&SampleSet, SamplingError> {
        let sampleable = match (self.kind, domain) {
            (DomainKind::Surface, _) => domain.surface().map(Sampleable::Surface),
            (DomainKind::Volume, GeometricDomain::Solid(mesh)) => {
                Some(Sampleable::Solid(mesh.clone()))
            }
            (DomainKind::Volume, _) => None,
        }
        .ok_or(SamplingError::DomainMismatch {
            expected: self.kind,
        })?;

        let table = sampleable.table();
        let measure = table.total();
        let mut rng = StdRng::seed_from_u64(self.seed);

        let count = match self.mode {
            SamplingMode::FixedDensity => {
                let expected = self.expected_count(measure);
                match Poisson::new(expected) {
                    Ok(poisson) if expected > 0.0 => {
                        let drawn: f64 = poisson.sample(&mut rng);
                        drawn as usize
                    }
                    _ => 0,
                }
            }
            SamplingMode::FixedNumber => {
                if self.count > 0 && measure <= 0.0 {
                    return Err(SamplingError::EmptyDomain {
                        requested: self.count,
                    });
                }
                self.count
            }
        };

        let randomize =
            self.randomize_orientations && matches!(self.pattern, SamplePattern::PointRing { .. });

        let points = (0..count)
            .map(|_| {
                let element = table.pick(&mut rng);
                let position = sampleable.sample(element, &mut rng);
                let orientation = randomize.then(|| Quaternion::random_uniform(&mut rng));
                SamplePoint {
                    position,
                    orientation,
                }
            })
            .collect();

        log::debug!(
            "Sampled {count} {:?} labels over measure {measure:.4e} (expected {:.1})",
            self.kind,
            self.expected_count(measure)
        );

        self.samples = SampleSet::new(points, self.pattern);
        Ok(&self.samples)
    }
}
