//! Scoring a synthesized candidate against an observed reference.
//!
//! Each noise model is an [`ObjectiveFunction`]; lower costs are better. A
//! perfect match scores zero under the Gaussian and cross-correlation models
//! and the reference's own likelihood under the Poisson model. The [`ObjectiveHost`] owns the
//! active model together with the bound reference image and the scoring
//! region, so switching models keeps both.

pub mod models;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use shared::{Volume, VoxelRegion, VoxelShape};

pub use models::{GaussianLikelihood, NormalizedCrossCorrelation, PoissonLikelihood};

/// Errors raised while scoring
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ObjectiveError {
    #[error("Cross-correlation is undefined for a constant image")]
    DegenerateNormalization,
    #[error("Candidate is {candidate} but the reference is {reference}")]
    ShapeMismatch {
        candidate: VoxelShape,
        reference: VoxelShape,
    },
    #[error("Scoring region {0:?} does not overlap the image")]
    EmptyRegion(VoxelRegion),
    #[error("Unknown objective function '{0}'")]
    UnknownObjective(String),
}

/// Noise statistic used to compare images
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NoiseModel {
    Gaussian,
    Poisson,
    NormalizedCrossCorrelation,
}

impl NoiseModel {
    pub const ALL: [NoiseModel; 3] = [
        NoiseModel::Gaussian,
        NoiseModel::Poisson,
        NoiseModel::NormalizedCrossCorrelation,
    ];

    pub fn name(self) -> &'static str {
        match self {
            NoiseModel::Gaussian => "Gaussian noise maximum likelihood",
            NoiseModel::Poisson => "Poisson noise maximum likelihood",
            NoiseModel::NormalizedCrossCorrelation => "Normalized cross correlation",
        }
    }

    pub fn from_name(name: &str) -> Result<Self, ObjectiveError> {
        Self::ALL
            .into_iter()
            .find(|model| model.name() == name)
            .ok_or_else(|| ObjectiveError::UnknownObjective(name.to_string()))
    }

    pub fn build(self) -> Box<dyn ObjectiveFunction> {
        match self {
            NoiseModel::Gaussian => Box::new(GaussianLikelihood),
            NoiseModel::Poisson => Box::new(PoissonLikelihood),
            NoiseModel::NormalizedCrossCorrelation => Box::new(NormalizedCrossCorrelation),
        }
    }
}

impl fmt::Display for NoiseModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub trait ObjectiveFunction: fmt::Debug + Send + Sync {
    fn model(&self) -> NoiseModel;

    fn name(&self) -> &'static str {
        self.model().name()
    }

    /// Cost of `candidate` against `reference` within `region`
    fn score(
        &self,
        candidate: &Volume,
        reference: &Volume,
        region: &VoxelRegion,
    ) -> Result<f64, ObjectiveError>;
}

/// One evaluation of the objective
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveScore {
    pub cost: f64,
    pub model: NoiseModel,
}

/// Active objective plus the reference and region it scores against
#[derive(Debug)]
pub struct ObjectiveHost {
    active: Box<dyn ObjectiveFunction>,
    reference: Option<Volume>,
    region: Option<VoxelRegion>,
}

impl ObjectiveHost {
    pub fn new(model: NoiseModel) -> Self {
        Self {
            active: model.build(),
            reference: None,
            region: None,
        }
    }

    pub fn active_model(&self) -> NoiseModel {
        self.active.model()
    }

    pub fn available_names() -> Vec<&'static str> {
        NoiseModel::ALL.iter().map(|m| m.name()).collect()
    }

    pub fn set_active(&mut self, model: NoiseModel) {
        self.active = model.build();
    }

    /// Switch models by display name; reference and region are kept
    pub fn set_active_by_name(&mut self, name: &str) -> Result<(), ObjectiveError> {
        self.set_active(NoiseModel::from_name(name)?);
        Ok(())
    }

    pub fn reference(&self) -> Option<&Volume> {
        self.reference.as_ref()
    }

    pub fn has_reference(&self) -> bool {
        self.reference.is_some()
    }

    pub fn set_reference(&mut self, reference: Volume) {
        self.reference = Some(reference);
    }

    pub fn clear_reference(&mut self) -> Option<Volume> {
        self.reference.take()
    }

    pub fn region(&self) -> Option<VoxelRegion> {
        self.region
    }

    /// Restrict scoring to `region`; `None` scores the whole image
    pub fn set_region(&mut self, region: Option<VoxelRegion>) {
        self.region = region;
    }

    /// Score `candidate` against the bound reference.
    ///
    /// Without a reference the cost is `f64::MAX`.
    pub fn score(&self, candidate: &Volume) -> Result<ObjectiveScore, ObjectiveError> {
        let model = self.active_model();
        let Some(reference) = &self.reference else {
            return Ok(ObjectiveScore {
                cost: f64::MAX,
                model,
            });
        };
        let region = self
            .region
            .unwrap_or_else(|| VoxelRegion::full(reference.shape()));
        let cost = self.active.score(candidate, reference, &region)?;
        Ok(ObjectiveScore { cost, model })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn ramp() -> Volume {
        let data = Array3::from_shape_fn((1, 4, 4), |(_, y, x)| (x + y) as f64 + 1.0);
        Volume::from_array(data, [1.0; 3], [0.0; 3])
    }

    #[test]
    fn test_names_round_trip() {
        for model in NoiseModel::ALL {
            assert_eq!(NoiseModel::from_name(model.name()), Ok(model));
        }
        assert_eq!(ObjectiveHost::available_names().len(), 3);
        assert_eq!(
            NoiseModel::from_name("Least squares"),
            Err(ObjectiveError::UnknownObjective("Least squares".into()))
        );
    }

    #[test]
    fn test_no_reference_scores_max() {
        let host = ObjectiveHost::new(NoiseModel::Poisson);
        let score = host.score(&ramp()).unwrap();
        assert_eq!(score.cost, f64::MAX);
        assert_eq!(score.model, NoiseModel::Poisson);
    }

    #[test]
    fn test_switching_model_keeps_reference_and_region() {
        let mut host = ObjectiveHost::new(NoiseModel::Gaussian);
        host.set_reference(ramp());
        let region = VoxelRegion::new([0, 0, 0], [2, 2, 1]);
        host.set_region(Some(region));

        host.set_active_by_name("Normalized cross correlation").unwrap();
        assert_eq!(host.active_model(), NoiseModel::NormalizedCrossCorrelation);
        assert!(host.has_reference());
        assert_eq!(host.region(), Some(region));

        assert!(host.set_active_by_name("bogus").is_err());
        assert_eq!(host.active_model(), NoiseModel::NormalizedCrossCorrelation);

        let score = host.score(&ramp()).unwrap();
        assert!(score.cost.abs() < 1e-12);
    }
}
