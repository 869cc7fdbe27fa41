//! The three shipped noise models.

use ndarray::{ArrayView3, Zip};

use shared::{Volume, VoxelRegion};

use super::{ObjectiveError, ObjectiveFunction, NoiseModel};

/// Denominators below this are treated as zero
const NORMALIZATION_EPSILON: f64 = 1e-12;

/// Restrict both images to `region` after checking they share a grid
fn region_views<'a>(
    candidate: &'a Volume,
    reference: &'a Volume,
    region: &VoxelRegion,
) -> Result<(ArrayView3<'a, f64>, ArrayView3<'a, f64>), ObjectiveError> {
    if candidate.shape() != reference.shape() {
        return Err(ObjectiveError::ShapeMismatch {
            candidate: candidate.shape(),
            reference: reference.shape(),
        });
    }
    let clamped = region
        .clamp_to(candidate.shape())
        .ok_or(ObjectiveError::EmptyRegion(*region))?;
    Ok((clamped.view(candidate.data()), clamped.view(reference.data())))
}

/// Mean squared difference: the negative log-likelihood under additive
/// Gaussian noise up to constants
#[derive(Debug, Clone, Copy, Default)]
pub struct GaussianLikelihood;

impl ObjectiveFunction for GaussianLikelihood {
    fn model(&self) -> NoiseModel {
        NoiseModel::Gaussian
    }

    fn score(
        &self,
        candidate: &Volume,
        reference: &Volume,
        region: &VoxelRegion,
    ) -> Result<f64, ObjectiveError> {
        let (c, r) = region_views(candidate, reference, region)?;
        let sum = Zip::from(&c)
            .and(&r)
            .fold(0.0, |acc, &c, &r| acc + (c - r) * (c - r));
        Ok(sum / c.len() as f64)
    }
}

/// Poisson negative log-likelihood `c − r·ln(c)` with the candidate as the
/// expected counts, dropping the candidate-independent `ln(r!)`.
///
/// Pixels where the candidate predicts no photons are skipped. The sum is
/// divided by the region size, not by the number of pixels kept, so every
/// candidate is scored on the same scale. A perfect match scores the mean of
/// `r − r·ln(r)` over the lit reference pixels, which is not zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct PoissonLikelihood;

impl ObjectiveFunction for PoissonLikelihood {
    fn model(&self) -> NoiseModel {
        NoiseModel::Poisson
    }

    fn score(
        &self,
        candidate: &Volume,
        reference: &Volume,
        region: &VoxelRegion,
    ) -> Result<f64, ObjectiveError> {
        let (c, r) = region_views(candidate, reference, region)?;
        let sum = Zip::from(&c).and(&r).fold(0.0, |acc, &c, &r| {
            if c <= 0.0 {
                acc
            } else {
                acc + c - r * c.ln()
            }
        });
        Ok(sum / c.len() as f64)
    }
}

/// `1 − ρ` where `ρ` is the Pearson correlation of candidate and reference.
///
/// Identical images score zero even when they are constant.
#[derive(Debug, Clone, Copy, Default)]
pub struct NormalizedCrossCorrelation;

impl ObjectiveFunction for NormalizedCrossCorrelation {
    fn model(&self) -> NoiseModel {
        NoiseModel::NormalizedCrossCorrelation
    }

    fn score(
        &self,
        candidate: &Volume,
        reference: &Volume,
        region: &VoxelRegion,
    ) -> Result<f64, ObjectiveError> {
        let (c, r) = region_views(candidate, reference, region)?;
        let n = c.len() as f64;
        let c_mean = c.sum() / n;
        let r_mean = r.sum() / n;

        let (cross, c_var, r_var) =
            Zip::from(&c)
                .and(&r)
                .fold((0.0, 0.0, 0.0), |(cross, cv, rv), &c, &r| {
                    let dc = c - c_mean;
                    let dr = r - r_mean;
                    (cross + dc * dr, cv + dc * dc, rv + dr * dr)
                });

        let denominator = (c_var * r_var).sqrt();
        if denominator < NORMALIZATION_EPSILON {
            if c == r {
                return Ok(0.0);
            }
            return Err(ObjectiveError::DegenerateNormalization);
        }
        Ok(1.0 - cross / denominator)
    }
}
