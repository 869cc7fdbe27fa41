//! Noise generation for synthesized fluorescence images.
//!
//! Turns a noise-free expected-count image into an observation:
//! - Poisson photon (shot) noise on the expected counts
//! - additive Gaussian read noise from the camera
//!
//! Both functions process the volume plane by plane in parallel with
//! deterministic per-plane seeding, so a fixed seed reproduces the same image
//! regardless of the worker count.

use ndarray::Array3;
use rand::{thread_rng, RngCore};
use rand_distr::{Distribution, Normal, Poisson};

use crate::algo::process_volume_in_parallel_chunks;
use crate::image_proc::volume::Volume;

/// Means above this use the normal approximation of the Poisson distribution.
const POISSON_NORMAL_CUTOFF: f64 = 20.0;

/// Apply Poisson arrival statistics to an expected-count image.
///
/// # Arguments
/// * `expected` - Noise-free image of expected photon counts per voxel
/// * `rng_seed` - Optional seed; a random seed is drawn when `None`
///
/// # Returns
/// A new volume on the same grid with sampled counts. Voxels with a
/// non-positive expectation come out as zero.
pub fn apply_poisson_photon_noise(expected: &Volume, rng_seed: Option<u64>) -> Volume {
    let seed = rng_seed.unwrap_or_else(|| thread_rng().next_u64());

    let sampled = process_volume_in_parallel_chunks(
        expected.data().clone(),
        seed,
        Some(1),
        |chunk, rng| {
            chunk.iter_mut().for_each(|voxel| {
                let mean = *voxel;
                *voxel = if mean <= 0.0 || !mean.is_finite() {
                    0.0
                } else if mean < POISSON_NORMAL_CUTOFF {
                    match Poisson::new(mean) {
                        Ok(poisson) => poisson.sample(rng),
                        Err(_) => 0.0,
                    }
                } else {
                    match Normal::new(mean, mean.sqrt()) {
                        Ok(normal) => normal.sample(rng).max(0.0),
                        Err(_) => mean,
                    }
                };
            });
        },
    );

    Volume::from_array(sampled, expected.spacing(), expected.origin())
}

/// Add zero-mean Gaussian read noise with standard deviation `sigma`.
///
/// A non-positive or non-finite `sigma` returns an unchanged copy.
pub fn apply_gaussian_read_noise(image: &Volume, sigma: f64, rng_seed: Option<u64>) -> Volume {
    let Ok(normal) = Normal::new(0.0, sigma) else {
        return image.clone();
    };
    if sigma <= 0.0 {
        return image.clone();
    }

    let seed = rng_seed.unwrap_or_else(|| thread_rng().next_u64());
    let noisy: Array3<f64> =
        process_volume_in_parallel_chunks(image.data().clone(), seed, Some(1), |chunk, rng| {
            chunk
                .iter_mut()
                .for_each(|voxel| *voxel += normal.sample(rng));
        });

    Volume::from_array(noisy, image.spacing(), image.origin())
}
