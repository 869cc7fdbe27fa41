//! First-order derivative-of-Gaussian filtering along a single axis.

use ndarray::{Array3, Axis, Zip};

/// Smallest filter scale in voxels; below it the taps reduce to a central
/// difference.
const MIN_SIGMA_VOXELS: f64 = 0.5;

/// Antisymmetric derivative-of-Gaussian taps for offsets `-radius..=radius`.
///
/// Tap `k` is `k·g(k) / Σ j²·g(j)`, which makes the filter exact on linear
/// ramps: a slope of one voxel per voxel yields exactly 1.
pub fn derivative_taps(sigma_voxels: f64) -> Vec<f64> {
    let sigma = sigma_voxels.max(MIN_SIGMA_VOXELS);
    let radius = (3.0 * sigma).ceil().max(1.0) as isize;

    let gauss = |k: isize| (-((k * k) as f64) / (2.0 * sigma * sigma)).exp();
    let norm: f64 = (-radius..=radius)
        .map(|j| (j * j) as f64 * gauss(j))
        .sum();

    (-radius..=radius)
        .map(|k| k as f64 * gauss(k) / norm)
        .collect()
}

/// Derivative of a `[z, y, x]` volume along one physical axis.
///
/// # Arguments
/// * `input` - Volume in ndarray `[z, y, x]` order
/// * `axis` - Physical axis: 0 = X, 1 = Y, 2 = Z
/// * `sigma` - Filter scale in nm
/// * `spacing` - Voxel spacing along `axis` in nm
///
/// # Returns
/// Derivative in intensity per nm. Borders are edge-extended, so an axis with
/// a single voxel yields zeros.
pub fn derivative_along_axis(input: &Array3<f64>, axis: usize, sigma: f64, spacing: f64) -> Array3<f64> {
    let array_axis = Axis(2 - axis.min(2));
    let taps = derivative_taps(sigma / spacing);
    let radius = (taps.len() / 2) as isize;
    let scale = 1.0 / spacing;

    let mut output = Array3::zeros(input.raw_dim());
    Zip::from(output.lanes_mut(array_axis))
        .and(input.lanes(array_axis))
        .par_for_each(|mut out, lane| {
            let n = lane.len() as isize;
            for i in 0..n {
                let mut acc = 0.0;
                for (t, &tap) in taps.iter().enumerate() {
                    let j = (i + t as isize - radius).clamp(0, n - 1);
                    acc += tap * lane[j as usize];
                }
                out[i as usize] = acc * scale;
            }
        });
    output
}
