//! CPU splatting synthesizer.
//!
//! Every emitter deposits `gain · scale · K(x − p)` into the pixels within the
//! kernel's support, where `K` is the normalized kernel interpolated
//! trilinearly at the pixel's offset from the emitter. Focal planes are
//! rendered in parallel; point gradients are computed in parallel over
//! points.

use nalgebra::Vector3;
use ndarray::{Array3, Axis};
use rayon::prelude::*;

use shared::Volume;

use super::{ImageSynthesizer, LabelBatch, PointGradient, SynthesisError};
use crate::config::ImagingConfig;
use crate::psf::KernelProvider;

#[derive(Debug, Clone, Copy, Default)]
pub struct CpuSynthesizer;

impl CpuSynthesizer {
    pub fn new() -> Self {
        Self
    }
}

/// Pixel index range `[lo, hi)` along one axis covering `centre ± reach`
fn pixel_span(centre: f64, reach: f64, origin: f64, step: f64, n: usize) -> (usize, usize) {
    let lo = ((centre - reach - origin) / step).floor().max(0.0);
    let hi = ((centre + reach - origin) / step).ceil() + 1.0;
    let hi = hi.clamp(0.0, n as f64);
    (lo.min(hi) as usize, hi as usize)
}

/// Distance beyond which the kernel contributes nothing
fn kernel_reach(kernel: &KernelProvider) -> Vector3<f64> {
    let spacing = kernel.kernel().volume().spacing();
    kernel.kernel().half_extent() + Vector3::from(spacing)
}

fn check_ready(kernel: &KernelProvider, config: &ImagingConfig) -> Result<(), SynthesisError> {
    if kernel.is_stale() {
        return Err(SynthesisError::StaleKernel);
    }
    if config.shape().voxel_count() == 0 {
        return Err(SynthesisError::EmptyImage(config.shape()));
    }
    Ok(())
}

impl ImageSynthesizer for CpuSynthesizer {
    fn name(&self) -> &str {
        "CPU"
    }

    fn render(
        &self,
        batches: &[LabelBatch],
        kernel: &KernelProvider,
        config: &ImagingConfig,
    ) -> Result<Volume, SynthesisError> {
        check_ready(kernel, config)?;

        let emitters: Vec<(Vector3<f64>, f64)> = batches
            .iter()
            .filter(|batch| config.includes_channel(batch.channel))
            .flat_map(|batch| {
                batch
                    .points
                    .iter()
                    .filter(|p| p.iter().all(|c| c.is_finite()))
                    .map(move |p| (*p, batch.intensity_scale))
            })
            .collect();

        let mut image = config.blank();
        let origin = image.origin();
        let spacing = image.spacing();
        let shape = image.shape();
        let reach = kernel_reach(kernel);
        let psf = kernel.kernel();

        image
            .data_mut()
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .enumerate()
            .for_each(|(k, mut plane)| {
                let z = origin[2] + k as f64 * spacing[2];
                for (p, scale) in &emitters {
                    let dz = z - p.z;
                    if dz.abs() > reach.z {
                        continue;
                    }
                    let (i0, i1) = pixel_span(p.x, reach.x, origin[0], spacing[0], shape.nx);
                    let (j0, j1) = pixel_span(p.y, reach.y, origin[1], spacing[1], shape.ny);
                    for j in j0..j1 {
                        let dy = origin[1] + j as f64 * spacing[1] - p.y;
                        for i in i0..i1 {
                            let dx = origin[0] + i as f64 * spacing[0] - p.x;
                            plane[[j, i]] += scale * psf.value_at(&Vector3::new(dx, dy, dz));
                        }
                    }
                }
            });

        let (gain, offset) = (config.gain, config.offset);
        image.data_mut().mapv_inplace(|v| offset + gain * v);

        log::debug!(
            "Rendered {} emitters into {} image",
            emitters.len(),
            image.shape()
        );
        Ok(image)
    }

    fn render_point_gradient(
        &self,
        batches: &[LabelBatch],
        kernel: &KernelProvider,
        config: &ImagingConfig,
        object_index: usize,
        reference: &Volume,
    ) -> Result<PointGradient, SynthesisError> {
        let candidate = self.render(batches, kernel, config)?;
        if !candidate.same_grid(reference) {
            return Err(SynthesisError::ReferenceMismatch {
                image: candidate.shape(),
                reference: reference.shape(),
            });
        }

        let bound: Vec<&LabelBatch> = batches
            .iter()
            .filter(|b| {
                b.object_index == object_index && b.point_bound && config.includes_channel(b.channel)
            })
            .collect();
        if bound.is_empty() {
            return Err(SynthesisError::NoPointLabels(object_index));
        }

        let residual: Array3<f64> = candidate.data() - reference.data();
        let origin = candidate.origin();
        let spacing = candidate.spacing();
        let shape = candidate.shape();
        let reach = kernel_reach(kernel);
        let pixels = residual.len() as f64;

        let len = bound.iter().map(|b| b.points.len()).max().unwrap_or(0);
        let mut gradients = vec![Vector3::zeros(); len];

        for batch in bound {
            let weight = 2.0 * config.gain * batch.intensity_scale / pixels;
            let per_point: Vec<Vector3<f64>> = batch
                .points
                .par_iter()
                .map(|p| {
                    let mut sum = Vector3::zeros();
                    if !p.iter().all(|c| c.is_finite()) {
                        return sum;
                    }
                    let (i0, i1) = pixel_span(p.x, reach.x, origin[0], spacing[0], shape.nx);
                    let (j0, j1) = pixel_span(p.y, reach.y, origin[1], spacing[1], shape.ny);
                    let (k0, k1) = pixel_span(p.z, reach.z, origin[2], spacing[2], shape.nz);
                    for k in k0..k1 {
                        let dz = origin[2] + k as f64 * spacing[2] - p.z;
                        for j in j0..j1 {
                            let dy = origin[1] + j as f64 * spacing[1] - p.y;
                            for i in i0..i1 {
                                let r = residual[[k, j, i]];
                                if r == 0.0 {
                                    continue;
                                }
                                let dx = origin[0] + i as f64 * spacing[0] - p.x;
                                sum += kernel.gradient_at(&Vector3::new(dx, dy, dz)) * r;
                            }
                        }
                    }
                    sum * weight
                })
                .collect();

            for (total, g) in gradients.iter_mut().zip(per_point) {
                *total += g;
            }
        }

        Ok(PointGradient {
            object_index,
            gradients,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::psf::{GaussianPsf, SUMMED_INTENSITY};
    use approx::assert_relative_eq;

    fn provider() -> KernelProvider {
        KernelProvider::new(
            Box::new(GaussianPsf::new(80.0, 200.0)),
            [25, 25, 9],
            [20.0, 20.0, 100.0],
        )
    }

    fn config() -> ImagingConfig {
        ImagingConfig {
            width: 32,
            height: 32,
            pixel_size: 20.0,
            ..ImagingConfig::default()
        }
    }

    fn batch(points: Vec<Vector3<f64>>) -> LabelBatch {
        LabelBatch {
            object_index: 0,
            channel: 0,
            intensity_scale: 1.0,
            points,
            point_bound: true,
        }
    }

    #[test]
    fn test_single_emitter_conserves_intensity() {
        let kernel = provider();
        let config = config();
        // On a pixel centre, in the focal plane, with pixels matching the
        // kernel's lateral spacing.
        let image = CpuSynthesizer
            .render(&[batch(vec![Vector3::new(10.0, -30.0, 0.0)])], &kernel, &config)
            .unwrap();
        let in_focus_sum: f64 = kernel
            .kernel()
            .volume()
            .data()
            .index_axis(Axis(0), 4)
            .sum();
        assert_relative_eq!(image.sum(), in_focus_sum, epsilon = 1e-12);

        let peak = image.data().iter().cloned().fold(f64::MIN, f64::max);
        assert_relative_eq!(image.data()[[0, 14, 16]], peak);
    }

    #[test]
    fn test_gain_offset_and_channel_selection() {
        let kernel = provider();
        let mut config = config();
        config.gain = 3.0;
        config.offset = 100.0;
        let mut labels = batch(vec![Vector3::new(10.0, 10.0, 0.0)]);
        labels.channel = 1;

        let image = CpuSynthesizer.render(&[labels.clone()], &kernel, &config).unwrap();
        let unit = ImagingConfig {
            gain: 1.0,
            offset: 0.0,
            ..config.clone()
        };
        let plain = CpuSynthesizer.render(&[labels.clone()], &kernel, &unit).unwrap();
        assert_relative_eq!(image.sum(), 100.0 * 1024.0 + 3.0 * plain.sum(), epsilon = 1e-9);

        config.channel = Some(0);
        let filtered = CpuSynthesizer.render(&[labels], &kernel, &config).unwrap();
        assert!(filtered.data().iter().all(|&v| v == 100.0));
    }

    #[test]
    fn test_stale_kernel_is_rejected() {
        let mut kernel = provider();
        kernel.parameters_mut().set_by_id(SUMMED_INTENSITY, 2.0).unwrap();
        assert_eq!(
            CpuSynthesizer.render(&[], &kernel, &config()),
            Err(SynthesisError::StaleKernel)
        );
    }

    #[test]
    fn test_focal_stack_peaks_in_emitter_plane() {
        let kernel = provider();
        let config = ImagingConfig {
            focal_planes: 5,
            plane_spacing: 100.0,
            ..config()
        };
        let image = CpuSynthesizer
            .render(&[batch(vec![Vector3::new(10.0, 10.0, 100.0)])], &kernel, &config)
            .unwrap();
        let plane_sums: Vec<f64> = image
            .data()
            .axis_iter(Axis(0))
            .map(|plane| plane.sum())
            .collect();
        let brightest = plane_sums
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(k, _)| k);
        // Planes sit at z = -200, -100, 0, 100, 200.
        assert_eq!(brightest, Some(3));
    }

    #[test]
    fn test_gradient_points_toward_reference() {
        let kernel = provider();
        let config = config();
        let reference = CpuSynthesizer
            .render(&[batch(vec![Vector3::new(50.0, 10.0, 0.0)])], &kernel, &config)
            .unwrap();
        let labels = [batch(vec![Vector3::new(10.0, 10.0, 0.0)])];

        let gradient = CpuSynthesizer
            .render_point_gradient(&labels, &kernel, &config, 0, &reference)
            .unwrap();
        assert_eq!(gradient.len(), 1);
        let g = gradient.gradients[0];
        assert!(g.x > 0.0, "gradient {g:?} should push +x");
        assert!(g.x.abs() > 10.0 * g.y.abs());
    }

    #[test]
    fn test_gradient_vanishes_at_match() {
        let kernel = provider();
        let config = config();
        let labels = [batch(vec![Vector3::new(10.0, 10.0, 0.0)])];
        let reference = CpuSynthesizer.render(&labels, &kernel, &config).unwrap();
        let gradient = CpuSynthesizer
            .render_point_gradient(&labels, &kernel, &config, 0, &reference)
            .unwrap();
        assert_eq!(gradient.max_norm(), 0.0);
    }

    #[test]
    fn test_gradient_requires_point_bound_labels() {
        let kernel = provider();
        let config = config();
        let mut labels = batch(vec![Vector3::zeros()]);
        labels.point_bound = false;
        let reference = config.blank();
        assert_eq!(
            CpuSynthesizer.render_point_gradient(&[labels], &kernel, &config, 0, &reference),
            Err(SynthesisError::NoPointLabels(0))
        );
    }
}
