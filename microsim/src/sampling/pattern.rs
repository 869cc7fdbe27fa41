//! Replication patterns that expand one sample into several label points.

use nalgebra::{Rotation3, Vector3};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use shared::Quaternion;

/// How each sample point is turned into emitters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SamplePattern {
    /// One emitter at the sample point
    SinglePoint,
    /// `points` emitters evenly spaced on a circle of `radius` (nm) around
    /// the sample point
    PointRing { points: usize, radius: f64 },
}

impl Default for SamplePattern {
    fn default() -> Self {
        SamplePattern::SinglePoint
    }
}

impl SamplePattern {
    /// Emitters produced per sample point
    pub fn emitters_per_sample(&self) -> usize {
        match self {
            SamplePattern::SinglePoint => 1,
            SamplePattern::PointRing { points, .. } => *points,
        }
    }
}

/// Ring template in the XY plane centred on the origin
pub fn ring_template(points: usize, radius: f64) -> Vec<Vector3<f64>> {
    (0..points)
        .map(|i| {
            let angle = 2.0 * PI * i as f64 / points as f64;
            Vector3::new(radius * angle.cos(), radius * angle.sin(), 0.0)
        })
        .collect()
}

/// Rotate `template` by `orientation` (via its axis-angle form) and translate
/// it to `center`.
pub fn place_template(
    template: &[Vector3<f64>],
    center: &Vector3<f64>,
    orientation: Option<&Quaternion>,
) -> Vec<Vector3<f64>> {
    let rotation = orientation.map(|q| {
        let (axis, angle) = q.to_axis_angle();
        Rotation3::from_axis_angle(&axis, angle)
    });

    template
        .iter()
        .map(|offset| match &rotation {
            Some(r) => center + r * offset,
            None => center + offset,
        })
        .collect()
}
