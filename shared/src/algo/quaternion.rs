//! Quaternion implementation for 3D rotations
//!
//! This module provides a quaternion implementation for representing and
//! applying 3D rotations, in particular the uniformly random orientations
//! used to rotate label replication patterns about their sample points.

use std::f64::consts::PI;

use nalgebra::{Unit, UnitQuaternion, Vector3};
use rand::Rng;

/// A quaternion representing a rotation in 3D space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quaternion {
    /// Real/scalar component (w)
    pub w: f64,
    /// First complex component (i)
    pub x: f64,
    /// Second complex component (j)
    pub y: f64,
    /// Third complex component (k)
    pub z: f64,
}

impl Quaternion {
    /// Create an identity quaternion (no rotation)
    pub fn identity() -> Self {
        Self {
            w: 1.0,
            x: 0.0,
            y: 0.0,
            z: 0.0,
        }
    }

    /// Create a quaternion from axis-angle representation
    pub fn from_axis_angle(axis: &Vector3<f64>, angle: f64) -> Self {
        let half_angle = angle / 2.0;
        let sin_half_angle = half_angle.sin();

        Self {
            w: half_angle.cos(),
            x: axis[0] * sin_half_angle,
            y: axis[1] * sin_half_angle,
            z: axis[2] * sin_half_angle,
        }
    }

    /// Draw a unit quaternion uniformly distributed over SO(3).
    ///
    /// Uses Shoemake's subgroup construction from three uniform deviates
    /// `u1, u2, u3` on [0, 1):
    ///
    /// ```text
    /// q = (√(1−u1)·sin(2πu2), √(1−u1)·cos(2πu2), √u1·sin(2πu3), √u1·cos(2πu3))
    /// ```
    ///
    /// The first component is taken as the scalar part.
    pub fn random_uniform<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let u1: f64 = rng.gen();
        let u2: f64 = rng.gen();
        let u3: f64 = rng.gen();

        let a = (1.0 - u1).sqrt();
        let b = u1.sqrt();

        Self {
            w: a * (2.0 * PI * u2).sin(),
            x: a * (2.0 * PI * u2).cos(),
            y: b * (2.0 * PI * u3).sin(),
            z: b * (2.0 * PI * u3).cos(),
        }
    }

    /// Calculate the norm (magnitude) of the quaternion
    pub fn norm(&self) -> f64 {
        (self.w * self.w + self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Normalize the quaternion to unit length
    pub fn normalize(&self) -> Self {
        let norm = self.norm();
        if norm.abs() < 1e-10 {
            Self::identity()
        } else {
            Self {
                w: self.w / norm,
                x: self.x / norm,
                y: self.y / norm,
                z: self.z / norm,
            }
        }
    }

    /// Convert a unit quaternion to axis-angle form.
    ///
    /// `θ = 2·acos(w)` and `axis = (x, y, z) / sin(θ/2)`. When `sin(θ/2)` is
    /// too small to divide by the rotation is the identity and the X axis is
    /// returned with a zero angle.
    pub fn to_axis_angle(&self) -> (Unit<Vector3<f64>>, f64) {
        let q = self.normalize();
        let angle = 2.0 * q.w.clamp(-1.0, 1.0).acos();
        let sin_half = (angle / 2.0).sin();

        if sin_half.abs() < 1e-12 {
            return (Vector3::x_axis(), 0.0);
        }

        let axis = Vector3::new(q.x / sin_half, q.y / sin_half, q.z / sin_half);
        (Unit::new_normalize(axis), angle)
    }

    /// Equivalent nalgebra rotation
    pub fn to_unit_quaternion(&self) -> UnitQuaternion<f64> {
        UnitQuaternion::from_quaternion(nalgebra::Quaternion::new(self.w, self.x, self.y, self.z))
    }

    /// Rotate a 3D vector by this quaternion's rotation
    pub fn rotate_vector(&self, v: &Vector3<f64>) -> Vector3<f64> {
        self.to_unit_quaternion() * v
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Rotation3;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_quaternion_normalization() {
        let q = Quaternion {
            w: 1.0,
            x: 2.0,
            y: 3.0,
            z: 4.0,
        };
        assert_relative_eq!(q.normalize().norm(), 1.0, epsilon = 1e-10);
    }

    #[test]
    fn test_axis_angle_round_trip() {
        let axis = Vector3::new(1.0, 2.0, -0.5).normalize();
        let angle = 1.1;

        let q = Quaternion::from_axis_angle(&axis, angle);
        let (recovered_axis, recovered_angle) = q.to_axis_angle();

        assert_relative_eq!(recovered_angle, angle, epsilon = 1e-10);
        for i in 0..3 {
            assert_relative_eq!(recovered_axis[i], axis[i], epsilon = 1e-10);
        }
    }

    #[test]
    fn test_identity_axis_angle_is_zero_rotation() {
        let (_, angle) = Quaternion::identity().to_axis_angle();
        assert_eq!(angle, 0.0);
    }

    #[test]
    fn test_random_quaternions_are_unit() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..1000 {
            let q = Quaternion::random_uniform(&mut rng);
            assert_relative_eq!(q.norm(), 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_axis_angle_rotation_matches_quaternion_rotation() {
        let mut rng = StdRng::seed_from_u64(3);
        let v = Vector3::new(0.3, -1.2, 2.0);

        for _ in 0..100 {
            let q = Quaternion::random_uniform(&mut rng);
            let (axis, angle) = q.to_axis_angle();
            let via_axis_angle = Rotation3::from_axis_angle(&axis, angle) * v;
            let via_quaternion = q.rotate_vector(&v);

            for i in 0..3 {
                assert_relative_eq!(via_axis_angle[i], via_quaternion[i], epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn test_random_rotations_spread_over_sphere() {
        // Rotated +Z axes of uniform rotations should average to the origin.
        let mut rng = StdRng::seed_from_u64(5);
        let n = 20_000;
        let mut mean = Vector3::zeros();
        for _ in 0..n {
            mean += Quaternion::random_uniform(&mut rng).rotate_vector(&Vector3::z());
        }
        mean /= n as f64;

        assert!(mean.norm() < 0.03, "mean direction {mean:?} is biased");
    }
}
