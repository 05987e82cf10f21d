//! Rigid pose relative to a volume centre.

use serde::{Deserialize, Serialize};

use crate::{euler_xyz, is_orthonormal, Mat3, Real, Vec3};

/// Rotation plus translation aligning a moving volume to a fixed one.
///
/// Both parts are expressed about the volume centre `shape // 2` in `(z, y, x)`
/// index coordinates. Resampling the moving volume `M` under a pose gives
///
/// ```text
/// out(o) = M(R · (o - c - T) + c)
/// ```
///
/// so the identity pose with translation `T` moves content by `+T`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub rotation: Mat3,
    pub translation: Vec3,
}

impl Default for Pose {
    fn default() -> Self {
        Self::identity()
    }
}

impl Pose {
    pub fn new(rotation: Mat3, translation: Vec3) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    pub fn identity() -> Self {
        Self {
            rotation: Mat3::identity(),
            translation: Vec3::zeros(),
        }
    }

    /// Same rotation, translation multiplied by `factor`.
    ///
    /// Used to map a pose found on a sub-sampled grid back to full resolution;
    /// rotation is scale invariant.
    pub fn scale_translation(&self, factor: Real) -> Self {
        Self {
            rotation: self.rotation,
            translation: self.translation * factor,
        }
    }

    /// `true` if the rotation is orthonormal within `tol`.
    pub fn is_valid(&self, tol: Real) -> bool {
        is_orthonormal(&self.rotation, tol)
    }

    /// Static-frame `xyz` Euler angles of the rotation, in radians.
    pub fn euler_angles(&self) -> (Real, Real, Real) {
        euler_xyz(&self.rotation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_is_valid() {
        let p = Pose::identity();
        assert!(p.is_valid(1e-12));
        assert_eq!(p.euler_angles(), (0.0, 0.0, 0.0));
    }

    #[test]
    fn scaling_keeps_rotation() {
        let p = Pose::new(-Mat3::identity(), Vec3::new(1.0, 2.0, 3.0)).scale_translation(2.0);
        assert_eq!(p.translation, Vec3::new(2.0, 4.0, 6.0));
        assert_eq!(p.rotation, -Mat3::identity());
        // Reflections are orthonormal too; only |det| is checked.
        assert!(p.is_valid(1e-12));
    }
}
