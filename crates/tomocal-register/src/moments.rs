//! Intensity moments and principal axes of a volume.
//!
//! The centroid comes from first moments, the principal axes from the
//! eigenvectors of the central second-moment (covariance) matrix. Each of the
//! first two axes is only defined up to sign; [`crate::resolve_flip`] resolves
//! that ambiguity by search.

use nalgebra::SymmetricEigen;
use serde::{Deserialize, Serialize};
use tomocal_core::{Mat3, Pose, Real, Vec3, Volume};

use crate::RegistrationError;

/// Zeroth, first and central second moments of a volume.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Moments {
    /// Total intensity.
    pub mass: Real,
    /// Centre of mass in absolute voxel coordinates.
    pub centroid: Vec3,
    /// Central second moments `mu_ij`, unnormalised.
    pub covariance: Mat3,
}

impl Moments {
    /// Accumulate moments over every `subsample`-th voxel along each axis.
    ///
    /// Coordinates stay in full-resolution voxel units; sums are scaled by
    /// `subsample³` so the mass is comparable across strides.
    pub fn compute(volume: &Volume, subsample: usize) -> Result<Self, RegistrationError> {
        if subsample == 0 {
            return Err(RegistrationError::Validation(
                "moment subsampling stride must be >= 1".into(),
            ));
        }
        let [nz, ny, nx] = volume.shape();
        let scale = (subsample * subsample * subsample) as Real;

        let mut mass = 0.0;
        let mut first = Vec3::zeros();
        for z in (0..nz).step_by(subsample) {
            for y in (0..ny).step_by(subsample) {
                for x in (0..nx).step_by(subsample) {
                    let v = volume.at(z, y, x) as Real;
                    mass += v;
                    first += v * Vec3::new(z as Real, y as Real, x as Real);
                }
            }
        }
        if !(mass.is_finite() && mass > 0.0) {
            return Err(RegistrationError::DegenerateInput);
        }
        let centroid = first / mass;

        let mut covariance = Mat3::zeros();
        for z in (0..nz).step_by(subsample) {
            for y in (0..ny).step_by(subsample) {
                for x in (0..nx).step_by(subsample) {
                    let v = volume.at(z, y, x) as Real;
                    if v == 0.0 {
                        continue;
                    }
                    let d = Vec3::new(z as Real, y as Real, x as Real) - centroid;
                    covariance += v * d * d.transpose();
                }
            }
        }

        Ok(Self {
            mass: mass * scale,
            centroid,
            covariance: covariance * scale,
        })
    }

    /// Principal axes as rotation rows, ordered by descending eigenvalue.
    ///
    /// The third row is `row0 × row1`, so the basis is always right-handed.
    pub fn principal_axes(&self) -> Mat3 {
        let eig = SymmetricEigen::new(self.covariance);
        let mut order = [0usize, 1, 2];
        order.sort_by(|&a, &b| eig.eigenvalues[b].total_cmp(&eig.eigenvalues[a]));

        let row0: Vec3 = eig.eigenvectors.column(order[0]).into_owned();
        let row1: Vec3 = eig.eigenvectors.column(order[1]).into_owned();
        let row2 = row0.cross(&row1);
        Mat3::from_rows(&[row0.transpose(), row1.transpose(), row2.transpose()])
    }
}

/// Centroid (relative to the volume centre `shape // 2`) and principal axes.
///
/// Returned as a [`Pose`] whose translation is the centroid offset and whose
/// rotation rows are the principal axes.
pub fn estimate_pose(volume: &Volume, subsample: usize) -> Result<Pose, RegistrationError> {
    let m = Moments::compute(volume, subsample)?;
    Ok(Pose::new(m.principal_axes(), m.centroid - volume.centre()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tomocal_core::{affine, is_orthonormal, rotation_about_axis, synthetic::volumes};

    #[test]
    fn ellipsoid_axes_follow_radii() {
        let offset = Vec3::new(2.0, -3.0, 1.0);
        let v = volumes::ellipsoid([40, 40, 40], &Vec3::new(8.0, 15.0, 5.0), &offset, 1.0);
        let pose = estimate_pose(&v, 1).unwrap();

        assert!((pose.translation - offset).norm() < 1e-9);
        // Largest extent is Y, then Z, then X.
        assert!((pose.rotation[(0, 1)].abs() - 1.0).abs() < 1e-6);
        assert!((pose.rotation[(1, 0)].abs() - 1.0).abs() < 1e-6);
        assert!((pose.rotation[(2, 2)].abs() - 1.0).abs() < 1e-6);
        assert!((pose.rotation.determinant() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn zero_volume_is_degenerate() {
        let v = Volume::zeros([4, 4, 4]);
        assert!(matches!(
            estimate_pose(&v, 1),
            Err(RegistrationError::DegenerateInput)
        ));
        assert!(matches!(
            Moments::compute(&v, 0),
            Err(RegistrationError::Validation(_))
        ));
    }

    #[test]
    fn subsampled_centroid_stays_in_full_resolution_units() {
        let offset = Vec3::new(4.0, 0.0, -6.0);
        let v = volumes::ellipsoid([48, 48, 48], &Vec3::new(10.0, 8.0, 6.0), &offset, 1.0);
        let pose = estimate_pose(&v, 2).unwrap();
        assert!((pose.translation - offset).norm() < 0.6);
    }

    #[test]
    fn axes_rotate_with_the_volume() {
        let v = volumes::phantom([48, 48, 48]);
        let q = rotation_about_axis(&Vec3::new(0.3, 1.0, -0.5), 0.5);
        let rotated = affine(&v, &Pose::new(q, Vec3::zeros()));

        let r = estimate_pose(&v, 1).unwrap().rotation;
        let r_rot = estimate_pose(&rotated, 1).unwrap().rotation;
        assert!(is_orthonormal(&r_rot, 1e-9));

        // r_rot = S · r · q for a diagonal sign matrix S.
        let s = r_rot * q.transpose() * r.transpose();
        for i in 0..3 {
            assert!((s[(i, i)].abs() - 1.0).abs() < 0.02, "S = {s}");
        }
        assert!((s.determinant() - 1.0).abs() < 0.05);
    }
}
