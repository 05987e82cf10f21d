//! Linear algebra type aliases and small rotation helpers.
//!
//! Volumes are indexed `(z, y, x)` and every 3-vector in this workspace uses
//! the same component order: `v[0]` is along Z, `v[1]` along Y, `v[2]` along X.

use nalgebra::{Matrix3, Point3, Rotation3, Unit, Vector2, Vector3};

/// Scalar type used for all statistics and geometry (currently `f64`).
pub type Real = f64;

/// 2D vector with [`Real`] components, ordered `(row, col)`.
pub type Vec2 = Vector2<Real>;
/// 3D vector with [`Real`] components, ordered `(z, y, x)`.
pub type Vec3 = Vector3<Real>;
/// 3D point with [`Real`] coordinates, ordered `(z, y, x)`.
pub type Pt3 = Point3<Real>;
/// 3×3 matrix with [`Real`] entries.
pub type Mat3 = Matrix3<Real>;

/// Rotation by `angle` radians about `axis` (Rodrigues formula).
///
/// The axis does not need to be normalised. A zero axis yields the identity.
pub fn rotation_about_axis(axis: &Vec3, angle: Real) -> Mat3 {
    if axis.norm() <= Real::EPSILON {
        return Mat3::identity();
    }
    Rotation3::from_axis_angle(&Unit::new_normalize(*axis), angle).into_inner()
}

/// Returns `true` if `m` is orthonormal within `tol` (|MᵀM - I| and ||det| - 1|).
pub fn is_orthonormal(m: &Mat3, tol: Real) -> bool {
    let gram = m.transpose() * m - Mat3::identity();
    gram.abs().max() <= tol && (m.determinant().abs() - 1.0).abs() <= tol
}

/// Angle of the relative rotation `a · bᵀ`, in radians.
pub fn rotation_angle_between(a: &Mat3, b: &Mat3) -> Real {
    let rel = a * b.transpose();
    let c = ((rel.trace() - 1.0) * 0.5).clamp(-1.0, 1.0);
    c.acos()
}

/// Static-frame `xyz` Euler angles `(rx, ry, rz)` with `R = Rz · Ry · Rx`.
pub fn euler_xyz(m: &Mat3) -> (Real, Real, Real) {
    Rotation3::from_matrix_unchecked(*m).euler_angles()
}
