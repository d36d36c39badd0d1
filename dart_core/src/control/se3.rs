//! SO(3) utilities for the geometric controller.
//!
//! Hat/vee maps, the standard rotation construction from a desired
//! body-z axis and heading, and the attitude error on SO(3).

use nalgebra::{Matrix3, Rotation3, Vector3};

/// Numeric floor below which a direction vector is considered degenerate.
pub const DIRECTION_EPS: f64 = 1e-6;

/// Skew-symmetric (hat) map: `hat(a) · b = a × b`.
#[inline]
pub fn hat(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(
        0.0, -v.z, v.y, //
        v.z, 0.0, -v.x, //
        -v.y, v.x, 0.0,
    )
}

/// Inverse of [`hat`]: extract the vector of a skew-symmetric matrix.
#[inline]
pub fn vee(m: &Matrix3<f64>) -> Vector3<f64> {
    Vector3::new(m[(2, 1)], m[(0, 2)], m[(1, 0)])
}

/// Build the desired rotation from a unit body-z axis and a heading.
///
/// `b1` is the projection of the heading direction onto the plane
/// orthogonal to `b3`. Returns `None` when the heading is collinear
/// with `b3` (degenerate construction).
pub fn rotation_from_axis_yaw(b3: &Vector3<f64>, yaw: f64) -> Option<Rotation3<f64>> {
    let heading = Vector3::new(yaw.cos(), yaw.sin(), 0.0);
    let b2_raw = b3.cross(&heading);
    let n = b2_raw.norm();
    if n < DIRECTION_EPS {
        return None;
    }
    let b2 = b2_raw / n;
    let b1 = b2.cross(b3);
    Some(Rotation3::from_matrix_unchecked(Matrix3::from_columns(&[
        b1, b2, *b3,
    ])))
}

/// Attitude error on SO(3): `eR = ½ · vee(R_desᵀ R − Rᵀ R_des)`.
#[inline]
pub fn attitude_error(r: &Rotation3<f64>, r_des: &Rotation3<f64>) -> Vector3<f64> {
    let m = r_des.matrix().transpose() * r.matrix() - r.matrix().transpose() * r_des.matrix();
    0.5 * vee(&m)
}
