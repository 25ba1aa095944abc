//! 2x2 matrix utilities using nalgebra
//!
//! Closed-form eigen decomposition for symmetric 2x2 matrices (covariance
//! ellipses) and the rotation helpers used to move between image axes and an
//! ellipse's principal axes.

use nalgebra::Matrix2;
use serde::{Deserialize, Serialize};
use std::f64::consts::{FRAC_PI_2, PI};

/// Eigen decomposition of a symmetric 2x2 matrix `[[a, b], [b, c]]`.
///
/// Computed with the quadratic formula, no iterative solver involved. The
/// eigenvalues are ordered so that `major >= minor`; `angle` is the direction
/// of the eigenvector belonging to `major`, measured from the +x axis towards
/// +y and normalized into [-π/2, π/2).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SymmetricEigen2 {
    /// Larger eigenvalue
    pub major: f64,
    /// Smaller eigenvalue (negative when the matrix is not positive semi-definite)
    pub minor: f64,
    /// Orientation of the major eigenvector in radians
    pub angle: f64,
}

impl SymmetricEigen2 {
    /// Decompose the symmetric matrix `[[a, b], [b, c]]`.
    ///
    /// # Arguments
    /// * `a` - Upper-left element (variance along x)
    /// * `b` - Off-diagonal element (covariance)
    /// * `c` - Lower-right element (variance along y)
    pub fn from_components(a: f64, b: f64, c: f64) -> Self {
        let mean = 0.5 * (a + c);
        let half_diff = 0.5 * (a - c);
        let radius = half_diff.hypot(b);

        Self {
            major: mean + radius,
            minor: mean - radius,
            angle: normalize_axis_angle(0.5 * (2.0 * b).atan2(a - c)),
        }
    }
}

/// Map an axis orientation into [-π/2, π/2).
///
/// An axis has no direction, so angles differing by π describe the same
/// axis. Non-finite input is returned unchanged.
pub fn normalize_axis_angle(angle: f64) -> f64 {
    if !angle.is_finite() {
        return angle;
    }
    let wrapped = angle - PI * ((angle + FRAC_PI_2) / PI).floor();
    // floor() rounding can land exactly on +π/2
    if wrapped >= FRAC_PI_2 {
        wrapped - PI
    } else {
        wrapped
    }
}

/// Variance of the distribution `[[a, b], [b, c]]` projected on the unit
/// vector at `angle`.
pub fn projected_variance(a: f64, b: f64, c: f64, angle: f64) -> f64 {
    let (s, co) = angle.sin_cos();
    a * co * co + 2.0 * b * s * co + c * s * s
}

/// Create a 2x2 rotation matrix
///
/// # Arguments
/// * `angle_rad` - Rotation angle in radians (counter-clockwise)
///
/// # Returns
/// Rotation matrix
pub fn rotation_matrix(angle_rad: f64) -> Matrix2<f64> {
    let c = angle_rad.cos();
    let s = angle_rad.sin();
    Matrix2::new(c, -s, s, c)
}
