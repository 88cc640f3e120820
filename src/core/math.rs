//! Mathematical primitives for 3-D state estimation.
//!
//! SO(3) helpers (skew-symmetric matrices, right Jacobians) used by the
//! preintegration and factor-graph layers, plus fixed-size matrix aliases
//! and timestamp arithmetic.

use nalgebra::{Matrix3, SMatrix, SVector, Vector3};

/// 6x6 matrix (pose blocks, bias blocks).
pub type Matrix6 = SMatrix<f64, 6, 6>;
/// 9x9 matrix (preintegration covariance over [delta-theta, delta-v, delta-p]).
pub type Matrix9 = SMatrix<f64, 9, 9>;
/// 15x15 matrix (one full state block: pose 6, velocity 3, bias 6).
pub type Matrix15 = SMatrix<f64, 15, 15>;
/// 6-vector (pose/bias residuals).
pub type Vector6 = SVector<f64, 6>;
/// 9-vector (IMU factor residual).
pub type Vector9 = SVector<f64, 9>;
/// 15-vector (one state-block update).
pub type Vector15 = SVector<f64, 15>;

/// Angle below which series approximations of the Jacobians are used.
const SMALL_ANGLE: f64 = 1e-6;

/// Skew-symmetric matrix [v]x such that [v]x * u == v.cross(u).
#[inline]
pub fn skew(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(
        0.0, -v.z, v.y, //
        v.z, 0.0, -v.x, //
        -v.y, v.x, 0.0,
    )
}

/// Right Jacobian Jr(phi) of SO(3).
///
/// Relates additive perturbations of a rotation vector to multiplicative
/// perturbations of the exponential map:
///
/// ```text
/// Jr(phi) = I - (1 - cos|phi|)/|phi|^2 [phi]x + (|phi| - sin|phi|)/|phi|^3 [phi]x^2
/// ```
pub fn right_jacobian_so3(phi: &Vector3<f64>) -> Matrix3<f64> {
    let theta = phi.norm();
    if theta < SMALL_ANGLE {
        return Matrix3::identity() - 0.5 * skew(phi);
    }

    let theta_sq = theta * theta;
    let s = skew(phi);
    let s_sq = s * s;

    Matrix3::identity() - ((1.0 - theta.cos()) / theta_sq) * s
        + ((theta - theta.sin()) / (theta_sq * theta)) * s_sq
}

/// Inverse right Jacobian Jr^-1(phi) of SO(3).
pub fn right_jacobian_so3_inv(phi: &Vector3<f64>) -> Matrix3<f64> {
    let theta = phi.norm();
    let s = skew(phi);
    if theta < SMALL_ANGLE {
        return Matrix3::identity() + 0.5 * s + (1.0 / 12.0) * s * s;
    }

    let theta_sq = theta * theta;
    let coeff = 1.0 / theta_sq - (1.0 + theta.cos()) / (2.0 * theta * theta.sin());

    Matrix3::identity() + 0.5 * s + coeff * s * s
}

/// Signed time delta in seconds between two microsecond timestamps.
///
/// Negative when `to_us` precedes `from_us`; callers decide how to handle
/// non-monotone input.
#[inline]
pub fn dt_seconds(from_us: u64, to_us: u64) -> f64 {
    (to_us as i64 - from_us as i64) as f64 * 1e-6
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_skew_matches_cross_product() {
        let v = Vector3::new(1.0, 2.0, 3.0);
        let u = Vector3::new(-0.5, 4.0, 0.25);
        assert_relative_eq!(skew(&v) * u, v.cross(&u), epsilon = 1e-12);
    }

    #[test]
    fn test_skew_antisymmetric() {
        let v = Vector3::new(0.3, -0.7, 1.1);
        let s = skew(&v);
        assert_relative_eq!(s, -s.transpose(), epsilon = 1e-12);
    }

    #[test]
    fn test_right_jacobian_identity_at_zero() {
        assert_relative_eq!(
            right_jacobian_so3(&Vector3::zeros()),
            Matrix3::identity(),
            epsilon = 1e-12
        );
        assert_relative_eq!(
            right_jacobian_so3_inv(&Vector3::zeros()),
            Matrix3::identity(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_right_jacobian_inverse_relationship() {
        let phi = Vector3::new(0.1, -0.2, 0.3);
        let product = right_jacobian_so3(&phi) * right_jacobian_so3_inv(&phi);
        assert_relative_eq!(product, Matrix3::identity(), epsilon = 1e-10);
    }

    #[test]
    fn test_right_jacobian_small_angle_continuity() {
        // Values just below and above the series threshold should agree.
        let phi = Vector3::new(9e-7, 0.0, 0.0);
        let phi_big = Vector3::new(1.1e-6, 0.0, 0.0);
        let a = right_jacobian_so3(&phi);
        let b = right_jacobian_so3(&phi_big);
        assert_relative_eq!(a, b, epsilon = 1e-9);
    }

    #[test]
    fn test_dt_seconds() {
        assert_relative_eq!(dt_seconds(1_000_000, 1_002_000), 0.002, epsilon = 1e-12);
        assert!(dt_seconds(2_000_000, 1_000_000) < 0.0);
    }
}
