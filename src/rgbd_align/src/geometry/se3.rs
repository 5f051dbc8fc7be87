//! Exponential and logarithm maps of SE(3).
//!
//! Twists are ordered `[υx, υy, υz, ωx, ωy, ωz]`: translational part first,
//! rotational part second. The exponential map is
//!
//! ```text
//! exp([υ, ω]) = ( exp([ω]×),  V(ω) υ )
//! V(ω) = I + (1 - cos θ)/θ² [ω]× + (θ - sin θ)/θ³ [ω]×²,   θ = |ω|
//! ```

use nalgebra::{Isometry3, Matrix3, Translation3, UnitQuaternion, Vector3, Vector6};

/// Tangent-space vector of SE(3).
pub type Twist = Vector6<f64>;

/// Below this rotation angle the series expansions are used.
const SMALL_ANGLE_THRESHOLD: f64 = 1e-10;

/// Skew-symmetric matrix `[v]×` such that `[v]× u = v × u`.
#[inline]
pub fn skew(v: &Vector3<f64>) -> Matrix3<f64> {
    #[rustfmt::skip]
    let m = Matrix3::new(
        0.0, -v.z, v.y,
        v.z, 0.0, -v.x,
        -v.y, v.x, 0.0,
    );
    m
}

/// Left Jacobian `V(ω)` of SO(3), which maps `υ` to the translation of `exp([υ, ω])`.
fn left_jacobian(omega: &Vector3<f64>) -> Matrix3<f64> {
    let theta = omega.norm();
    let w = skew(omega);
    let w2 = w * w;

    if theta < SMALL_ANGLE_THRESHOLD {
        return Matrix3::identity() + 0.5 * w + (1.0 / 6.0) * w2;
    }

    let theta_sq = theta * theta;
    Matrix3::identity()
        + ((1.0 - theta.cos()) / theta_sq) * w
        + ((theta - theta.sin()) / (theta_sq * theta)) * w2
}

/// Inverse of [`left_jacobian`].
fn left_jacobian_inv(omega: &Vector3<f64>) -> Matrix3<f64> {
    let theta = omega.norm();
    let w = skew(omega);
    let w2 = w * w;

    if theta < SMALL_ANGLE_THRESHOLD {
        return Matrix3::identity() - 0.5 * w + (1.0 / 12.0) * w2;
    }

    let half_theta = 0.5 * theta;
    let coeff = (1.0 - half_theta * half_theta.cos() / half_theta.sin()) / (theta * theta);
    Matrix3::identity() - 0.5 * w + coeff * w2
}

/// Exponential map from a twist to a rigid transform.
pub fn exp(twist: &Twist) -> Isometry3<f64> {
    let upsilon = Vector3::new(twist[0], twist[1], twist[2]);
    let omega = Vector3::new(twist[3], twist[4], twist[5]);

    let rotation = UnitQuaternion::from_scaled_axis(omega);
    let translation = left_jacobian(&omega) * upsilon;

    Isometry3::from_parts(Translation3::from(translation), rotation)
}

/// Rotation vector of a unit quaternion, accurate near identity.
fn rotation_log(rotation: &UnitQuaternion<f64>) -> Vector3<f64> {
    let q = rotation.quaternion();
    let (imag, w) = if q.scalar() < 0.0 {
        (-q.imag(), -q.scalar())
    } else {
        (q.imag(), q.scalar())
    };

    let n = imag.norm();
    if n < SMALL_ANGLE_THRESHOLD {
        return imag * (2.0 / w);
    }
    imag * (2.0 * n.atan2(w) / n)
}

/// Logarithm map from a rigid transform to its twist.
///
/// Inverse of [`exp`] for rotation angles below π.
pub fn log(transform: &Isometry3<f64>) -> Twist {
    let omega = rotation_log(&transform.rotation);
    let upsilon = left_jacobian_inv(&omega) * transform.translation.vector;

    Vector6::new(upsilon.x, upsilon.y, upsilon.z, omega.x, omega.y, omega.z)
}

/// Rotation angle (radians) and translation norm of `a⁻¹ · b`.
///
/// Handy for comparing an estimate against ground truth.
pub fn pose_error(a: &Isometry3<f64>, b: &Isometry3<f64>) -> (f64, f64) {
    let delta = a.inverse() * b;
    (
        rotation_log(&delta.rotation).norm(),
        delta.translation.vector.norm(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_skew_cross_product() {
        let v = Vector3::new(1.0, -2.0, 0.5);
        let u = Vector3::new(0.3, 0.7, -1.1);
        let expected = v.cross(&u);
        let actual = skew(&v) * u;
        for i in 0..3 {
            assert_relative_eq!(actual[i], expected[i], epsilon = 1e-12);
        }
    }

    #[test]
    fn test_exp_zero_is_identity() {
        let t = exp(&Twist::zeros());
        assert!(t.rotation.angle() < 1e-15);
        assert!(t.translation.vector.norm() < 1e-15);
    }

    #[test]
    fn test_exp_pure_translation() {
        let t = exp(&Twist::new(0.1, -0.2, 0.3, 0.0, 0.0, 0.0));
        assert_relative_eq!(t.translation.vector.x, 0.1, epsilon = 1e-12);
        assert_relative_eq!(t.translation.vector.y, -0.2, epsilon = 1e-12);
        assert_relative_eq!(t.translation.vector.z, 0.3, epsilon = 1e-12);
    }

    #[test]
    fn test_exp_log_roundtrip() {
        let twists = [
            Twist::new(0.1, 0.2, -0.3, 0.05, -0.02, 0.4),
            Twist::new(-1.0, 0.5, 2.0, 1.2, 0.3, -0.8),
            Twist::new(0.0, 0.0, 0.0, 1e-12, -1e-12, 0.0),
        ];
        for xi in &twists {
            let recovered = log(&exp(xi));
            for i in 0..6 {
                assert_relative_eq!(recovered[i], xi[i], epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn test_exp_rotation_about_z() {
        let angle = std::f64::consts::FRAC_PI_2;
        let t = exp(&Twist::new(0.0, 0.0, 0.0, 0.0, 0.0, angle));
        let p = t * nalgebra::Point3::new(1.0, 0.0, 0.0);
        assert_relative_eq!(p.x, 0.0, epsilon = 1e-12);
        assert_relative_eq!(p.y, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_pose_error_identity() {
        let a = exp(&Twist::new(0.1, 0.2, 0.3, 0.01, 0.02, 0.03));
        let (rot, trans) = pose_error(&a, &a);
        assert!(rot < 1e-12);
        assert!(trans < 1e-12);
    }
}
