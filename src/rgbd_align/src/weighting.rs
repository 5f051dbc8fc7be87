//! Robust weighting strategy.
//!
//! Residuals are modelled as a bivariate distribution with a running mean and
//! precision. An [`InfluenceFunction`] turns the squared Mahalanobis distance
//! `d² = (r-μ)ᵀ Λ (r-μ)` of each residual into an IRLS weight and a robust
//! loss; a [`ScaleEstimator`] decides how the precision is re-estimated.

use nalgebra::Matrix2;
use serde::{Deserialize, Serialize};

/// Smallest variance admitted on the covariance diagonal before inversion.
pub const MIN_VARIANCE: f64 = 1e-12;

/// Maps a squared Mahalanobis distance to a weight and a loss `ρ(d²)`.
///
/// The weight is `2 dρ/d(d²)`, which keeps IRLS and the log-likelihood
/// objective consistent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InfluenceFunction {
    /// Gaussian noise: every residual counts fully.
    Unit,
    /// Student-t noise with `dof` degrees of freedom.
    TDistribution { dof: f64 },
    Huber { k: f64 },
    Tukey { b: f64 },
}

impl Default for InfluenceFunction {
    fn default() -> Self {
        InfluenceFunction::TDistribution { dof: 5.0 }
    }
}

impl InfluenceFunction {
    #[inline]
    pub fn weight(&self, d2: f64) -> f64 {
        match *self {
            InfluenceFunction::Unit => 1.0,
            InfluenceFunction::TDistribution { dof } => (dof + 2.0) / (dof + d2),
            InfluenceFunction::Huber { k } => {
                let d = d2.sqrt();
                if d <= k {
                    1.0
                } else {
                    k / d
                }
            }
            InfluenceFunction::Tukey { b } => {
                if d2 <= b * b {
                    let u = 1.0 - d2 / (b * b);
                    u * u
                } else {
                    0.0
                }
            }
        }
    }

    #[inline]
    pub fn loss(&self, d2: f64) -> f64 {
        match *self {
            InfluenceFunction::Unit => 0.5 * d2,
            InfluenceFunction::TDistribution { dof } => 0.5 * (dof + 2.0) * (d2 / dof).ln_1p(),
            InfluenceFunction::Huber { k } => {
                let d = d2.sqrt();
                if d <= k {
                    0.5 * d2
                } else {
                    k * (d - 0.5 * k)
                }
            }
            InfluenceFunction::Tukey { b } => {
                let b2_6 = b * b / 6.0;
                if d2 <= b * b {
                    let u = 1.0 - d2 / (b * b);
                    b2_6 * (1.0 - u * u * u)
                } else {
                    b2_6
                }
            }
        }
    }

    /// The shape parameter, if any.
    pub fn parameter(&self) -> Option<f64> {
        match *self {
            InfluenceFunction::Unit => None,
            InfluenceFunction::TDistribution { dof } => Some(dof),
            InfluenceFunction::Huber { k } => Some(k),
            InfluenceFunction::Tukey { b } => Some(b),
        }
    }
}

/// How the residual covariance is re-estimated each iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleEstimator {
    /// Covariance fixed to identity.
    Unit,
    /// Weighted covariance of the residuals about the running mean.
    #[default]
    Covariance,
}

impl ScaleEstimator {
    /// Precision to use given the weighted residual covariance.
    pub fn precision(&self, covariance: &Matrix2<f64>) -> Matrix2<f64> {
        match self {
            ScaleEstimator::Unit => Matrix2::identity(),
            ScaleEstimator::Covariance => invert_covariance(covariance),
        }
    }
}

/// Inverse of a 2x2 covariance with its diagonal floored at [`MIN_VARIANCE`].
pub fn invert_covariance(covariance: &Matrix2<f64>) -> Matrix2<f64> {
    let mut c = *covariance;
    c[(0, 0)] = c[(0, 0)].max(MIN_VARIANCE);
    c[(1, 1)] = c[(1, 1)].max(MIN_VARIANCE);

    c.try_inverse()
        .unwrap_or_else(|| Matrix2::new(1.0 / c[(0, 0)], 0.0, 0.0, 1.0 / c[(1, 1)]))
}

/// Scale estimator + influence function pair chosen at configure time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightCalculation {
    pub scale_estimator: ScaleEstimator,
    pub influence_function: InfluenceFunction,
    /// Re-estimate the residual mean from the weighted residuals.
    pub estimate_mean: bool,
}

impl Default for WeightCalculation {
    fn default() -> Self {
        Self {
            scale_estimator: ScaleEstimator::Covariance,
            influence_function: InfluenceFunction::default(),
            estimate_mean: true,
        }
    }
}

impl WeightCalculation {
    /// Unit weights, identity precision and zero mean for every point and
    /// iteration: plain least squares.
    pub fn disabled() -> Self {
        Self {
            scale_estimator: ScaleEstimator::Unit,
            influence_function: InfluenceFunction::Unit,
            estimate_mean: false,
        }
    }

    pub fn is_disabled(&self) -> bool {
        *self == Self::disabled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const ALL: [InfluenceFunction; 4] = [
        InfluenceFunction::Unit,
        InfluenceFunction::TDistribution { dof: 5.0 },
        InfluenceFunction::Huber { k: 1.345 },
        InfluenceFunction::Tukey { b: 4.685 },
    ];

    #[test]
    fn test_zero_distance() {
        for f in ALL {
            assert_relative_eq!(f.loss(0.0), 0.0);
        }
        assert_relative_eq!(InfluenceFunction::Unit.weight(0.0), 1.0);
        assert_relative_eq!(InfluenceFunction::Huber { k: 1.0 }.weight(0.0), 1.0);
        assert_relative_eq!(InfluenceFunction::Tukey { b: 1.0 }.weight(0.0), 1.0);
        // (ν + 2) / ν
        assert_relative_eq!(InfluenceFunction::TDistribution { dof: 5.0 }.weight(0.0), 1.4);
    }

    #[test]
    fn test_weight_is_twice_loss_derivative() {
        let h = 1e-6;
        for f in ALL {
            for d2 in [0.3, 1.0, 2.5, 9.0, 40.0] {
                let numeric = (f.loss(d2 + h) - f.loss(d2 - h)) / (2.0 * h);
                assert_relative_eq!(2.0 * numeric, f.weight(d2), epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn test_t_distribution_downweights_outliers() {
        let t = InfluenceFunction::TDistribution { dof: 5.0 };
        assert!(t.weight(100.0) < 0.1);
        assert!(t.weight(1.0) > t.weight(4.0));
    }

    #[test]
    fn test_tukey_rejects_beyond_cutoff() {
        let f = InfluenceFunction::Tukey { b: 2.0 };
        assert_eq!(f.weight(4.5), 0.0);
        assert_relative_eq!(f.loss(4.5), 4.0 / 6.0);
    }

    #[test]
    fn test_precision_inverts_covariance() {
        let cov = Matrix2::new(0.04, 0.01, 0.01, 0.09);
        let lambda = ScaleEstimator::Covariance.precision(&cov);
        let product = lambda * cov;
        assert_relative_eq!(product, Matrix2::identity(), epsilon = 1e-12);

        assert_eq!(ScaleEstimator::Unit.precision(&cov), Matrix2::identity());
    }

    #[test]
    fn test_degenerate_covariance_is_floored() {
        let lambda = invert_covariance(&Matrix2::zeros());
        assert!(lambda.iter().all(|v| v.is_finite()));
        assert_relative_eq!(lambda[(0, 0)], 1.0 / MIN_VARIANCE, max_relative = 1e-9);
    }

    #[test]
    fn test_disabled() {
        let w = WeightCalculation::disabled();
        assert!(w.is_disabled());
        assert!(!WeightCalculation::default().is_disabled());
        assert_eq!(w.influence_function.weight(123.0), 1.0);
    }

    #[test]
    fn test_influence_serde() {
        let json = serde_json::to_string(&InfluenceFunction::Huber { k: 2.0 }).unwrap();
        assert_eq!(json, r#"{"type":"huber","k":2.0}"#);
        let back: InfluenceFunction =
            serde_json::from_str(r#"{"type":"t_distribution","dof":3.0}"#).unwrap();
        assert_eq!(back, InfluenceFunction::TDistribution { dof: 3.0 });
    }
}
