//! Type definitions for dense alignment.

use nalgebra::{Isometry3, Matrix6};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::stats::Statistics;
use crate::kernels::ChannelWeights;
use crate::selection::SelectionPredicate;
use crate::weighting::{InfluenceFunction, ScaleEstimator, WeightCalculation};

/// Configuration of the dense tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Coarsest pyramid level processed (inclusive).
    pub first_level: usize,

    /// Finest pyramid level processed (inclusive).
    pub last_level: usize,

    /// Iteration budget of one pyramid level.
    pub max_iterations_per_level: usize,

    /// A level converges once the max-abs component of the increment is at
    /// most this value.
    pub precision: f64,

    /// Weight of the prior pulling the estimate towards the initial guess.
    /// Also damps the normal equations.
    pub mu: f64,

    /// Start from the caller's guess instead of identity.
    pub use_initial_estimate: bool,

    /// Robust weighting. When false every residual has unit weight and the
    /// precision is identity.
    pub use_weighting: bool,

    pub scale_estimator: ScaleEstimator,

    pub influence_function: InfluenceFunction,

    /// Re-estimate the residual mean while weighting.
    pub estimate_mean: bool,

    /// Minimum intensity derivative for a reference pixel to be selected.
    pub intensity_derivative_threshold: f64,

    /// Minimum depth derivative for a reference pixel to be selected.
    pub depth_derivative_threshold: f64,

    /// Minimum number of valid residuals to evaluate an iteration.
    pub min_valid_points: usize,

    /// Sensor noise variance used to scale the reported information matrix
    /// (applied twice).
    pub information_noise_variance: f64,

    pub channel_weights: ChannelWeights,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            first_level: 3,
            last_level: 1,
            max_iterations_per_level: 100,
            precision: 5e-7,
            mu: 0.0,
            use_initial_estimate: false,
            use_weighting: true,
            scale_estimator: ScaleEstimator::Covariance,
            influence_function: InfluenceFunction::TDistribution { dof: 5.0 },
            estimate_mean: true,
            intensity_derivative_threshold: 0.0,
            depth_derivative_threshold: 0.0,
            min_valid_points: 10,
            information_noise_variance: 0.008,
            channel_weights: ChannelWeights::default(),
        }
    }
}

/// Reasons a [`Config`] is rejected.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("first_level ({first}) must not be finer than last_level ({last})")]
    InvalidLevels { first: usize, last: usize },

    #[error("max_iterations_per_level must be positive")]
    ZeroIterations,

    #[error("precision must be positive and finite, got {0}")]
    InvalidPrecision(f64),

    #[error("mu must be non-negative and finite, got {0}")]
    InvalidMu(f64),

    #[error("information_noise_variance must be positive and finite, got {0}")]
    InvalidNoiseVariance(f64),

    #[error("influence function parameter must be positive and finite, got {0}")]
    InvalidInfluenceParameter(f64),

    #[error("{name} must be non-negative and finite, got {value}")]
    InvalidThreshold { name: &'static str, value: f64 },

    #[error("channel weights must be finite")]
    InvalidChannelWeights,

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

impl Config {
    /// Default configuration over a custom level range.
    pub fn with_levels(first_level: usize, last_level: usize) -> Self {
        Self {
            first_level,
            last_level,
            ..Default::default()
        }
    }

    /// Number of pyramid levels that must be computed.
    pub fn num_levels(&self) -> usize {
        self.first_level + 1
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.first_level < self.last_level {
            return Err(ConfigError::InvalidLevels {
                first: self.first_level,
                last: self.last_level,
            });
        }
        if self.max_iterations_per_level == 0 {
            return Err(ConfigError::ZeroIterations);
        }
        if !(self.precision.is_finite() && self.precision > 0.0) {
            return Err(ConfigError::InvalidPrecision(self.precision));
        }
        if !(self.mu.is_finite() && self.mu >= 0.0) {
            return Err(ConfigError::InvalidMu(self.mu));
        }
        let v = self.information_noise_variance;
        if !(v.is_finite() && v > 0.0) {
            return Err(ConfigError::InvalidNoiseVariance(v));
        }
        if let Some(p) = self.influence_function.parameter() {
            if !(p.is_finite() && p > 0.0) {
                return Err(ConfigError::InvalidInfluenceParameter(p));
            }
        }
        for (name, value) in [
            ("intensity_derivative_threshold", self.intensity_derivative_threshold),
            ("depth_derivative_threshold", self.depth_derivative_threshold),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(ConfigError::InvalidThreshold { name, value });
            }
        }
        let w = &self.channel_weights;
        let channel = [
            w.intensity_reference,
            w.intensity_current,
            w.depth_reference,
            w.depth_current,
            w.intensity_scale,
        ];
        if !channel.iter().all(|c| c.is_finite()) {
            return Err(ConfigError::InvalidChannelWeights);
        }
        Ok(())
    }

    /// Parse a JSON configuration; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// The weighting strategy this configuration selects.
    pub fn weight_calculation(&self) -> WeightCalculation {
        if self.use_weighting {
            WeightCalculation {
                scale_estimator: self.scale_estimator,
                influence_function: self.influence_function,
                estimate_mean: self.estimate_mean,
            }
        } else {
            WeightCalculation::disabled()
        }
    }

    pub fn selection_predicate(&self) -> SelectionPredicate {
        SelectionPredicate::new(
            self.intensity_derivative_threshold,
            self.depth_derivative_threshold,
        )
    }
}

/// Why a pyramid level stopped iterating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationCriterion {
    /// The last proposed step did not lower the objective and was rolled back.
    ObjectiveIncreased,

    /// The iteration budget of the level was used up.
    IterationsExceeded,

    /// The solved increment fell below the precision threshold.
    IncrementTooSmall,

    /// Too few points to evaluate the level.
    InsufficientPoints,
}

impl TerminationCriterion {
    /// Decide whether a level stops after an iteration.
    ///
    /// Rejection wins over the budget, which wins over convergence.
    pub fn decide(
        accepted: bool,
        iterations_exceeded: bool,
        increment_small: bool,
    ) -> Option<Self> {
        if !accepted {
            Some(TerminationCriterion::ObjectiveIncreased)
        } else if iterations_exceeded {
            Some(TerminationCriterion::IterationsExceeded)
        } else if increment_small {
            Some(TerminationCriterion::IncrementTooSmall)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TerminationCriterion::ObjectiveIncreased => "objective_increased",
            TerminationCriterion::IterationsExceeded => "iterations_exceeded",
            TerminationCriterion::IncrementTooSmall => "increment_too_small",
            TerminationCriterion::InsufficientPoints => "insufficient_points",
        }
    }
}

/// Result of one frame-to-frame alignment.
#[derive(Debug, Clone)]
pub struct AlignmentResult {
    /// Motion of the current camera expressed in the reference frame.
    pub transformation: Isometry3<f64>,

    /// Information matrix of the twist at the last accepted iteration.
    pub information: Matrix6<f64>,

    /// Negative data log-likelihood plus prior term of the last accepted
    /// iteration.
    pub log_likelihood: f64,

    pub statistics: Statistics,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.first_level, 3);
        assert_eq!(config.last_level, 1);
        assert_eq!(config.num_levels(), 4);
        assert_eq!(config.max_iterations_per_level, 100);
        assert!(config.use_weighting);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_is_fresh_value() {
        let mut a = Config::default();
        a.mu = 5.0;
        assert_ne!(a, Config::default());
        assert_eq!(Config::default().mu, 0.0);
    }

    #[test]
    fn test_config_with_levels() {
        let config = Config::with_levels(4, 0);
        assert_eq!(config.num_levels(), 5);
        assert_eq!(config.max_iterations_per_level, 100);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad = |f: fn(&mut Config)| {
            let mut c = Config::default();
            f(&mut c);
            c.validate()
        };
        assert!(matches!(
            bad(|c| c.last_level = 4),
            Err(ConfigError::InvalidLevels { first: 3, last: 4 })
        ));
        assert!(matches!(
            bad(|c| c.max_iterations_per_level = 0),
            Err(ConfigError::ZeroIterations)
        ));
        assert!(matches!(
            bad(|c| c.precision = 0.0),
            Err(ConfigError::InvalidPrecision(_))
        ));
        assert!(matches!(bad(|c| c.mu = -1.0), Err(ConfigError::InvalidMu(_))));
        assert!(matches!(bad(|c| c.mu = f64::NAN), Err(ConfigError::InvalidMu(_))));
        assert!(matches!(
            bad(|c| c.information_noise_variance = 0.0),
            Err(ConfigError::InvalidNoiseVariance(_))
        ));
        assert!(matches!(
            bad(|c| c.influence_function = InfluenceFunction::Huber { k: -1.0 }),
            Err(ConfigError::InvalidInfluenceParameter(_))
        ));
        assert!(matches!(
            bad(|c| c.depth_derivative_threshold = -0.1),
            Err(ConfigError::InvalidThreshold { name: "depth_derivative_threshold", .. })
        ));
        assert!(matches!(
            bad(|c| c.channel_weights.intensity_scale = f64::INFINITY),
            Err(ConfigError::InvalidChannelWeights)
        ));
    }

    #[test]
    fn test_from_json_str() {
        let config = Config::from_json_str(
            r#"{ "first_level": 2, "last_level": 0, "use_weighting": false,
                 "influence_function": { "type": "huber", "k": 1.5 } }"#,
        )
        .unwrap();
        assert_eq!(config.first_level, 2);
        assert_eq!(config.last_level, 0);
        assert!(!config.use_weighting);
        assert_eq!(config.influence_function, InfluenceFunction::Huber { k: 1.5 });
        assert_eq!(config.precision, 5e-7);

        assert!(matches!(
            Config::from_json_str(r#"{ "first_level": 0, "last_level": 1 }"#),
            Err(ConfigError::InvalidLevels { .. })
        ));
        assert!(matches!(Config::from_json_str("{"), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_weight_calculation_selection() {
        let mut config = Config::default();
        assert_eq!(config.weight_calculation(), WeightCalculation::default());

        config.use_weighting = false;
        config.influence_function = InfluenceFunction::Tukey { b: 4.0 };
        assert!(config.weight_calculation().is_disabled());
    }

    #[test]
    fn test_termination_precedence() {
        use TerminationCriterion::*;
        assert_eq!(TerminationCriterion::decide(false, true, true), Some(ObjectiveIncreased));
        assert_eq!(TerminationCriterion::decide(true, true, true), Some(IterationsExceeded));
        assert_eq!(TerminationCriterion::decide(true, false, true), Some(IncrementTooSmall));
        assert_eq!(TerminationCriterion::decide(true, false, false), None);
    }

    #[test]
    fn test_termination_serde_names() {
        let json = serde_json::to_string(&TerminationCriterion::IncrementTooSmall).unwrap();
        assert_eq!(json, format!("\"{}\"", TerminationCriterion::IncrementTooSmall.as_str()));
    }
}
