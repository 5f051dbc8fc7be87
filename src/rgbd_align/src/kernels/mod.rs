//! Per-point numeric kernels for dense alignment.
//!
//! Every kernel maps over a batch of points or residuals and reduces by
//! addition, so the batch is evaluated in parallel with rayon. The scalar
//! body of each kernel is the reference behaviour.
//!
//! Residual convention for a reference point `p` warped to `q = T·p`:
//!
//! - intensity: `(I_ref − I_cur(π(q))) / 255`
//! - depth: `q.z − Z_cur(π(q))`

pub mod cpu;

use nalgebra::{Point3, Vector2};
use serde::{Deserialize, Serialize};

pub use cpu::{compute_log_likelihood, compute_residuals, compute_scale, compute_weights};

/// Blend and scale factors applied when forming residuals and gradients.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelWeights {
    /// Share of the reference image in the intensity gradient.
    pub intensity_reference: f64,
    /// Share of the current image in the intensity gradient.
    pub intensity_current: f64,
    /// Share of the reference depth map in the depth gradient.
    pub depth_reference: f64,
    /// Share of the current depth map in the depth gradient.
    pub depth_current: f64,
    /// Factor mapping raw intensity to residual units.
    pub intensity_scale: f64,
}

impl Default for ChannelWeights {
    fn default() -> Self {
        Self {
            intensity_reference: 0.5,
            intensity_current: 0.5,
            depth_reference: 0.0,
            depth_current: 1.0,
            intensity_scale: 1.0 / 255.0,
        }
    }
}

/// A valid correspondence at one pose hypothesis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointError {
    /// Reference point expressed in the current camera frame.
    pub point: Point3<f64>,
    /// Blended intensity gradient, pre-multiplied by focal length and
    /// intensity scale.
    pub intensity_gradient: Vector2<f64>,
    /// Blended depth gradient, pre-multiplied by focal length.
    pub depth_gradient: Vector2<f64>,
    /// `[intensity, depth]` residual.
    pub residual: Vector2<f64>,
}
