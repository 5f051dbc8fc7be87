//! CPU reference kernels (rayon).

use nalgebra::{Isometry3, Matrix2, Vector2};
use rayon::prelude::*;

use super::{ChannelWeights, PointError};
use crate::image::FrameSampler;
use crate::selection::ReferencePoint;
use crate::weighting::InfluenceFunction;

#[inline]
fn mahalanobis_squared(
    residual: &Vector2<f64>,
    mean: &Vector2<f64>,
    precision: &Matrix2<f64>,
) -> f64 {
    let diff = residual - mean;
    diff.dot(&(precision * diff))
}

/// Warp `points` by `transform`, sample `frame` and write the valid
/// correspondences to `out` in input order.
///
/// A point is dropped when it lands behind the camera, outside the sampling
/// domain, or on a non-finite sample. Returns the number of valid points.
pub fn compute_residuals<F>(
    points: &[ReferencePoint],
    frame: &F,
    transform: &Isometry3<f64>,
    weights: &ChannelWeights,
    out: &mut Vec<PointError>,
) -> usize
where
    F: FrameSampler + ?Sized,
{
    let k = *frame.intrinsics();

    out.clear();
    out.par_extend(points.par_iter().filter_map(|reference| {
        let q = transform * reference.point;
        if !(q.z > 0.0) {
            return None;
        }
        let uv = k.project(&q);
        let current = frame.sample(uv.x, uv.y)?;

        let di = reference.intensity_gradient * weights.intensity_reference
            + current.intensity_gradient * weights.intensity_current;
        let dz = reference.depth_gradient * weights.depth_reference
            + current.depth_gradient * weights.depth_current;

        let error = PointError {
            point: q,
            intensity_gradient: Vector2::new(
                k.fx * weights.intensity_scale * di.x,
                k.fy * weights.intensity_scale * di.y,
            ),
            depth_gradient: Vector2::new(k.fx * dz.x, k.fy * dz.y),
            residual: Vector2::new(
                (reference.intensity - current.intensity) * weights.intensity_scale,
                q.z - current.depth,
            ),
        };

        error.residual.iter().all(|v| v.is_finite()).then_some(error)
    }));

    out.len()
}

/// Robust weights for `errors` under the running `(mean, precision)`.
///
/// With `estimate_mean`, `mean` is then replaced by the weighted mean of the
/// residuals.
pub fn compute_weights(
    errors: &[PointError],
    weights: &mut Vec<f64>,
    mean: &mut Vector2<f64>,
    precision: &Matrix2<f64>,
    influence: &InfluenceFunction,
    estimate_mean: bool,
) {
    let m = *mean;
    weights.clear();
    weights.par_extend(
        errors
            .par_iter()
            .map(|e| influence.weight(mahalanobis_squared(&e.residual, &m, precision))),
    );

    if estimate_mean {
        let (weighted_sum, weight_sum) = errors
            .par_iter()
            .zip(weights.par_iter())
            .map(|(e, &w)| (e.residual * w, w))
            .reduce(|| (Vector2::zeros(), 0.0), |a, b| (a.0 + b.0, a.1 + b.1));

        if weight_sum > 0.0 {
            *mean = weighted_sum / weight_sum;
        }
    }
}

/// Weighted residual covariance `Σ wᵢ (rᵢ−μ)(rᵢ−μ)ᵀ / n`.
pub fn compute_scale(
    errors: &[PointError],
    weights: &[f64],
    mean: &Vector2<f64>,
) -> Matrix2<f64> {
    if errors.is_empty() {
        return Matrix2::identity();
    }

    let sum = errors
        .par_iter()
        .zip(weights.par_iter())
        .map(|(e, &w)| {
            let diff = e.residual - mean;
            diff * diff.transpose() * w
        })
        .reduce(Matrix2::zeros, |a, b| a + b);

    sum / errors.len() as f64
}

/// Data log-likelihood `n/2 · ln|Λ| − Σ ρ(d²ᵢ)`.
///
/// The alignment objective is its negation.
pub fn compute_log_likelihood(
    errors: &[PointError],
    mean: &Vector2<f64>,
    precision: &Matrix2<f64>,
    influence: &InfluenceFunction,
) -> f64 {
    let loss: f64 = errors
        .par_iter()
        .map(|e| influence.loss(mahalanobis_squared(&e.residual, mean, precision)))
        .sum();

    0.5 * errors.len() as f64 * precision.determinant().ln() - loss
}
