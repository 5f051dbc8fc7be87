//! Gauss-Newton normal equations for the photometric + geometric residual.
//!
//! For a warped point `q = (x, y, z)` and twist `δ = [υ, ω]` applied on the
//! left, the normalized projection `(x/z, y/z)` has Jacobian
//!
//! ```text
//! Jw = | 1/z  0    -x/z²  -xy/z²       1 + x²/z²  -y/z |
//!      | 0    1/z  -y/z²  -(1 + y²/z²)  xy/z²       x/z |
//! ```
//!
//! and the depth `q.z` has Jacobian `Jz = [0, 0, 1, y, -x, 0]`. A residual's
//! 2x6 Jacobian is `[gI·Jw ; gZ·Jw − Jz]` with the focal-scaled gradients of
//! its [`PointError`]. With the residual convention of the kernels this is
//! `−∂r/∂δ`, so the step solves `A x = b` directly.

use nalgebra::{Matrix2, Matrix2x6, Matrix6, Point3, RowVector6, Vector2, Vector6};
use rayon::prelude::*;

use crate::geometry::Twist;
use crate::kernels::PointError;

/// Singular value tolerance for the SVD fallback.
pub const SVD_TOLERANCE: f64 = 1e-12;

/// Jacobian of the normalized projection of `p` w.r.t. a left twist.
#[inline]
pub fn projection_jacobian(p: &Point3<f64>) -> Matrix2x6<f64> {
    let z_inv = 1.0 / p.z;
    let z_inv_sqr = z_inv * z_inv;
    let xy = p.x * p.y * z_inv_sqr;

    Matrix2x6::new(
        z_inv,
        0.0,
        -p.x * z_inv_sqr,
        -xy,
        1.0 + p.x * p.x * z_inv_sqr,
        -p.y * z_inv,
        0.0,
        z_inv,
        -p.y * z_inv_sqr,
        -(1.0 + p.y * p.y * z_inv_sqr),
        xy,
        p.x * z_inv,
    )
}

/// Jacobian of the depth coordinate of `p` w.r.t. a left twist.
#[inline]
pub fn depth_jacobian(p: &Point3<f64>) -> RowVector6<f64> {
    RowVector6::new(0.0, 0.0, 1.0, p.y, -p.x, 0.0)
}

/// Full 2x6 Jacobian of one residual.
#[inline]
pub fn point_jacobian(e: &PointError) -> Matrix2x6<f64> {
    let jw = projection_jacobian(&e.point);
    let mut j = Matrix2x6::zeros();
    j.set_row(0, &(e.intensity_gradient.transpose() * jw));
    j.set_row(1, &(e.depth_gradient.transpose() * jw - depth_jacobian(&e.point)));
    j
}

/// `A = Σ Jᵀ W J`, `b = Σ Jᵀ W r` over the valid residuals of one iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalEquations {
    pub a: Matrix6<f64>,
    pub b: Vector6<f64>,
    pub count: usize,
}

impl Default for NormalEquations {
    fn default() -> Self {
        Self {
            a: Matrix6::zeros(),
            b: Vector6::zeros(),
            count: 0,
        }
    }
}

impl std::ops::Add for NormalEquations {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self {
            a: self.a + other.a,
            b: self.b + other.b,
            count: self.count + other.count,
        }
    }
}

/// Damped system and its solution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DampedStep {
    /// `A + μI`.
    pub hessian: Matrix6<f64>,
    pub increment: Twist,
}

impl NormalEquations {
    /// Add one residual with its 2x2 weight matrix.
    #[inline]
    pub fn update(
        &mut self,
        j: &Matrix2x6<f64>,
        residual: &Vector2<f64>,
        weight: &Matrix2<f64>,
    ) {
        let jtw = j.transpose() * weight;
        self.a += jtw * j;
        self.b += jtw * residual;
        self.count += 1;
    }

    /// Accumulate every residual with weight `wᵢ Λ`.
    pub fn accumulate(
        errors: &[PointError],
        weights: &[f64],
        precision: &Matrix2<f64>,
    ) -> Self {
        errors
            .par_iter()
            .zip(weights.par_iter())
            .fold(Self::default, |mut ne, (e, &w)| {
                ne.update(&point_jacobian(e), &e.residual, &(precision * w));
                ne
            })
            .reduce(Self::default, |a, b| a + b)
    }

    /// Solve `(A + μI) x = b + μ·prior`.
    ///
    /// `prior` is the twist from the current linearization point back to the
    /// initial guess. Returns `None` when the damped system is numerically
    /// zero.
    pub fn solve_damped(&self, mu: f64, prior: &Twist) -> Option<DampedStep> {
        let hessian = self.a + Matrix6::identity() * mu;
        let rhs = self.b + prior * mu;
        let increment = solve_symmetric(&hessian, &rhs, SVD_TOLERANCE)?;
        Some(DampedStep { hessian, increment })
    }
}

/// Solve a symmetric positive (semi-)definite 6x6 system.
///
/// Cholesky first; falls back to an SVD pseudo-inverse when `a` is not
/// positive definite.
pub fn solve_symmetric(
    a: &Matrix6<f64>,
    b: &Vector6<f64>,
    tolerance: f64,
) -> Option<Vector6<f64>> {
    if let Some(chol) = a.cholesky() {
        let x = chol.solve(b);
        if x.iter().all(|v| v.is_finite()) {
            return Some(x);
        }
    }

    let svd = a.svd(true, true);
    if svd.singular_values.max() < tolerance {
        return None;
    }
    svd.solve(b, tolerance)
        .ok()
        .filter(|x| x.iter().all(|v| v.is_finite()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::exp;
    use approx::assert_relative_eq;

    fn normalized(p: &Point3<f64>) -> Vector2<f64> {
        Vector2::new(p.x / p.z, p.y / p.z)
    }

    #[test]
    fn test_projection_jacobian_matches_finite_differences() {
        let p = Point3::new(0.3, -0.2, 1.7);
        let jw = projection_jacobian(&p);
        let h = 1e-7;

        for k in 0..6 {
            let mut delta = Twist::zeros();
            delta[k] = h;
            let plus = normalized(&(exp(&delta) * p));
            delta[k] = -h;
            let minus = normalized(&(exp(&delta) * p));
            let numeric = (plus - minus) / (2.0 * h);

            assert_relative_eq!(jw[(0, k)], numeric.x, epsilon = 1e-6);
            assert_relative_eq!(jw[(1, k)], numeric.y, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_depth_jacobian_matches_finite_differences() {
        let p = Point3::new(-0.4, 0.25, 2.2);
        let jz = depth_jacobian(&p);
        let h = 1e-7;

        for k in 0..6 {
            let mut delta = Twist::zeros();
            delta[k] = h;
            let plus = (exp(&delta) * p).z;
            delta[k] = -h;
            let minus = (exp(&delta) * p).z;
            assert_relative_eq!(jz[k], (plus - minus) / (2.0 * h), epsilon = 1e-6);
        }
    }

    #[test]
    fn test_point_jacobian_rows() {
        let e = PointError {
            point: Point3::new(0.1, 0.2, 2.0),
            intensity_gradient: Vector2::new(3.0, -1.0),
            depth_gradient: Vector2::new(0.5, 0.25),
            residual: Vector2::zeros(),
        };
        let j = point_jacobian(&e);
        let jw = projection_jacobian(&e.point);

        let row0 = jw.row(0) * 3.0 - jw.row(1);
        let row1 = jw.row(0) * 0.5 + jw.row(1) * 0.25 - depth_jacobian(&e.point);
        assert_relative_eq!(j.row(0).into_owned(), row0, epsilon = 1e-12);
        assert_relative_eq!(j.row(1).into_owned(), row1, epsilon = 1e-12);
    }

    #[test]
    fn test_accumulate_matches_sequential_update() {
        let errors: Vec<PointError> = (0..50)
            .map(|i| {
                let t = i as f64 * 0.1;
                PointError {
                    point: Point3::new(t.sin() * 0.5, t.cos() * 0.3, 1.5 + 0.01 * i as f64),
                    intensity_gradient: Vector2::new(t.cos(), 0.5 * t.sin()),
                    depth_gradient: Vector2::new(0.1 * t, -0.05),
                    residual: Vector2::new(0.01 * t.sin(), 0.002 * t.cos()),
                }
            })
            .collect();
        let weights: Vec<f64> = (0..50).map(|i| 0.5 + (i % 3) as f64 * 0.25).collect();
        let precision = Matrix2::new(4.0, 0.5, 0.5, 9.0);

        let parallel = NormalEquations::accumulate(&errors, &weights, &precision);

        let mut sequential = NormalEquations::default();
        for (e, w) in errors.iter().zip(&weights) {
            sequential.update(&point_jacobian(e), &e.residual, &(precision * *w));
        }

        assert_eq!(parallel.count, 50);
        assert_relative_eq!(parallel.a, sequential.a, epsilon = 1e-9);
        assert_relative_eq!(parallel.b, sequential.b, epsilon = 1e-9);
        assert_relative_eq!(parallel.a, parallel.a.transpose(), epsilon = 1e-9);
    }

    #[test]
    fn test_solve_damped_adds_prior() {
        let ne = NormalEquations {
            a: Matrix6::identity() * 2.0,
            b: Vector6::new(2.0, 4.0, 6.0, 8.0, 10.0, 12.0),
            count: 1,
        };
        let prior = Vector6::repeat(1.0);
        let step = ne.solve_damped(2.0, &prior).unwrap();

        assert_relative_eq!(step.hessian, Matrix6::identity() * 4.0);
        for i in 0..6 {
            assert_relative_eq!(step.increment[i], (ne.b[i] + 2.0) / 4.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_solve_zero_system_fails() {
        let ne = NormalEquations::default();
        assert!(ne.solve_damped(0.0, &Twist::zeros()).is_none());
    }

    #[test]
    fn test_solve_symmetric_svd_fallback() {
        // Rank deficient: Cholesky fails, the pseudo-inverse still answers.
        let mut a = Matrix6::identity();
        a[(5, 5)] = 0.0;
        let b = Vector6::new(1.0, 2.0, 3.0, 4.0, 5.0, 0.0);
        let x = solve_symmetric(&a, &b, 1e-10).unwrap();
        assert_relative_eq!(x, b, epsilon = 1e-12);
    }
}
