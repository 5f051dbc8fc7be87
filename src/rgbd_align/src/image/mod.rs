//! Range-and-intensity frames and their multi-resolution pyramids.
//!
//! The optimizer only sees a frame through [`FrameSampler`], which returns
//! interpolated intensity, depth and their image derivatives at a sub-pixel
//! location. [`RgbdImage`] is the raster implementation; tests can plug in
//! analytic scenes through the same trait.

pub mod pyramid;
pub mod rgbd;

use nalgebra::{Point3, Vector2};
use serde::{Deserialize, Serialize};

pub use pyramid::{FramePyramid, RgbdPyramid};
pub use rgbd::RgbdImage;

/// Pinhole camera intrinsics (pixels).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Intrinsics {
    pub fx: f64,
    pub fy: f64,
    pub ox: f64,
    pub oy: f64,
}

impl Intrinsics {
    pub fn new(fx: f64, fy: f64, ox: f64, oy: f64) -> Self {
        Self { fx, fy, ox, oy }
    }

    /// Intrinsics of an image resampled by `factor` (0.5 per pyramid level).
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            fx: self.fx * factor,
            fy: self.fy * factor,
            ox: self.ox * factor,
            oy: self.oy * factor,
        }
    }

    /// Project a camera-frame point to pixel coordinates.
    #[inline]
    pub fn project(&self, p: &Point3<f64>) -> Vector2<f64> {
        Vector2::new(
            self.fx * p.x / p.z + self.ox,
            self.fy * p.y / p.z + self.oy,
        )
    }

    /// Back-project pixel `(u, v)` at depth `z` into the camera frame.
    #[inline]
    pub fn back_project(&self, u: f64, v: f64, z: f64) -> Point3<f64> {
        Point3::new((u - self.ox) * z / self.fx, (v - self.oy) * z / self.fy, z)
    }
}

/// Interpolated frame values at one location.
///
/// Gradients are in intensity (resp. depth) units per pixel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameSample {
    pub intensity: f64,
    pub depth: f64,
    pub intensity_gradient: Vector2<f64>,
    pub depth_gradient: Vector2<f64>,
}

impl FrameSample {
    pub fn is_finite(&self) -> bool {
        self.intensity.is_finite()
            && self.depth.is_finite()
            && self.intensity_gradient.iter().all(|v| v.is_finite())
            && self.depth_gradient.iter().all(|v| v.is_finite())
    }
}

/// Read access to one resolution of the current frame.
///
/// `sample` returns `None` outside the interpolation domain or where any
/// channel is invalid. Implementations must be `Sync` because residuals are
/// evaluated in parallel.
pub trait FrameSampler: Sync {
    fn intrinsics(&self) -> &Intrinsics;

    fn sample(&self, u: f64, v: f64) -> Option<FrameSample>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_project_back_project() {
        let k = Intrinsics::new(525.0, 520.0, 319.5, 239.5);
        let p = k.back_project(100.25, 300.75, 2.5);
        let uv = k.project(&p);
        assert_relative_eq!(uv.x, 100.25, epsilon = 1e-10);
        assert_relative_eq!(uv.y, 300.75, epsilon = 1e-10);
        assert_relative_eq!(p.z, 2.5);
    }

    #[test]
    fn test_scaled_halves_everything() {
        let k = Intrinsics::new(500.0, 400.0, 320.0, 240.0).scaled(0.5);
        assert_eq!(k, Intrinsics::new(250.0, 200.0, 160.0, 120.0));
    }
}
