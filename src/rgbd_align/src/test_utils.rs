//! Synthetic scenes with known ground truth.
//!
//! A textured plane seen by a pinhole camera is evaluated analytically, so
//! frames can be sampled at any sub-pixel location without interpolation
//! error, or rendered into [`RgbdImage`]s for the raster path.

use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{bail, Result};
use nalgebra::{Isometry3, Vector2, Vector3};

use crate::geometry::{exp, Twist};
use crate::image::{FramePyramid, FrameSample, FrameSampler, Intrinsics, RgbdImage, RgbdPyramid};
use crate::selection::{PointSource, ReferencePoint};

/// Step used for the analytic image derivatives (pixels).
const DERIVATIVE_STEP: f64 = 1e-3;

/// Textured plane `z = z0 + slope_x·x + slope_y·y` in the reference camera
/// frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlanarScene {
    pub z0: f64,
    pub slope_x: f64,
    pub slope_y: f64,
}

impl Default for PlanarScene {
    fn default() -> Self {
        Self {
            z0: 1.5,
            slope_x: 0.1,
            slope_y: -0.05,
        }
    }
}

impl PlanarScene {
    /// Intensity painted at reference-frame coordinates `(x, y)` of the plane.
    pub fn intensity(&self, x: f64, y: f64) -> f64 {
        128.0
            + 50.0 * (8.0 * x + 1.0).sin()
            + 40.0 * (6.0 * y - 0.5).cos()
            + 20.0 * (5.0 * (x + y)).sin()
    }

    /// Plane normal `n` with `n·p = z0` for points on the plane.
    pub fn normal(&self) -> Vector3<f64> {
        Vector3::new(-self.slope_x, -self.slope_y, 1.0)
    }

    /// Camera with an 80 px image mapping to focal length 100.
    pub fn camera(width: usize, height: usize) -> Intrinsics {
        let f = 1.25 * width as f64;
        Intrinsics::new(
            f,
            f,
            (width as f64 - 1.0) * 0.5,
            (height as f64 - 1.0) * 0.5,
        )
    }

    /// Analytic view of the scene from a camera whose warp from the
    /// reference camera is `pose`.
    pub fn frame(&self, width: usize, height: usize, pose: &Isometry3<f64>) -> AnalyticFrame {
        AnalyticFrame {
            scene: *self,
            intrinsics: Self::camera(width, height),
            width,
            height,
            pose: *pose,
        }
    }

    /// Rasterize the view from `pose`.
    pub fn render(&self, width: usize, height: usize, pose: &Isometry3<f64>) -> Result<RgbdImage> {
        let frame = self.frame(width, height, pose);
        let mut intensity = Vec::with_capacity(width * height);
        let mut depth = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                match frame.raycast(x as f64, y as f64) {
                    Some((i, z)) => {
                        intensity.push(i as f32);
                        depth.push(z as f32);
                    }
                    None => {
                        intensity.push(0.0);
                        depth.push(f32::NAN);
                    }
                }
            }
        }
        RgbdImage::new(width, height, intensity, depth, frame.intrinsics)
    }

    /// Reference (identity) and current (`motion`) pyramids.
    pub fn render_pair(
        &self,
        width: usize,
        height: usize,
        motion: &Isometry3<f64>,
    ) -> Result<(RgbdPyramid, RgbdPyramid)> {
        let reference = self.render(width, height, &Isometry3::identity())?;
        let current = self.render(width, height, motion)?;
        Ok((RgbdPyramid::new(reference), RgbdPyramid::new(current)))
    }
}

/// Exact sampler of a [`PlanarScene`] view.
#[derive(Debug, Clone)]
pub struct AnalyticFrame {
    scene: PlanarScene,
    intrinsics: Intrinsics,
    width: usize,
    height: usize,
    pose: Isometry3<f64>,
}

impl AnalyticFrame {
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Intensity and depth seen through pixel `(u, v)`, if the ray hits the
    /// plane in front of the camera.
    pub fn raycast(&self, u: f64, v: f64) -> Option<(f64, f64)> {
        let k = &self.intrinsics;
        let ray = Vector3::new((u - k.ox) / k.fx, (v - k.oy) / k.fy, 1.0);

        let to_reference = self.pose.inverse();
        let direction = to_reference.rotation * ray;
        let origin = to_reference.translation.vector;

        let n = self.scene.normal();
        let denom = n.dot(&direction);
        if denom.abs() < 1e-12 {
            return None;
        }
        let depth = (self.scene.z0 - n.dot(&origin)) / denom;
        if !(depth > 0.0) {
            return None;
        }

        let p = origin + direction * depth;
        Some((self.scene.intensity(p.x, p.y), depth))
    }
}

impl FrameSampler for AnalyticFrame {
    fn intrinsics(&self) -> &Intrinsics {
        &self.intrinsics
    }

    fn sample(&self, u: f64, v: f64) -> Option<FrameSample> {
        let max_u = (self.width - 1) as f64;
        let max_v = (self.height - 1) as f64;
        if !(0.0..=max_u).contains(&u) || !(0.0..=max_v).contains(&v) {
            return None;
        }

        let h = DERIVATIVE_STEP;
        let (intensity, depth) = self.raycast(u, v)?;
        let (i_right, z_right) = self.raycast(u + h, v)?;
        let (i_left, z_left) = self.raycast(u - h, v)?;
        let (i_down, z_down) = self.raycast(u, v + h)?;
        let (i_up, z_up) = self.raycast(u, v - h)?;

        Some(FrameSample {
            intensity,
            depth,
            intensity_gradient: Vector2::new(i_right - i_left, i_down - i_up) / (2.0 * h),
            depth_gradient: Vector2::new(z_right - z_left, z_down - z_up) / (2.0 * h),
        })
    }
}

/// Sampler that adds `offset` to the intensity once `threshold` samples have
/// been served. Makes every evaluation after the first one worse.
#[derive(Debug)]
pub struct OffsetAfter<F> {
    inner: F,
    threshold: usize,
    offset: f64,
    calls: AtomicUsize,
}

impl<F> OffsetAfter<F> {
    pub fn new(inner: F, threshold: usize) -> Self {
        Self {
            inner,
            threshold,
            offset: 1000.0,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

impl<F: FrameSampler> FrameSampler for OffsetAfter<F> {
    fn intrinsics(&self) -> &Intrinsics {
        self.inner.intrinsics()
    }

    fn sample(&self, u: f64, v: f64) -> Option<FrameSample> {
        let mut sample = self.inner.sample(u, v)?;
        if self.calls.fetch_add(1, Ordering::Relaxed) >= self.threshold {
            sample.intensity += self.offset;
        }
        Some(sample)
    }
}

/// Single-level pyramid around any sampler.
#[derive(Debug)]
pub struct AnalyticPyramid<F> {
    frame: F,
}

impl<F> AnalyticPyramid<F> {
    pub fn new(frame: F) -> Self {
        Self { frame }
    }

    pub fn into_frame(self) -> F {
        self.frame
    }
}

impl<F: FrameSampler> FramePyramid for AnalyticPyramid<F> {
    type Frame = F;

    fn compute(&mut self, num_levels: usize) -> Result<()> {
        if num_levels != 1 {
            bail!("analytic pyramid has a single level, {num_levels} requested");
        }
        Ok(())
    }

    fn level(&self, level: usize) -> &F {
        assert_eq!(level, 0, "analytic pyramid has a single level");
        &self.frame
    }

    fn num_levels(&self) -> usize {
        1
    }
}

/// Fixed reference points returned for every level.
#[derive(Debug, Clone, Default)]
pub struct StaticPointSource {
    points: Vec<ReferencePoint>,
}

impl StaticPointSource {
    pub fn new(points: Vec<ReferencePoint>) -> Self {
        Self { points }
    }

    /// Sample every `step`-th pixel of `frame` away from the border.
    pub fn from_frame<F: FrameSampler>(frame: &F, width: usize, height: usize, step: usize) -> Self {
        let k = *frame.intrinsics();
        let margin = 2;
        let mut points = Vec::new();
        for y in (margin..height.saturating_sub(margin)).step_by(step) {
            for x in (margin..width.saturating_sub(margin)).step_by(step) {
                let Some(sample) = frame.sample(x as f64, y as f64) else {
                    continue;
                };
                points.push(ReferencePoint {
                    point: k.back_project(x as f64, y as f64, sample.depth),
                    intensity: sample.intensity,
                    depth: sample.depth,
                    intensity_gradient: sample.intensity_gradient,
                    depth_gradient: sample.depth_gradient,
                });
            }
        }
        Self { points }
    }

    pub fn points(&self) -> &[ReferencePoint] {
        &self.points
    }

    pub fn points_mut(&mut self) -> &mut [ReferencePoint] {
        &mut self.points
    }
}

impl PointSource for StaticPointSource {
    fn prepare(&mut self, _num_levels: usize) -> Result<()> {
        Ok(())
    }

    fn maximum_number_of_points(&self, _level: usize) -> usize {
        self.points.len()
    }

    fn select(&mut self, _level: usize, _intrinsics: &Intrinsics) -> &[ReferencePoint] {
        &self.points
    }
}

/// Small camera motion (warp from reference to current camera) used across
/// tests: about 1.4 cm and 0.6 degrees.
pub fn ground_truth_motion() -> Isometry3<f64> {
    exp(&Twist::new(0.01, -0.005, 0.008, 0.005, -0.008, 0.004))
}

/// Reference points and an analytic current frame (80x60) for `motion`.
pub fn analytic_pair(
    scene: &PlanarScene,
    motion: &Isometry3<f64>,
) -> (StaticPointSource, AnalyticPyramid<AnalyticFrame>) {
    let (width, height) = (80, 60);
    let reference = scene.frame(width, height, &Isometry3::identity());
    let points = StaticPointSource::from_frame(&reference, width, height, 1);
    let current = scene.frame(width, height, motion);
    (points, AnalyticPyramid::new(current))
}
