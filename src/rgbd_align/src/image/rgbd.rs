//! Raster intensity + depth image with precomputed derivatives.

use anyhow::{bail, Result};
use nalgebra::Vector2;

use super::{FrameSample, FrameSampler, Intrinsics};

/// One resolution of a range-and-intensity frame.
///
/// Intensity is on a 0–255 scale, depth in metres. Invalid depth is stored as
/// `NaN`; derivatives touching an invalid or out-of-image neighbour are `NaN`
/// as well, so they never leak into interpolation.
#[derive(Debug, Clone)]
pub struct RgbdImage {
    width: usize,
    height: usize,
    intensity: Vec<f32>,
    depth: Vec<f32>,
    intensity_dx: Vec<f32>,
    intensity_dy: Vec<f32>,
    depth_dx: Vec<f32>,
    depth_dy: Vec<f32>,
    intrinsics: Intrinsics,
}

impl RgbdImage {
    /// Build an image from row-major buffers.
    ///
    /// Non-finite or non-positive depth values are treated as invalid.
    pub fn new(
        width: usize,
        height: usize,
        intensity: Vec<f32>,
        depth: Vec<f32>,
        intrinsics: Intrinsics,
    ) -> Result<Self> {
        if width < 2 || height < 2 {
            bail!("image must be at least 2x2, got {width}x{height}");
        }
        let pixels = width * height;
        if intensity.len() != pixels {
            bail!(
                "intensity buffer has {} values, expected {pixels}",
                intensity.len()
            );
        }
        if depth.len() != pixels {
            bail!("depth buffer has {} values, expected {pixels}", depth.len());
        }

        let depth: Vec<f32> = depth
            .into_iter()
            .map(|z| if z.is_finite() && z > 0.0 { z } else { f32::NAN })
            .collect();

        let (intensity_dx, intensity_dy) = central_differences(&intensity, width, height);
        let (depth_dx, depth_dy) = central_differences(&depth, width, height);

        Ok(Self {
            width,
            height,
            intensity,
            depth,
            intensity_dx,
            intensity_dy,
            depth_dx,
            depth_dy,
            intrinsics,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn num_pixels(&self) -> usize {
        self.width * self.height
    }

    #[inline]
    fn index(&self, x: usize, y: usize) -> usize {
        y * self.width + x
    }

    pub fn intensity_at(&self, x: usize, y: usize) -> f32 {
        self.intensity[self.index(x, y)]
    }

    pub fn depth_at(&self, x: usize, y: usize) -> f32 {
        self.depth[self.index(x, y)]
    }

    /// Values stored at an integer pixel.
    pub fn pixel(&self, x: usize, y: usize) -> FrameSample {
        let i = self.index(x, y);
        FrameSample {
            intensity: self.intensity[i] as f64,
            depth: self.depth[i] as f64,
            intensity_gradient: Vector2::new(self.intensity_dx[i] as f64, self.intensity_dy[i] as f64),
            depth_gradient: Vector2::new(self.depth_dx[i] as f64, self.depth_dy[i] as f64),
        }
    }

    /// Half-resolution copy: 2x2 box filter on intensity, mean of the valid
    /// depths, intrinsics scaled by 0.5.
    pub fn downsample(&self) -> Result<Self> {
        let width = self.width / 2;
        let height = self.height / 2;
        if width < 2 || height < 2 {
            bail!(
                "cannot downsample {}x{} image any further",
                self.width,
                self.height
            );
        }

        let mut intensity = Vec::with_capacity(width * height);
        let mut depth = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                let block = [
                    self.index(2 * x, 2 * y),
                    self.index(2 * x + 1, 2 * y),
                    self.index(2 * x, 2 * y + 1),
                    self.index(2 * x + 1, 2 * y + 1),
                ];
                intensity.push(block.iter().map(|&i| self.intensity[i]).sum::<f32>() * 0.25);

                let (sum, count) = block
                    .iter()
                    .map(|&i| self.depth[i])
                    .filter(|z| z.is_finite())
                    .fold((0.0_f32, 0_u32), |(s, c), z| (s + z, c + 1));
                depth.push(if count > 0 { sum / count as f32 } else { f32::NAN });
            }
        }

        Self::new(width, height, intensity, depth, self.intrinsics.scaled(0.5))
    }
}

impl FrameSampler for RgbdImage {
    fn intrinsics(&self) -> &Intrinsics {
        &self.intrinsics
    }

    fn sample(&self, u: f64, v: f64) -> Option<FrameSample> {
        // Bounds are checked before the cast; saturated indices would overflow.
        if !(u >= 0.0 && v >= 0.0 && u < (self.width - 1) as f64 && v < (self.height - 1) as f64) {
            return None;
        }
        let x0 = u.floor() as usize;
        let y0 = v.floor() as usize;

        let ax = u - x0 as f64;
        let ay = v - y0 as f64;
        let i00 = self.index(x0, y0);
        let i10 = i00 + 1;
        let i01 = i00 + self.width;
        let i11 = i01 + 1;

        let lerp = |buf: &[f32]| -> f64 {
            let top = buf[i00] as f64 * (1.0 - ax) + buf[i10] as f64 * ax;
            let bottom = buf[i01] as f64 * (1.0 - ax) + buf[i11] as f64 * ax;
            top * (1.0 - ay) + bottom * ay
        };

        let sample = FrameSample {
            intensity: lerp(&self.intensity),
            depth: lerp(&self.depth),
            intensity_gradient: Vector2::new(lerp(&self.intensity_dx), lerp(&self.intensity_dy)),
            depth_gradient: Vector2::new(lerp(&self.depth_dx), lerp(&self.depth_dy)),
        };

        sample.is_finite().then_some(sample)
    }
}

/// Central differences `0.5 (f(x+1) - f(x-1))`; `NaN` on the border.
fn central_differences(values: &[f32], width: usize, height: usize) -> (Vec<f32>, Vec<f32>) {
    let mut dx = vec![f32::NAN; values.len()];
    let mut dy = vec![f32::NAN; values.len()];

    for y in 0..height {
        for x in 0..width {
            let i = y * width + x;
            if x > 0 && x + 1 < width {
                dx[i] = 0.5 * (values[i + 1] - values[i - 1]);
            }
            if y > 0 && y + 1 < height {
                dy[i] = 0.5 * (values[i + width] - values[i - width]);
            }
        }
    }

    (dx, dy)
}
