//! Reference point selection.
//!
//! Picks the pixels of the reference frame that carry enough intensity or
//! depth structure to constrain the alignment and lifts them to 3D.

use nalgebra::{Point3, Vector2};
use serde::{Deserialize, Serialize};

use crate::image::{FramePyramid, FrameSample, Intrinsics, RgbdPyramid};

/// A reference-frame pixel lifted to 3D, with its observations and gradients.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReferencePoint {
    /// Position in the reference camera frame.
    pub point: Point3<f64>,
    pub intensity: f64,
    pub depth: f64,
    /// Intensity derivative in pixel units.
    pub intensity_gradient: Vector2<f64>,
    /// Depth derivative in pixel units.
    pub depth_gradient: Vector2<f64>,
}

/// Gradient-magnitude test deciding whether a pixel is usable.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SelectionPredicate {
    pub intensity_threshold: f64,
    pub depth_threshold: f64,
}

impl SelectionPredicate {
    pub fn new(intensity_threshold: f64, depth_threshold: f64) -> Self {
        Self {
            intensity_threshold,
            depth_threshold,
        }
    }

    pub fn is_valid(&self, sample: &FrameSample) -> bool {
        if !sample.is_finite() {
            return false;
        }
        let di = sample.intensity_gradient.amax();
        let dz = sample.depth_gradient.amax();
        di > self.intensity_threshold || dz > self.depth_threshold
    }
}

/// Provider of reference points per pyramid level.
pub trait PointSource {
    /// Make levels `0..num_levels` available.
    fn prepare(&mut self, num_levels: usize) -> anyhow::Result<()>;

    /// Upper bound on the number of points `select` can return for `level`.
    fn maximum_number_of_points(&self, level: usize) -> usize;

    /// Selected points of `level`, back-projected with `intrinsics`.
    fn select(&mut self, level: usize, intrinsics: &Intrinsics) -> &[ReferencePoint];
}

/// [`PointSource`] over a reference [`RgbdPyramid`]; selections are cached
/// per level.
#[derive(Debug, Clone)]
pub struct PointSelection {
    pyramid: RgbdPyramid,
    predicate: SelectionPredicate,
    cache: Vec<Option<Vec<ReferencePoint>>>,
}

impl PointSelection {
    pub fn new(pyramid: RgbdPyramid, predicate: SelectionPredicate) -> Self {
        Self {
            pyramid,
            predicate,
            cache: Vec::new(),
        }
    }

    pub fn pyramid(&self) -> &RgbdPyramid {
        &self.pyramid
    }

    pub fn predicate(&self) -> &SelectionPredicate {
        &self.predicate
    }

    /// Replace the predicate, dropping cached selections.
    pub fn set_predicate(&mut self, predicate: SelectionPredicate) {
        if predicate != self.predicate {
            self.predicate = predicate;
            self.cache.clear();
        }
    }
}

impl PointSource for PointSelection {
    fn prepare(&mut self, num_levels: usize) -> anyhow::Result<()> {
        self.pyramid.compute(num_levels)
    }

    fn maximum_number_of_points(&self, level: usize) -> usize {
        self.pyramid.level(level).num_pixels()
    }

    fn select(&mut self, level: usize, intrinsics: &Intrinsics) -> &[ReferencePoint] {
        if self.cache.len() <= level {
            self.cache.resize(level + 1, None);
        }

        let pyramid = &self.pyramid;
        let predicate = self.predicate;
        self.cache[level].get_or_insert_with(|| {
            let image = pyramid.level(level);
            let mut points = Vec::new();
            for y in 0..image.height() {
                for x in 0..image.width() {
                    let sample = image.pixel(x, y);
                    if !predicate.is_valid(&sample) {
                        continue;
                    }
                    points.push(ReferencePoint {
                        point: intrinsics.back_project(x as f64, y as f64, sample.depth),
                        intensity: sample.intensity,
                        depth: sample.depth,
                        intensity_gradient: sample.intensity_gradient,
                        depth_gradient: sample.depth_gradient,
                    });
                }
            }
            tracing::debug!(level, selected = points.len(), "selected reference points");
            points
        })
        .as_slice()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{FrameSampler, RgbdImage};
    use approx::assert_relative_eq;

    fn step_image() -> RgbdImage {
        // Vertical intensity edge at x = 8, constant depth 2 m.
        let (w, h) = (16, 12);
        let intensity = (0..w * h)
            .map(|i| if i % w < 8 { 50.0 } else { 150.0 })
            .collect();
        let k = Intrinsics::new(100.0, 100.0, 8.0, 6.0);
        RgbdImage::new(w, h, intensity, vec![2.0; w * h], k).unwrap()
    }

    #[test]
    fn test_predicate_thresholds() {
        let mut sample = FrameSample {
            intensity: 10.0,
            depth: 1.0,
            intensity_gradient: Vector2::new(0.0, -3.0),
            depth_gradient: Vector2::new(0.0, 0.0),
        };
        assert!(SelectionPredicate::new(2.0, 0.0).is_valid(&sample));
        assert!(!SelectionPredicate::new(3.0, 0.0).is_valid(&sample));

        sample.depth = f64::NAN;
        assert!(!SelectionPredicate::new(0.0, 0.0).is_valid(&sample));
    }

    #[test]
    fn test_select_keeps_edge_pixels_only() {
        let mut selection =
            PointSelection::new(RgbdPyramid::new(step_image()), SelectionPredicate::new(1.0, 0.0));
        selection.prepare(1).unwrap();
        let k = *selection.pyramid().base().intrinsics();

        let points = selection.select(0, &k);
        // Columns 7 and 8 straddle the edge; rows 1..=10 have finite derivatives.
        assert_eq!(points.len(), 2 * 10);
        for p in points {
            assert_relative_eq!(p.point.z, 2.0);
            assert_relative_eq!(p.intensity_gradient.x, 50.0, epsilon = 1e-6);
        }

        let first = points[0];
        assert_relative_eq!(first.point.x, (7.0 - 8.0) * 2.0 / 100.0, epsilon = 1e-12);
        assert_relative_eq!(first.point.y, (1.0 - 6.0) * 2.0 / 100.0, epsilon = 1e-12);
    }

    #[test]
    fn test_select_is_cached_and_predicate_change_invalidates() {
        let mut selection =
            PointSelection::new(RgbdPyramid::new(step_image()), SelectionPredicate::new(1.0, 0.0));
        selection.prepare(2).unwrap();
        let k = *selection.pyramid().level(1).intrinsics();

        let n = selection.select(1, &k).len();
        assert_eq!(selection.select(1, &k).len(), n);

        selection.set_predicate(SelectionPredicate::new(1e6, 1e6));
        assert!(selection.select(1, &k).is_empty());
        assert_eq!(selection.maximum_number_of_points(1), 8 * 6);
    }
}
