//! Lazily built image pyramids.

use anyhow::{bail, Result};

use super::{FrameSampler, RgbdImage};

/// Coarse-to-fine access to a frame.
///
/// Level 0 is the full resolution; level `i + 1` has half the size of level `i`.
pub trait FramePyramid {
    type Frame: FrameSampler;

    /// Make sure levels `0..num_levels` exist. Idempotent.
    fn compute(&mut self, num_levels: usize) -> Result<()>;

    /// A computed level. Panics if `level` has not been computed.
    fn level(&self, level: usize) -> &Self::Frame;

    fn num_levels(&self) -> usize;
}

/// Pyramid of [`RgbdImage`]s built by repeated 2x2 downsampling.
#[derive(Debug, Clone)]
pub struct RgbdPyramid {
    levels: Vec<RgbdImage>,
}

impl RgbdPyramid {
    pub fn new(base: RgbdImage) -> Self {
        Self { levels: vec![base] }
    }

    pub fn base(&self) -> &RgbdImage {
        &self.levels[0]
    }
}

impl FramePyramid for RgbdPyramid {
    type Frame = RgbdImage;

    fn compute(&mut self, num_levels: usize) -> Result<()> {
        if num_levels == 0 {
            bail!("pyramid needs at least one level");
        }
        while self.levels.len() < num_levels {
            let next = self.levels[self.levels.len() - 1].downsample()?;
            self.levels.push(next);
        }
        Ok(())
    }

    fn level(&self, level: usize) -> &RgbdImage {
        assert!(
            level < self.levels.len(),
            "pyramid level {level} requested but only {} computed",
            self.levels.len()
        );
        &self.levels[level]
    }

    fn num_levels(&self) -> usize {
        self.levels.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::Intrinsics;

    fn flat_image(width: usize, height: usize) -> RgbdImage {
        let k = Intrinsics::new(200.0, 200.0, width as f64 / 2.0, height as f64 / 2.0);
        RgbdImage::new(
            width,
            height,
            vec![100.0; width * height],
            vec![2.0; width * height],
            k,
        )
        .unwrap()
    }

    #[test]
    fn test_compute_is_lazy_and_idempotent() {
        let mut pyramid = RgbdPyramid::new(flat_image(64, 48));
        assert_eq!(pyramid.num_levels(), 1);

        pyramid.compute(3).unwrap();
        assert_eq!(pyramid.num_levels(), 3);
        assert_eq!(pyramid.level(2).width(), 16);
        assert_eq!(pyramid.level(2).height(), 12);

        pyramid.compute(2).unwrap();
        assert_eq!(pyramid.num_levels(), 3);

        pyramid.compute(4).unwrap();
        assert_eq!(pyramid.level(3).width(), 8);
        assert!((pyramid.level(3).intrinsics().fx - 25.0).abs() < 1e-12);
    }

    #[test]
    fn test_compute_too_many_levels_fails() {
        let mut pyramid = RgbdPyramid::new(flat_image(8, 8));
        assert!(pyramid.compute(4).is_err());
    }

    #[test]
    #[should_panic(expected = "pyramid level 2 requested")]
    fn test_level_not_computed_panics() {
        let pyramid = RgbdPyramid::new(flat_image(8, 8));
        pyramid.level(2);
    }
}
