//! Dense RGB-D frame-to-frame alignment.
//!
//! Estimates the rigid motion between two range-and-intensity frames by
//! directly minimizing intensity and depth residuals over every informative
//! pixel, coarse to fine, with outlier-robust weighting.
//!
//! # Architecture
//!
//! The alignment is split into phases:
//! - Phase 1: Pyramid construction and reference point selection
//! - Phase 2: Residual evaluation against the current frame
//! - Phase 3: Robust weighting (IRLS with a t-distribution by default)
//! - Phase 4: Damped Gauss-Newton step with accept/reject on SE(3)
//!
//! # Usage
//!
//! ```ignore
//! use rgbd_align::{Config, DenseTracker, Intrinsics, RgbdImage, RgbdPyramid};
//! use nalgebra::Isometry3;
//!
//! let camera = Intrinsics::new(525.0, 525.0, 319.5, 239.5);
//! let reference = RgbdImage::new(640, 480, gray0, depth0, camera)?;
//! let current = RgbdImage::new(640, 480, gray1, depth1, camera)?;
//!
//! let mut tracker = DenseTracker::new(Config::default());
//! let result = tracker.align_images(
//!     RgbdPyramid::new(reference),
//!     &mut RgbdPyramid::new(current),
//!     &Isometry3::identity(),
//! )?;
//! println!("{}", result.statistics.to_log());
//! ```

pub mod error;
pub mod geometry;
pub mod image;
pub mod kernels;
pub mod optimization;
pub mod revertable;
pub mod selection;
pub mod test_utils;
pub mod timing;
pub mod weighting;

pub use error::AlignError;
pub use geometry::{exp, log, pose_error, Twist};
pub use image::{FramePyramid, FrameSample, FrameSampler, Intrinsics, RgbdImage, RgbdPyramid};
pub use kernels::{ChannelWeights, PointError};
pub use optimization::{
    AlignmentResult, Config, ConfigError, DenseTracker, IterationStats, LevelStats, Statistics,
    TerminationCriterion,
};
pub use revertable::Revertable;
pub use selection::{PointSelection, PointSource, ReferencePoint, SelectionPredicate};
pub use timing::{AlignmentTiming, IterationTiming};
pub use weighting::{InfluenceFunction, ScaleEstimator, WeightCalculation};
