//! Rigid-motion utilities on SE(3).

pub mod se3;

pub use se3::{exp, log, pose_error, skew, Twist};
