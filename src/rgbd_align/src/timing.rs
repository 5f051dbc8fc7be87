//! Phase timing for profiling.
//!
//! Timings are collected only when the `profiling` feature is enabled.
//! Without the feature, the collector and [`time_phase!`] compile to no-ops.

use serde::{Deserialize, Serialize};
#[cfg(feature = "profiling")]
use std::time::Instant;

/// Timing breakdown of one alignment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlignmentTiming {
    pub total_ms: f64,
    /// Residual evaluation (warp + sampling).
    pub residuals_ms: f64,
    /// Weight and scale estimation.
    pub weights_ms: f64,
    /// Normal equation accumulation.
    pub normal_equations_ms: f64,
    /// Damped solve.
    pub solver_ms: f64,
    pub iterations: Vec<IterationTiming>,
}

/// Timing of one iteration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IterationTiming {
    pub level: usize,
    pub iteration: usize,
    pub total_ms: f64,
    pub residuals_ms: f64,
    pub weights_ms: f64,
    pub normal_equations_ms: f64,
    pub solver_ms: f64,
}

/// Timer that can be enabled/disabled at compile time.
#[cfg(feature = "profiling")]
pub struct Timer {
    start: Instant,
}

#[cfg(feature = "profiling")]
impl Timer {
    #[inline]
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    #[inline]
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

/// Collector for timing data during alignment.
#[cfg(feature = "profiling")]
#[derive(Debug, Default)]
pub struct TimingCollector {
    alignment_start: Option<Instant>,
    iteration_start: Option<Instant>,
    current: IterationTiming,
    timing: AlignmentTiming,
}

#[cfg(feature = "profiling")]
impl TimingCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_alignment(&mut self) {
        self.alignment_start = Some(Instant::now());
        self.timing = AlignmentTiming::default();
    }

    pub fn start_iteration(&mut self, level: usize, iteration: usize) {
        self.iteration_start = Some(Instant::now());
        self.current = IterationTiming {
            level,
            iteration,
            ..Default::default()
        };
    }

    pub fn record_phase(&mut self, phase: &str, duration_ms: f64) {
        match phase {
            "residuals" => {
                self.current.residuals_ms += duration_ms;
                self.timing.residuals_ms += duration_ms;
            }
            "weights" => {
                self.current.weights_ms += duration_ms;
                self.timing.weights_ms += duration_ms;
            }
            "normal_equations" => {
                self.current.normal_equations_ms += duration_ms;
                self.timing.normal_equations_ms += duration_ms;
            }
            "solver" => {
                self.current.solver_ms += duration_ms;
                self.timing.solver_ms += duration_ms;
            }
            _ => {}
        }
    }

    pub fn end_iteration(&mut self) {
        self.current.total_ms = self
            .iteration_start
            .map(|s| s.elapsed().as_secs_f64() * 1000.0)
            .unwrap_or(0.0);
        self.timing.iterations.push(std::mem::take(&mut self.current));
    }

    /// Finished timing, or `None` when profiling is disabled.
    pub fn finish(&mut self) -> Option<AlignmentTiming> {
        self.timing.total_ms = self
            .alignment_start
            .map(|s| s.elapsed().as_secs_f64() * 1000.0)
            .unwrap_or(0.0);
        Some(std::mem::take(&mut self.timing))
    }
}

/// No-op collector when profiling is disabled.
#[cfg(not(feature = "profiling"))]
#[derive(Debug, Default)]
pub struct TimingCollector;

#[cfg(not(feature = "profiling"))]
impl TimingCollector {
    #[inline(always)]
    pub fn new() -> Self {
        Self
    }

    #[inline(always)]
    pub fn start_alignment(&mut self) {}

    #[inline(always)]
    pub fn start_iteration(&mut self, _level: usize, _iteration: usize) {}

    #[inline(always)]
    pub fn record_phase(&mut self, _phase: &str, _duration_ms: f64) {}

    #[inline(always)]
    pub fn end_iteration(&mut self) {}

    #[inline(always)]
    pub fn finish(&mut self) -> Option<AlignmentTiming> {
        None
    }
}

/// Time a block of code as one phase.
///
/// ```ignore
/// let n = time_phase!(collector, "residuals", {
///     compute_residuals(points, frame, &transform, &weights, &mut errors)
/// });
/// ```
#[macro_export]
macro_rules! time_phase {
    ($collector:expr, $phase:expr, $block:expr) => {{
        #[cfg(feature = "profiling")]
        let _timer = $crate::timing::Timer::new();

        let result = $block;

        #[cfg(feature = "profiling")]
        $collector.record_phase($phase, _timer.elapsed_ms());

        result
    }};
}
