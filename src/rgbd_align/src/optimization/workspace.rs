//! Scratch buffers reused across iterations and alignments.

use crate::kernels::PointError;

/// Per-tracker scratch memory.
///
/// Sized once for the finest level's point budget so that iterations never
/// reallocate.
#[derive(Debug, Default)]
pub struct AlignmentWorkspace {
    pub errors: Vec<PointError>,
    pub weights: Vec<f64>,
}

impl AlignmentWorkspace {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            errors: Vec::with_capacity(capacity),
            weights: Vec::with_capacity(capacity),
        }
    }

    /// Grow both buffers to hold at least `capacity` points.
    pub fn reserve(&mut self, capacity: usize) {
        self.errors.clear();
        self.weights.clear();
        self.errors.reserve(capacity);
        self.weights.reserve(capacity);
    }

    pub fn capacity(&self) -> usize {
        self.errors.capacity().min(self.weights.capacity())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_grows_and_clears() {
        let mut ws = AlignmentWorkspace::with_capacity(4);
        ws.weights.push(1.0);

        ws.reserve(100);
        assert!(ws.capacity() >= 100);
        assert!(ws.weights.is_empty());

        ws.reserve(10);
        assert!(ws.capacity() >= 100);
    }
}
