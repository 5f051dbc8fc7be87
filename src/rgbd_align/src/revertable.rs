//! Value holder with a single level of rollback.

use std::ops::Deref;

/// Holds a value together with the value it had before the last update.
///
/// `update()` hands out a writable slot for the proposed next value and
/// remembers the previous one; `revert()` restores it. Only one level of
/// rollback is kept, so two reverts need an update in between.
#[derive(Debug, Clone, PartialEq)]
pub struct Revertable<T: Clone> {
    value: T,
    previous: Option<T>,
}

impl<T: Clone> Revertable<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            previous: None,
        }
    }

    /// The current value.
    #[inline]
    pub fn current(&self) -> &T {
        &self.value
    }

    /// Begin an update. The returned slot starts as a copy of the current value.
    pub fn update(&mut self) -> &mut T {
        self.previous = Some(self.value.clone());
        &mut self.value
    }

    /// Restore the value from before the last `update()`.
    ///
    /// Reverting without a pending update is a caller bug; it panics in debug
    /// builds and leaves the value untouched otherwise.
    pub fn revert(&mut self) {
        debug_assert!(self.previous.is_some(), "revert() without a prior update()");
        if let Some(previous) = self.previous.take() {
            self.value = previous;
        }
    }

    /// Whether an update can currently be reverted.
    pub fn has_pending(&self) -> bool {
        self.previous.is_some()
    }
}

impl<T: Clone + Default> Default for Revertable<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: Clone> Deref for Revertable<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}
