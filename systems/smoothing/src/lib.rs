#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Rolling-mean smoothing for the raw power signal.
//!
//! The raw external signal is noisy enough that feeding instantaneous
//! readings into the engine produces unplayable jitter. The smoother keeps a
//! bounded FIFO of recent readings, clamps each one into the physical sensor
//! range, and hands the engine the window mean instead.

use std::collections::VecDeque;

use powermatch_core::{round2, SIGNAL_CEILING, SIGNAL_FLOOR};

/// Number of readings retained by default.
pub const DEFAULT_WINDOW: usize = 5;

/// Bounded sliding-window smoother over raw sensor readings.
#[derive(Clone, Debug)]
pub struct InputSmoother {
    window: VecDeque<f64>,
    capacity: usize,
}

impl InputSmoother {
    /// Creates a smoother with the default window of [`DEFAULT_WINDOW`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_WINDOW)
    }

    /// Creates a smoother retaining up to `capacity` readings. A capacity of
    /// zero is raised to one so the smoother always has a mean to report.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Clamps `raw` into the sensor range, folds it into the window, and
    /// returns the current window mean rounded to two decimals.
    ///
    /// Never blocks; evicting the oldest reading keeps the call O(1)
    /// amortised.
    pub fn push(&mut self, raw: f64) -> f64 {
        let clamped = raw.clamp(SIGNAL_FLOOR, SIGNAL_CEILING);
        if self.window.len() == self.capacity {
            let _ = self.window.pop_front();
        }
        self.window.push_back(clamped);
        let sum: f64 = self.window.iter().sum();
        round2(sum / self.window.len() as f64)
    }
}

impl Default for InputSmoother {
    fn default() -> Self {
        Self::new()
    }
}
