#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Per-tick scoring and session total accumulation.
//!
//! Scoring is a pure function of one tick's inputs: the captured reading,
//! the target, the allowed deviation, and the difficulty multiplier. A tick
//! with no captured reading scores zero; the engine never substitutes a
//! stale reading for a missed window.

use powermatch_core::{round1, Difficulty};

/// Scores a single tick.
///
/// Returns zero when no reading was captured, when the tolerance is not
/// positive, or when the reading deviates beyond the tolerance. An exact hit
/// (including a zero-target, zero-reading tick) earns the full
/// difficulty-scaled score; anything between scales linearly with the
/// deviation and is rounded to one decimal. Scores are never negative.
#[must_use]
pub fn score_tick(actual: Option<f64>, target: f64, tolerance: f64, difficulty: Difficulty) -> f64 {
    let Some(actual) = actual else {
        return 0.0;
    };
    if tolerance <= 0.0 {
        return 0.0;
    }
    let multiplier = difficulty.multiplier();
    if actual == target {
        return round1(multiplier);
    }
    let deviation = (actual - target).abs();
    if deviation > tolerance {
        return 0.0;
    }
    round1((1.0 - deviation / tolerance) * multiplier)
}

/// Accumulates tick scores into the rounded session total.
///
/// Kept separate from the engine so the summation and rounding contract can
/// be exercised without any timing in play. The reported total is always
/// `round(sum of accepted scores, 1)` and never decreases.
#[derive(Clone, Debug, Default)]
pub struct ScoreAggregator {
    sum: f64,
}

impl ScoreAggregator {
    /// Creates an empty aggregator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one tick score into the total and returns the rounded running
    /// total. Negative inputs are clamped to zero before accumulation.
    pub fn add(&mut self, tick_score: f64) -> f64 {
        self.sum += tick_score.max(0.0);
        self.total()
    }

    /// Rounded running total.
    #[must_use]
    pub fn total(&self) -> f64 {
        round1(self.sum)
    }
}
