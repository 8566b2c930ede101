#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Deterministic target-curve generation and tolerance scheduling.
//!
//! The generator is a pure function of `(seed, difficulty, duration)`: it
//! draws every sample from a locally owned ChaCha8 stream seeded from the
//! explicit session seed, so concurrent sessions can generate curves in
//! parallel without perturbing one another and any curve can be replayed
//! from its seed.

use powermatch_core::{round1, Difficulty, SIGNAL_CEILING, SIGNAL_FLOOR};
use rand::distributions::{Distribution, WeightedIndex};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Cluster lengths the generator samples from, favouring short runs.
const CLUSTER_LENGTHS: [u32; 4] = [2, 3, 4, 5];
const CLUSTER_WEIGHTS: [u32; 4] = [4, 3, 2, 1];

/// Every `SPIKE_INTERVAL` ticks the sampled step is amplified so each
/// session carries guaranteed difficulty spikes regardless of random luck.
const SPIKE_INTERVAL: u32 = 10;
const SPIKE_FACTOR: f64 = 2.0;

/// Width of the windows the low/high guarantee pass may rewrite, and the
/// value bands it writes into them.
const GUARANTEE_WINDOW: u32 = 10;
const LOW_REGIME_MAX: f64 = 20.0;
const HIGH_REGIME_MIN: f64 = 120.0;
const FORCED_LOW_MIN: f64 = 5.0;
const FORCED_HIGH_MAX: f64 = SIGNAL_CEILING;

/// Difficulty-specific generation parameters.
#[derive(Clone, Copy, Debug)]
struct CurveProfile {
    /// Band the opening value is drawn from.
    base_min: f64,
    base_max: f64,
    /// Step magnitude at the first tick.
    min_delta: f64,
    /// Step magnitude reached at the final tick.
    max_delta: f64,
}

impl CurveProfile {
    const fn of(difficulty: Difficulty) -> Self {
        match difficulty {
            Difficulty::Easy => Self {
                base_min: 30.0,
                base_max: 70.0,
                min_delta: 8.0,
                max_delta: 25.0,
            },
            Difficulty::Medium => Self {
                base_min: 25.0,
                base_max: 85.0,
                min_delta: 12.0,
                max_delta: 40.0,
            },
            Difficulty::Hard => Self {
                base_min: 20.0,
                base_max: 100.0,
                min_delta: 18.0,
                max_delta: 60.0,
            },
        }
    }
}

/// Generates the target curve for one session.
///
/// Identical `(seed, difficulty, duration)` inputs always yield an identical
/// sequence. Every value lies in `[SIGNAL_FLOOR, SIGNAL_CEILING]` rounded to
/// one decimal, and for `duration >= 20` the sequence is guaranteed to visit
/// both the low (`<= 20`) and high (`>= 120`) signal regimes.
#[must_use]
pub fn generate(seed: u64, difficulty: Difficulty, duration: u32) -> Vec<f64> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let profile = CurveProfile::of(difficulty);

    if duration == 0 {
        return Vec::new();
    }

    let mut value = round1(rng.gen_range(profile.base_min..=profile.base_max));
    let mut curve = Vec::with_capacity(duration as usize);
    curve.push(value);

    if duration == 1 {
        return curve;
    }

    let cluster_lengths =
        WeightedIndex::new(CLUSTER_WEIGHTS).expect("cluster weights are non-zero");

    while (curve.len() as u32) < duration {
        let tick = curve.len() as u32;
        let remaining = duration - tick;
        let cluster = CLUSTER_LENGTHS[cluster_lengths.sample(&mut rng)].min(remaining);

        let progress = f64::from(tick) / f64::from(duration - 1);
        let mut magnitude =
            profile.min_delta + (profile.max_delta - profile.min_delta) * progress;
        if tick % SPIKE_INTERVAL == 0 {
            magnitude *= SPIKE_FACTOR;
        }

        let step = if rng.gen_bool(0.5) { magnitude } else { -magnitude };
        value = round1((value + step).clamp(SIGNAL_FLOOR, SIGNAL_CEILING));

        for _ in 0..cluster {
            curve.push(value);
        }
    }

    force_regimes(&mut curve, &mut rng, duration);
    curve
}

/// Rewrites one early tick to a low value and one late tick to a high value
/// when random chance produced neither, so every session exercises both
/// signal regimes.
///
/// The low regime is re-checked after the high write: when the curve's only
/// low values sat inside the trailing window, the forced high may have
/// consumed them. The forced windows are disjoint for `duration >= 20`, so
/// the second pass always converges there.
fn force_regimes(curve: &mut [f64], rng: &mut ChaCha8Rng, duration: u32) {
    force_low(curve, rng, duration);
    if !curve.iter().any(|value| *value >= HIGH_REGIME_MIN) {
        let first = duration.saturating_sub(GUARANTEE_WINDOW);
        let index = rng.gen_range(first..duration) as usize;
        curve[index] = round1(rng.gen_range(HIGH_REGIME_MIN..=FORCED_HIGH_MAX));
    }
    force_low(curve, rng, duration);
}

fn force_low(curve: &mut [f64], rng: &mut ChaCha8Rng, duration: u32) {
    if !curve.iter().any(|value| *value <= LOW_REGIME_MAX) {
        let window = GUARANTEE_WINDOW.min(duration);
        let index = rng.gen_range(0..window) as usize;
        curve[index] = round1(rng.gen_range(FORCED_LOW_MIN..=LOW_REGIME_MAX));
    }
}

/// Per-tick allowed deviation from the target, interpolated by difficulty.
///
/// Harder difficulties run a strictly lower band, and every session tightens
/// linearly from `start` at tick 0 to `end` at the final tick. The schedule
/// is deterministic and draws no randomness.
#[derive(Clone, Copy, Debug)]
pub struct ToleranceSchedule {
    start: f64,
    end: f64,
    duration: u32,
}

impl ToleranceSchedule {
    /// Builds the schedule for one session.
    #[must_use]
    pub const fn new(difficulty: Difficulty, duration: u32) -> Self {
        let (start, end) = match difficulty {
            Difficulty::Easy => (16.0, 10.0),
            Difficulty::Medium => (11.0, 7.0),
            Difficulty::Hard => (7.0, 4.0),
        };
        Self {
            start,
            end,
            duration,
        }
    }

    /// Tolerance at the start of the session.
    #[must_use]
    pub const fn start(&self) -> f64 {
        self.start
    }

    /// Tolerance at the final tick of the session.
    #[must_use]
    pub const fn end(&self) -> f64 {
        self.end
    }

    /// Allowed deviation at the given tick, rounded to one decimal.
    ///
    /// Ticks at or beyond the session duration clamp to the end tolerance.
    #[must_use]
    pub fn tolerance_at(&self, tick: u32) -> f64 {
        if self.duration <= 1 {
            return self.start;
        }
        if tick >= self.duration {
            return self.end;
        }
        let progress = f64::from(tick) / f64::from(self.duration - 1);
        round1(self.start + (self.end - self.start) * progress)
    }

    /// Materialises the full per-tick tolerance sequence.
    #[must_use]
    pub fn curve(&self) -> Vec<f64> {
        (0..self.duration).map(|tick| self.tolerance_at(tick)).collect()
    }
}
