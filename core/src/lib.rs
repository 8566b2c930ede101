#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Core contracts shared across the PowerMatch engine.
//!
//! This crate defines the surface that connects the ingestion adapters, the
//! session engine, and the persistence adapter. Adapters hand smoothed power
//! readings to the engine, the engine drives one scoring state machine per
//! connection, and every observable effect leaves the engine through one of
//! two narrow seams declared here: [`BroadcastSink`] for live client frames
//! and [`ScoreStore`] for finished session records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Lowest value the power signal can take, in watts.
pub const SIGNAL_FLOOR: f64 = 0.0;

/// Highest value the power signal can take, in watts.
///
/// Raw sensor readings outside `[SIGNAL_FLOOR, SIGNAL_CEILING]` are clamped,
/// never rejected, and generated target curves stay inside the same band.
pub const SIGNAL_CEILING: f64 = 135.0;

/// Number of one-second scoring ticks in a session unless configured otherwise.
pub const DEFAULT_SESSION_TICKS: u32 = 30;

/// Rounds a value to one decimal place for score and curve display stability.
#[must_use]
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Rounds a value to two decimal places for smoothed reading display stability.
#[must_use]
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Difficulty level selected by the player for one session.
///
/// The enum is closed on purpose: every multiplier and tolerance lookup is an
/// exhaustive match, so a new difficulty cannot silently inherit fallback
/// behaviour. Inbound requests carrying an unrecognised difficulty string are
/// normalised to [`Difficulty::Medium`] at the boundary, before any lookup.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Difficulty {
    /// Widest tolerance band, base score multiplier.
    Easy,
    /// Mid tolerance band, 1.5x score multiplier.
    #[default]
    Medium,
    /// Tightest tolerance band, 2x score multiplier.
    Hard,
}

impl Difficulty {
    /// Score multiplier applied to every tick scored at this difficulty.
    #[must_use]
    pub const fn multiplier(self) -> f64 {
        match self {
            Self::Easy => 1.0,
            Self::Medium => 1.5,
            Self::Hard => 2.0,
        }
    }

    /// Canonical label used on the wire and in persisted records.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Easy => "Easy",
            Self::Medium => "Medium",
            Self::Hard => "Hard",
        }
    }

    /// Parses a canonical label back into a difficulty.
    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "Easy" => Some(Self::Easy),
            "Medium" => Some(Self::Medium),
            "Hard" => Some(Self::Hard),
            _ => None,
        }
    }
}

/// Unique identifier assigned to a live client connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new connection identifier with the provided numeric value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Retrieves the numeric representation of the identifier.
    #[must_use]
    pub const fn get(&self) -> u64 {
        self.0
    }
}

/// Inbound request that starts a session on an attached connection.
///
/// Shape on the wire: `{"name": string, "difficulty": "Easy"|"Medium"|"Hard"}`.
/// A missing name becomes `"Unknown"`; a missing or unrecognised difficulty
/// becomes [`Difficulty::Medium`].
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct SessionRequest {
    /// Display name of the player starting the session.
    #[serde(default = "default_player_name")]
    pub name: String,
    /// Requested difficulty, normalised from the raw wire string.
    #[serde(default, deserialize_with = "difficulty_or_default")]
    pub difficulty: Difficulty,
}

fn default_player_name() -> String {
    "Unknown".to_owned()
}

fn difficulty_or_default<'de, D>(deserializer: D) -> Result<Difficulty, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    Ok(Difficulty::from_label(&raw).unwrap_or_default())
}

/// First frame sent on a connection when its session starts.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct InitFrame {
    /// Full target curve the player will try to match, one value per tick.
    #[serde(rename = "targetCurve")]
    pub target_curve: Vec<f64>,
    /// Allowed deviation from the target, one value per tick.
    #[serde(rename = "toleranceCurve")]
    pub tolerance_curve: Vec<f64>,
    /// Difficulty the session was started at.
    pub difficulty: Difficulty,
    /// Seed the target curve was generated from, for replay.
    pub seed: u64,
    /// Session length in ticks.
    pub duration: u32,
    /// Wall-clock session start as unix epoch seconds. Display only; the
    /// engine never uses wall time for tick indexing.
    pub start_time: f64,
}

/// Frame sent after each scored tick.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TickFrame {
    /// Zero-based index of the tick that was just scored.
    pub second: u32,
    /// Smoothed reading captured in the tick's window, if any arrived.
    pub actual: Option<f64>,
    /// Target value for the tick.
    pub target: f64,
    /// Allowed deviation for the tick.
    pub tolerance: f64,
    /// Score awarded for the tick.
    #[serde(rename = "tickScore")]
    pub tick_score: f64,
    /// Rounded running session total after the tick.
    #[serde(rename = "totalScore")]
    pub total_score: f64,
}

/// Final frame sent when a session completes all of its ticks.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EndFrame {
    /// Final rounded session total.
    #[serde(rename = "totalScore")]
    pub total_score: f64,
    /// Every reading captured during the session, slot per tick.
    pub actual: Vec<Option<f64>>,
    /// The target curve the session was played against.
    #[serde(rename = "targetCurve")]
    pub target_curve: Vec<f64>,
    /// Seed the target curve was generated from.
    pub seed: u64,
    /// Difficulty the session was played at.
    pub difficulty: Difficulty,
    /// Display name of the player.
    pub player: String,
}

/// Tagged union of every frame the engine broadcasts.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum WireFrame {
    /// Session started; carries the full curves and replay seed.
    #[serde(rename = "init")]
    Init(InitFrame),
    /// One tick was scored.
    #[serde(rename = "tick")]
    Tick(TickFrame),
    /// Session completed.
    #[serde(rename = "end")]
    End(EndFrame),
}

/// Failure raised by a [`BroadcastSink`] when a frame cannot be delivered.
///
/// Sink failures are caught per send: the owning connection is torn down and
/// no other session is affected.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The receiving side of the connection is gone.
    #[error("broadcast connection closed")]
    Closed,
    /// The transport rejected the frame.
    #[error("broadcast transport failure: {0}")]
    Transport(String),
}

/// Narrow outbound seam between a session engine and its client transport.
///
/// One sink belongs to exactly one connection. Implementations must not
/// block the caller; queueing into a channel and letting the transport drain
/// it is the expected shape.
pub trait BroadcastSink: Send {
    /// Delivers the session-start frame.
    fn send_init(&mut self, frame: &InitFrame) -> Result<(), SinkError>;

    /// Delivers a per-tick frame. Called in strictly increasing tick order.
    fn send_tick(&mut self, frame: &TickFrame) -> Result<(), SinkError>;

    /// Delivers the session-end frame.
    fn send_end(&mut self, frame: &EndFrame) -> Result<(), SinkError>;
}

/// One finished session as handed to the persistence collaborator.
#[derive(Clone, Debug, PartialEq)]
pub struct ScoreRecord {
    /// Display name of the player.
    pub name: String,
    /// Difficulty the session was played at.
    pub difficulty: Difficulty,
    /// Final rounded session total.
    pub score: f64,
    /// Seed the target curve was generated from.
    pub seed: u64,
    /// Wall-clock completion time.
    pub timestamp: DateTime<Utc>,
}

/// Failure raised by a [`ScoreStore`] backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The storage backend rejected the operation.
    #[error("score store backend failure: {0}")]
    Backend(String),
}

/// Persistence collaborator for finished sessions and leaderboard queries.
///
/// The engine hands each completed session to `save` exactly once. A failed
/// save is surfaced to the engine's caller together with the unsaved record;
/// it is never swallowed.
pub trait ScoreStore: Send + Sync {
    /// Persists one finished session.
    fn save(&self, record: &ScoreRecord) -> Result<(), StoreError>;

    /// Returns up to `limit` records, best score first, across all time.
    fn top_all_time(&self, limit: u32) -> Result<Vec<ScoreRecord>, StoreError>;

    /// Returns up to `limit` records from the trailing `hours` hours, best
    /// score first.
    fn top_recent(&self, hours: u32, limit: u32) -> Result<Vec<ScoreRecord>, StoreError>;
}
