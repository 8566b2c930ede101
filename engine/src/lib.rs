#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Authoritative session state management for PowerMatch.
//!
//! One [`SessionEngine`] owns the full state of one play-through: the
//! immutable curves generated at start, the per-tick reading slots, the
//! append-only tick scores, and the `Idle -> Running -> Completed` state
//! machine. The engine itself is synchronous and clock-agnostic: callers
//! pass monotonic instants in, which keeps every transition directly
//! testable. The timer-driven task that drives `advance` once per elapsed
//! second, and the registry that fans readings out to concurrent sessions,
//! live in [`registry`].

pub mod registry;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use powermatch_core::{
    BroadcastSink, ConnectionId, Difficulty, EndFrame, InitFrame, ScoreRecord, ScoreStore,
    SinkError, StoreError, TickFrame,
};
use powermatch_system_curve::{generate, ToleranceSchedule};
use powermatch_system_scoring::{score_tick, ScoreAggregator};
use thiserror::Error;
use tokio::time::Instant;

/// Wall-clock period of one scoring tick.
pub const TICK_PERIOD: Duration = Duration::from_secs(1);

/// Lifecycle state of a session. There is no transition back to `Idle`;
/// playing again means attaching a fresh engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Attached but not started.
    Idle,
    /// The tick loop is live.
    Running,
    /// All ticks scored; terminal.
    Completed,
}

/// Fatal failures that tear down one session task.
///
/// Everything else the engine encounters (malformed input, protocol misuse,
/// out-of-window readings) is logged and absorbed without leaving `Running`.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A broadcast frame could not be delivered; the connection is torn down.
    #[error("broadcast send failed: {0}")]
    Broadcast(#[from] SinkError),
    /// The finished record could not be persisted. The record rides along so
    /// the caller can retry or report it; it is never silently dropped.
    #[error("failed to persist completed session for {}", .record.name)]
    Persistence {
        /// The finished record that was not saved.
        record: ScoreRecord,
        /// Backend failure that rejected the save.
        #[source]
        source: StoreError,
    },
}

/// Result of one tick-loop step.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TickOutcome {
    /// One more tick was scored; the session continues.
    Scored {
        /// Index of the tick that was scored.
        tick: u32,
    },
    /// The final tick was scored; the session is complete and persisted.
    Finished {
        /// Final rounded session total.
        total: f64,
    },
    /// The engine was not running; nothing happened.
    Ignored,
}

/// State that exists only between `start` and the end of the session.
#[derive(Debug)]
struct ActiveSession {
    player: String,
    difficulty: Difficulty,
    seed: u64,
    target_curve: Vec<f64>,
    tolerance: ToleranceSchedule,
    actual: Vec<Option<f64>>,
    tick_scores: Vec<f64>,
    aggregator: ScoreAggregator,
    completed: bool,
    started_at: Instant,
}

/// Tick-driven scoring state machine for one connection.
pub struct SessionEngine {
    connection: ConnectionId,
    duration: u32,
    sink: Box<dyn BroadcastSink>,
    store: Arc<dyn ScoreStore>,
    session: Option<ActiveSession>,
}

impl SessionEngine {
    /// Creates an idle engine for one connection.
    #[must_use]
    pub fn new(
        connection: ConnectionId,
        duration: u32,
        sink: Box<dyn BroadcastSink>,
        store: Arc<dyn ScoreStore>,
    ) -> Self {
        Self {
            connection,
            duration,
            sink,
            store,
            session: None,
        }
    }

    /// Connection this engine belongs to.
    #[must_use]
    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        match &self.session {
            None => SessionState::Idle,
            Some(session) if session.completed => SessionState::Completed,
            Some(_) => SessionState::Running,
        }
    }

    /// Starts the session: generates the curves from `seed`, captures the
    /// monotonic start instant, transitions to `Running`, and emits the
    /// `init` frame.
    ///
    /// Starting an engine that is already `Running` (or `Completed`) is a
    /// logged no-op: no state is reset and no curve is regenerated.
    pub fn start(
        &mut self,
        player: String,
        difficulty: Difficulty,
        seed: u64,
        now: Instant,
    ) -> Result<(), EngineError> {
        match self.state() {
            SessionState::Running => {
                tracing::warn!(
                    connection = self.connection.get(),
                    "start ignored: session already running"
                );
                return Ok(());
            }
            SessionState::Completed => {
                tracing::warn!(
                    connection = self.connection.get(),
                    "start ignored: session already completed"
                );
                return Ok(());
            }
            SessionState::Idle => {}
        }

        let target_curve = generate(seed, difficulty, self.duration);
        let tolerance = ToleranceSchedule::new(difficulty, self.duration);
        let init = InitFrame {
            target_curve: target_curve.clone(),
            tolerance_curve: tolerance.curve(),
            difficulty,
            seed,
            duration: self.duration,
            start_time: unix_now(),
        };
        self.session = Some(ActiveSession {
            player,
            difficulty,
            seed,
            target_curve,
            tolerance,
            actual: vec![None; self.duration as usize],
            tick_scores: Vec::with_capacity(self.duration as usize),
            aggregator: ScoreAggregator::new(),
            completed: false,
            started_at: now,
        });
        tracing::info!(
            connection = self.connection.get(),
            seed,
            ?difficulty,
            duration = self.duration,
            "session started"
        );
        self.sink.send_init(&init)?;
        Ok(())
    }

    /// Registers one smoothed reading against the tick window it arrived in.
    ///
    /// The slot for the current tick is overwritten on every call, so the
    /// last reading of a window wins. Readings outside `Running` or outside
    /// the session's tick range are silently dropped.
    pub fn register_reading(&mut self, value: f64, now: Instant) {
        let connection = self.connection;
        let duration = self.duration;
        let Some(session) = self.session.as_mut() else {
            tracing::debug!(
                connection = connection.get(),
                "reading dropped: session not started"
            );
            return;
        };
        if session.completed {
            tracing::debug!(
                connection = connection.get(),
                "reading dropped: session completed"
            );
            return;
        }
        let elapsed = now.saturating_duration_since(session.started_at).as_secs();
        if elapsed >= u64::from(duration) {
            tracing::debug!(
                connection = connection.get(),
                elapsed,
                "reading dropped: outside session window"
            );
            return;
        }
        session.actual[elapsed as usize] = Some(value);
    }

    /// Scores the next tick and broadcasts its frame.
    ///
    /// Exactly one call per tick window; the timer task owns the cadence.
    /// The final tick persists the finished record before surfacing any
    /// transport failure, so a dropped client cannot lose a finished result.
    pub fn advance(&mut self) -> Result<TickOutcome, EngineError> {
        let connection = self.connection;
        let duration = self.duration;
        let Some(session) = self.session.as_mut() else {
            tracing::warn!(connection = connection.get(), "tick ignored: no session");
            return Ok(TickOutcome::Ignored);
        };
        if session.completed {
            tracing::warn!(
                connection = connection.get(),
                "tick ignored: session completed"
            );
            return Ok(TickOutcome::Ignored);
        }

        let tick = session.tick_scores.len() as u32;
        if tick >= duration {
            tracing::warn!(
                connection = connection.get(),
                "tick ignored: session has no remaining ticks"
            );
            session.completed = true;
            return Ok(TickOutcome::Ignored);
        }
        let actual = session.actual[tick as usize];
        let target = session.target_curve[tick as usize];
        let tolerance = session.tolerance.tolerance_at(tick);
        let score = score_tick(actual, target, tolerance, session.difficulty);
        session.tick_scores.push(score);
        let total = session.aggregator.add(score);

        let frame = TickFrame {
            second: tick,
            actual,
            target,
            tolerance,
            tick_score: score,
            total_score: total,
        };

        if tick + 1 < duration {
            self.sink.send_tick(&frame)?;
            return Ok(TickOutcome::Scored { tick });
        }

        session.completed = true;
        let end = EndFrame {
            total_score: total,
            actual: session.actual.clone(),
            target_curve: session.target_curve.clone(),
            seed: session.seed,
            difficulty: session.difficulty,
            player: session.player.clone(),
        };
        let record = ScoreRecord {
            name: session.player.clone(),
            difficulty: session.difficulty,
            score: total,
            seed: session.seed,
            timestamp: Utc::now(),
        };

        let mut delivery = self.sink.send_tick(&frame);
        if delivery.is_ok() {
            delivery = self.sink.send_end(&end);
        }
        self.store
            .save(&record)
            .map_err(|source| EngineError::Persistence { record, source })?;
        tracing::info!(
            connection = connection.get(),
            total,
            "session completed and persisted"
        );
        delivery?;
        Ok(TickOutcome::Finished { total })
    }
}

impl std::fmt::Debug for SessionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionEngine")
            .field("connection", &self.connection)
            .field("duration", &self.duration)
            .field("state", &self.state())
            .finish()
    }
}

fn unix_now() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1_000.0
}
