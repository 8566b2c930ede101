//! Per-connection session tasks and the broadcast fan-out registry.
//!
//! Scheduling model: one independently timed task per session. The task is
//! the only writer of the session's scores and state; smoothed readings
//! arrive from the ingestion side through the task's command channel and are
//! folded into the current tick's slot, newer values overwriting older ones
//! until the window closes. The registry is the only state shared between
//! connections and supports attach/detach while broadcasts are in flight.

use std::sync::Arc;

use dashmap::DashMap;
use powermatch_core::{
    BroadcastSink, ConnectionId, Difficulty, EndFrame, InitFrame, ScoreStore, SessionRequest,
    SinkError, TickFrame, WireFrame, DEFAULT_SESSION_TICKS,
};
use rand::Rng;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};

use crate::{EngineError, SessionEngine, TickOutcome, TICK_PERIOD};

/// Commands accepted by a session task.
#[derive(Clone, Debug)]
pub enum SessionCommand {
    /// Starts the session for the named player.
    Start {
        /// Player display name.
        player: String,
        /// Requested difficulty.
        difficulty: Difficulty,
    },
    /// Hands one smoothed reading to the session.
    Reading(f64),
}

/// Terminal state of a session task.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SessionOutcome {
    /// The session scored all of its ticks and was persisted.
    Completed {
        /// Final rounded session total.
        total: f64,
    },
    /// The connection went away before a session completed; nothing was
    /// persisted.
    Detached,
}

/// Handle to one connection's session task.
#[derive(Debug)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<SessionCommand>,
    task: JoinHandle<Result<SessionOutcome, EngineError>>,
}

impl SessionHandle {
    /// Queues a command for the session task. Returns `false` when the task
    /// has already finished.
    pub fn send(&self, command: SessionCommand) -> bool {
        self.commands.send(command).is_ok()
    }
}

/// Owns one session task per live connection.
///
/// Sessions never share mutable state; curves are generated from per-session
/// seeds inside each task, so concurrent sessions cannot perturb one
/// another's determinism.
pub struct SessionRegistry {
    sessions: DashMap<ConnectionId, SessionHandle>,
    store: Arc<dyn ScoreStore>,
    duration: u32,
}

impl SessionRegistry {
    /// Creates a registry running sessions of the default length.
    #[must_use]
    pub fn new(store: Arc<dyn ScoreStore>) -> Self {
        Self::with_duration(store, DEFAULT_SESSION_TICKS)
    }

    /// Creates a registry running sessions of `duration` ticks. A zero
    /// duration is raised to one tick: a session must score something.
    #[must_use]
    pub fn with_duration(store: Arc<dyn ScoreStore>, duration: u32) -> Self {
        Self {
            sessions: DashMap::new(),
            store,
            duration: duration.max(1),
        }
    }

    /// Spawns a fresh idle session task for the connection.
    ///
    /// Must be called from within a tokio runtime. Attaching a connection
    /// that is already present replaces (and aborts) the previous task.
    pub fn attach(&self, connection: ConnectionId, sink: Box<dyn BroadcastSink>) {
        let engine = SessionEngine::new(connection, self.duration, sink, Arc::clone(&self.store));
        let (commands, inbox) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_session(engine, inbox));
        let handle = SessionHandle { commands, task };
        if let Some(previous) = self.sessions.insert(connection, handle) {
            tracing::warn!(
                connection = connection.get(),
                "attach replaced a live session task"
            );
            previous.task.abort();
        }
    }

    /// Drops the connection's session task.
    ///
    /// An in-flight session is cancelled and abandoned, not persisted. The
    /// handle is removed from the registry before the task is aborted so no
    /// frame is delivered to a half-detached connection.
    pub fn detach(&self, connection: ConnectionId) {
        if let Some((_, handle)) = self.sessions.remove(&connection) {
            handle.task.abort();
            tracing::info!(connection = connection.get(), "session detached");
        }
    }

    /// Forwards a start request to the connection's session task. Returns
    /// `false` when the connection is unknown or its task already finished.
    pub fn start_session(&self, connection: ConnectionId, request: SessionRequest) -> bool {
        match self.sessions.get(&connection) {
            Some(handle) => handle.send(SessionCommand::Start {
                player: request.name,
                difficulty: request.difficulty,
            }),
            None => {
                tracing::warn!(
                    connection = connection.get(),
                    "start request for unknown connection"
                );
                false
            }
        }
    }

    /// Fans one smoothed reading out to every attached session.
    pub fn dispatch_reading(&self, value: f64) {
        for entry in self.sessions.iter() {
            if !entry.value().send(SessionCommand::Reading(value)) {
                tracing::debug!(
                    connection = entry.key().get(),
                    "reading not delivered: session task finished"
                );
            }
        }
    }

    /// Number of attached connections.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Whether the connection currently has a session task.
    #[must_use]
    pub fn is_attached(&self, connection: ConnectionId) -> bool {
        self.sessions.contains_key(&connection)
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.sessions.len())
            .field("duration", &self.duration)
            .finish()
    }
}

/// Broadcast sink that queues frames into an unbounded channel for a
/// transport task to drain. Sending never blocks the tick loop; a dropped
/// receiver surfaces as [`SinkError::Closed`] on the next send.
#[derive(Debug)]
pub struct ChannelSink {
    frames: mpsc::UnboundedSender<WireFrame>,
}

impl ChannelSink {
    /// Creates a sink together with the receiving half the transport drains.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<WireFrame>) {
        let (frames, receiver) = mpsc::unbounded_channel();
        (Self { frames }, receiver)
    }

    fn forward(&self, frame: WireFrame) -> Result<(), SinkError> {
        self.frames.send(frame).map_err(|_| SinkError::Closed)
    }
}

impl BroadcastSink for ChannelSink {
    fn send_init(&mut self, frame: &InitFrame) -> Result<(), SinkError> {
        self.forward(WireFrame::Init(frame.clone()))
    }

    fn send_tick(&mut self, frame: &TickFrame) -> Result<(), SinkError> {
        self.forward(WireFrame::Tick(frame.clone()))
    }

    fn send_end(&mut self, frame: &EndFrame) -> Result<(), SinkError> {
        self.forward(WireFrame::End(frame.clone()))
    }
}

async fn run_session(
    mut engine: SessionEngine,
    mut inbox: mpsc::UnboundedReceiver<SessionCommand>,
) -> Result<SessionOutcome, EngineError> {
    let connection = engine.connection();
    let result = drive_session(&mut engine, &mut inbox).await;
    match &result {
        Ok(outcome) => {
            tracing::debug!(connection = connection.get(), ?outcome, "session task done");
        }
        Err(error) => {
            tracing::error!(connection = connection.get(), %error, "session task failed");
        }
    }
    result
}

async fn drive_session(
    engine: &mut SessionEngine,
    inbox: &mut mpsc::UnboundedReceiver<SessionCommand>,
) -> Result<SessionOutcome, EngineError> {
    // Idle until the start request arrives. Readings that race ahead of the
    // start are dropped by the engine.
    let (player, difficulty) = loop {
        match inbox.recv().await {
            Some(SessionCommand::Start { player, difficulty }) => break (player, difficulty),
            Some(SessionCommand::Reading(value)) => {
                engine.register_reading(value, Instant::now());
            }
            None => return Ok(SessionOutcome::Detached),
        }
    };

    let started = Instant::now();
    engine.start(player, difficulty, fresh_seed(), started)?;

    // The first tick closes one period after start; scoring tick i strictly
    // after tick i's window has fully elapsed.
    let mut ticks = interval_at(started + TICK_PERIOD, TICK_PERIOD);
    loop {
        tokio::select! {
            _ = ticks.tick() => {
                match engine.advance()? {
                    TickOutcome::Finished { total } => {
                        return Ok(SessionOutcome::Completed { total });
                    }
                    TickOutcome::Scored { .. } | TickOutcome::Ignored => {}
                }
            }
            command = inbox.recv() => match command {
                Some(SessionCommand::Start { player, difficulty }) => {
                    // The engine logs and ignores duplicate starts.
                    engine.start(player, difficulty, fresh_seed(), Instant::now())?;
                }
                Some(SessionCommand::Reading(value)) => {
                    engine.register_reading(value, Instant::now());
                }
                None => return Ok(SessionOutcome::Detached),
            }
        }
    }
}

/// Seeds stay in a small human-readable range so a curve can be replayed by
/// typing its seed back in.
fn fresh_seed() -> u64 {
    rand::thread_rng().gen_range(1_000..10_000)
}
