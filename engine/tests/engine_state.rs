use std::sync::{Arc, Mutex};
use std::time::Duration;

use powermatch_core::{
    BroadcastSink, ConnectionId, Difficulty, EndFrame, InitFrame, ScoreRecord, ScoreStore,
    SinkError, StoreError, TickFrame, WireFrame,
};
use powermatch_engine::{EngineError, SessionEngine, SessionState, TickOutcome};
use tokio::time::Instant;

#[derive(Clone, Default)]
struct RecordingSink {
    frames: Arc<Mutex<Vec<WireFrame>>>,
}

impl RecordingSink {
    fn frames(&self) -> Vec<WireFrame> {
        self.frames.lock().expect("sink lock").clone()
    }
}

impl BroadcastSink for RecordingSink {
    fn send_init(&mut self, frame: &InitFrame) -> Result<(), SinkError> {
        self.frames
            .lock()
            .expect("sink lock")
            .push(WireFrame::Init(frame.clone()));
        Ok(())
    }

    fn send_tick(&mut self, frame: &TickFrame) -> Result<(), SinkError> {
        self.frames
            .lock()
            .expect("sink lock")
            .push(WireFrame::Tick(frame.clone()));
        Ok(())
    }

    fn send_end(&mut self, frame: &EndFrame) -> Result<(), SinkError> {
        self.frames
            .lock()
            .expect("sink lock")
            .push(WireFrame::End(frame.clone()));
        Ok(())
    }
}

struct BrokenSink;

impl BroadcastSink for BrokenSink {
    fn send_init(&mut self, _frame: &InitFrame) -> Result<(), SinkError> {
        Err(SinkError::Closed)
    }

    fn send_tick(&mut self, _frame: &TickFrame) -> Result<(), SinkError> {
        Err(SinkError::Closed)
    }

    fn send_end(&mut self, _frame: &EndFrame) -> Result<(), SinkError> {
        Err(SinkError::Closed)
    }
}

#[derive(Default)]
struct RecordingStore {
    records: Mutex<Vec<ScoreRecord>>,
}

impl RecordingStore {
    fn records(&self) -> Vec<ScoreRecord> {
        self.records.lock().expect("store lock").clone()
    }
}

impl ScoreStore for RecordingStore {
    fn save(&self, record: &ScoreRecord) -> Result<(), StoreError> {
        self.records.lock().expect("store lock").push(record.clone());
        Ok(())
    }

    fn top_all_time(&self, _limit: u32) -> Result<Vec<ScoreRecord>, StoreError> {
        Ok(Vec::new())
    }

    fn top_recent(&self, _hours: u32, _limit: u32) -> Result<Vec<ScoreRecord>, StoreError> {
        Ok(Vec::new())
    }
}

struct FailingStore;

impl ScoreStore for FailingStore {
    fn save(&self, _record: &ScoreRecord) -> Result<(), StoreError> {
        Err(StoreError::Backend("disk full".to_owned()))
    }

    fn top_all_time(&self, _limit: u32) -> Result<Vec<ScoreRecord>, StoreError> {
        Ok(Vec::new())
    }

    fn top_recent(&self, _hours: u32, _limit: u32) -> Result<Vec<ScoreRecord>, StoreError> {
        Ok(Vec::new())
    }
}

fn engine_with(
    duration: u32,
    store: Arc<dyn ScoreStore>,
) -> (SessionEngine, RecordingSink) {
    let sink = RecordingSink::default();
    let engine = SessionEngine::new(
        ConnectionId::new(7),
        duration,
        Box::new(sink.clone()),
        store,
    );
    (engine, sink)
}

fn init_frame(frames: &[WireFrame]) -> InitFrame {
    match frames.first() {
        Some(WireFrame::Init(frame)) => frame.clone(),
        other => panic!("expected init frame, found {other:?}"),
    }
}

#[test]
fn session_scores_three_ticks_and_persists_once() {
    let store = Arc::new(RecordingStore::default());
    let (mut engine, sink) = engine_with(3, store.clone());
    let started = Instant::now();

    assert_eq!(engine.state(), SessionState::Idle);
    engine
        .start("Lena".to_owned(), Difficulty::Easy, 7, started)
        .expect("start");
    assert_eq!(engine.state(), SessionState::Running);

    let init = init_frame(&sink.frames());
    assert_eq!(init.target_curve.len(), 3);
    assert_eq!(init.tolerance_curve.len(), 3);

    // Tick 0: exact hit. Tick 1: half the tolerance off. Tick 2: no reading.
    engine.register_reading(init.target_curve[0], started + Duration::from_millis(300));
    engine.register_reading(
        init.target_curve[1] + init.tolerance_curve[1] / 2.0,
        started + Duration::from_millis(1_300),
    );

    assert_eq!(engine.advance().expect("tick 0"), TickOutcome::Scored { tick: 0 });
    assert_eq!(engine.advance().expect("tick 1"), TickOutcome::Scored { tick: 1 });
    let outcome = engine.advance().expect("tick 2");
    assert_eq!(engine.state(), SessionState::Completed);

    let frames = sink.frames();
    assert_eq!(frames.len(), 5, "init + three ticks + end: {frames:?}");
    let (tick0, tick1, tick2) = match (&frames[1], &frames[2], &frames[3]) {
        (WireFrame::Tick(a), WireFrame::Tick(b), WireFrame::Tick(c)) => (a, b, c),
        other => panic!("expected tick frames, found {other:?}"),
    };
    assert_eq!(tick0.second, 0);
    assert_eq!(tick0.tick_score, 1.0);
    assert_eq!(tick1.second, 1);
    assert_eq!(tick1.tick_score, 0.5);
    assert_eq!(tick2.second, 2);
    assert!(tick2.actual.is_none());
    assert_eq!(tick2.tick_score, 0.0);

    let end = match &frames[4] {
        WireFrame::End(frame) => frame,
        other => panic!("expected end frame, found {other:?}"),
    };
    assert_eq!(end.total_score, 1.5);
    assert_eq!(end.player, "Lena");
    assert_eq!(end.seed, 7);
    assert_eq!(outcome, TickOutcome::Finished { total: 1.5 });

    let records = store.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].name, "Lena");
    assert_eq!(records[0].score, 1.5);
    assert_eq!(records[0].seed, 7);
    assert_eq!(records[0].difficulty, Difficulty::Easy);
}

#[test]
fn duplicate_start_is_a_no_op() {
    let store = Arc::new(RecordingStore::default());
    let (mut engine, sink) = engine_with(3, store);
    let started = Instant::now();

    engine
        .start("Lena".to_owned(), Difficulty::Easy, 7, started)
        .expect("first start");
    let first_curve = init_frame(&sink.frames()).target_curve;

    engine
        .start("Mallory".to_owned(), Difficulty::Hard, 99, started + Duration::from_secs(1))
        .expect("second start");

    // No second init frame, no regenerated curve, no state reset.
    let frames = sink.frames();
    assert_eq!(frames.len(), 1);
    assert_eq!(init_frame(&frames).target_curve, first_curve);
    assert_eq!(engine.state(), SessionState::Running);
}

#[test]
fn readings_after_completion_have_no_effect() {
    let store = Arc::new(RecordingStore::default());
    let (mut engine, sink) = engine_with(1, store.clone());
    let started = Instant::now();

    engine
        .start("Lena".to_owned(), Difficulty::Medium, 11, started)
        .expect("start");
    assert!(matches!(
        engine.advance().expect("only tick"),
        TickOutcome::Finished { .. }
    ));

    let frames_before = sink.frames().len();
    engine.register_reading(55.0, started + Duration::from_millis(100));
    assert_eq!(engine.advance().expect("post-completion tick"), TickOutcome::Ignored);

    assert_eq!(sink.frames().len(), frames_before);
    assert_eq!(store.records().len(), 1, "record persisted exactly once");
}

#[test]
fn readings_before_start_are_dropped() {
    let store = Arc::new(RecordingStore::default());
    let (mut engine, sink) = engine_with(1, store);
    let started = Instant::now();

    engine.register_reading(42.0, started);
    engine
        .start("Lena".to_owned(), Difficulty::Easy, 3, started)
        .expect("start");
    let _ = engine.advance().expect("only tick");

    let frames = sink.frames();
    let tick = match &frames[1] {
        WireFrame::Tick(frame) => frame,
        other => panic!("expected tick frame, found {other:?}"),
    };
    assert!(tick.actual.is_none());
}

#[test]
fn readings_outside_the_tick_range_are_dropped() {
    let store = Arc::new(RecordingStore::default());
    let (mut engine, sink) = engine_with(2, store);
    let started = Instant::now();

    engine
        .start("Lena".to_owned(), Difficulty::Easy, 3, started)
        .expect("start");
    engine.register_reading(42.0, started + Duration::from_secs(2));
    let _ = engine.advance().expect("tick 0");
    let _ = engine.advance().expect("tick 1");

    let frames = sink.frames();
    let end = match frames.last() {
        Some(WireFrame::End(frame)) => frame,
        other => panic!("expected end frame, found {other:?}"),
    };
    assert_eq!(end.actual, vec![None, None]);
}

#[test]
fn later_reading_in_the_same_window_wins() {
    let store = Arc::new(RecordingStore::default());
    let (mut engine, sink) = engine_with(1, store);
    let started = Instant::now();

    engine
        .start("Lena".to_owned(), Difficulty::Easy, 3, started)
        .expect("start");
    engine.register_reading(40.0, started + Duration::from_millis(100));
    engine.register_reading(60.0, started + Duration::from_millis(800));
    let _ = engine.advance().expect("only tick");

    let frames = sink.frames();
    let tick = match &frames[1] {
        WireFrame::Tick(frame) => frame,
        other => panic!("expected tick frame, found {other:?}"),
    };
    assert_eq!(tick.actual, Some(60.0));
}

#[test]
fn persistence_failure_surfaces_the_unsaved_record() {
    let (mut engine, sink) = engine_with(1, Arc::new(FailingStore));
    let started = Instant::now();

    engine
        .start("Lena".to_owned(), Difficulty::Hard, 13, started)
        .expect("start");
    let init = init_frame(&sink.frames());
    engine.register_reading(init.target_curve[0], started + Duration::from_millis(200));

    let error = engine.advance().expect_err("save must fail");
    match error {
        EngineError::Persistence { record, .. } => {
            assert_eq!(record.name, "Lena");
            assert_eq!(record.seed, 13);
            assert_eq!(record.score, 2.0);
        }
        other => panic!("expected persistence error, found {other:?}"),
    }

    // The end frame still went out before the failure surfaced.
    assert!(matches!(sink.frames().last(), Some(WireFrame::End(_))));
}

#[test]
fn broken_sink_fails_the_start() {
    let store = Arc::new(RecordingStore::default());
    let mut engine = SessionEngine::new(ConnectionId::new(9), 2, Box::new(BrokenSink), store);

    let error = engine
        .start("Lena".to_owned(), Difficulty::Easy, 5, Instant::now())
        .expect_err("init send must fail");
    assert!(matches!(error, EngineError::Broadcast(SinkError::Closed)));
}
