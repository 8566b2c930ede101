#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! SQLite-backed persistence for finished sessions.
//!
//! Implements the [`ScoreStore`] seam: one row per completed session, with
//! leaderboard queries over all time and over a trailing window. Timestamps
//! are stored as RFC 3339 text so the recency filter is a plain string
//! comparison.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use powermatch_core::{Difficulty, ScoreRecord, ScoreStore, StoreError};
use rusqlite::Connection;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS scores (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    difficulty TEXT NOT NULL,
    score REAL NOT NULL,
    seed INTEGER NOT NULL,
    timestamp TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_scores_score ON scores (score DESC);
CREATE INDEX IF NOT EXISTS idx_scores_timestamp ON scores (timestamp);";

/// Score store backed by a single SQLite database.
#[derive(Debug)]
pub struct SqliteScoreStore {
    conn: Mutex<Connection>,
}

impl SqliteScoreStore {
    /// Opens (and if needed creates) a store backed by a file on disk.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(backend)?;
        Self::with_connection(conn)
    }

    /// Opens a store backed by an in-memory database, for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(backend)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA).map_err(backend)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, rusqlite::Error>,
    ) -> Result<T, StoreError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| StoreError::Backend("connection lock poisoned".to_owned()))?;
        f(&conn).map_err(backend)
    }

    fn query_top(
        &self,
        since: Option<DateTime<Utc>>,
        limit: u32,
    ) -> Result<Vec<ScoreRecord>, StoreError> {
        self.with_conn(|conn| {
            let mut records = Vec::new();
            let cutoff = since.map(|instant| instant.to_rfc3339());
            let mut push_row = |row: &rusqlite::Row<'_>| -> Result<(), rusqlite::Error> {
                records.push(read_record(row)?);
                Ok(())
            };
            match &cutoff {
                Some(cutoff) => {
                    let mut statement = conn.prepare(
                        "SELECT name, difficulty, score, seed, timestamp FROM scores
                         WHERE timestamp >= ?1 ORDER BY score DESC, timestamp DESC LIMIT ?2",
                    )?;
                    let mut rows = statement.query(rusqlite::params![cutoff, limit])?;
                    while let Some(row) = rows.next()? {
                        push_row(row)?;
                    }
                }
                None => {
                    let mut statement = conn.prepare(
                        "SELECT name, difficulty, score, seed, timestamp FROM scores
                         ORDER BY score DESC, timestamp DESC LIMIT ?1",
                    )?;
                    let mut rows = statement.query(rusqlite::params![limit])?;
                    while let Some(row) = rows.next()? {
                        push_row(row)?;
                    }
                }
            }
            Ok(records)
        })
    }
}

impl ScoreStore for SqliteScoreStore {
    fn save(&self, record: &ScoreRecord) -> Result<(), StoreError> {
        let inserted = self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO scores (name, difficulty, score, seed, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    record.name,
                    record.difficulty.label(),
                    record.score,
                    record.seed as i64,
                    record.timestamp.to_rfc3339(),
                ],
            )
        })?;
        tracing::debug!(rows = inserted, player = %record.name, "score persisted");
        Ok(())
    }

    fn top_all_time(&self, limit: u32) -> Result<Vec<ScoreRecord>, StoreError> {
        self.query_top(None, limit)
    }

    fn top_recent(&self, hours: u32, limit: u32) -> Result<Vec<ScoreRecord>, StoreError> {
        let cutoff = Utc::now() - Duration::hours(i64::from(hours));
        self.query_top(Some(cutoff), limit)
    }
}

fn read_record(row: &rusqlite::Row<'_>) -> Result<ScoreRecord, rusqlite::Error> {
    let name: String = row.get(0)?;
    let difficulty_label: String = row.get(1)?;
    let score: f64 = row.get(2)?;
    let seed: i64 = row.get(3)?;
    let timestamp_text: String = row.get(4)?;

    let difficulty = Difficulty::from_label(&difficulty_label).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Text,
            format!("unknown difficulty label `{difficulty_label}`").into(),
        )
    })?;
    let timestamp = DateTime::parse_from_rfc3339(&timestamp_text)
        .map_err(|error| {
            rusqlite::Error::FromSqlConversionFailure(
                4,
                rusqlite::types::Type::Text,
                error.to_string().into(),
            )
        })?
        .with_timezone(&Utc);

    Ok(ScoreRecord {
        name,
        difficulty,
        score,
        seed: seed as u64,
        timestamp,
    })
}

fn backend(error: rusqlite::Error) -> StoreError {
    StoreError::Backend(error.to_string())
}
