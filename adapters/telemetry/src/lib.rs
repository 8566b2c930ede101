#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Inbound telemetry decoding for the live power signal.
//!
//! The ingestion gateway republishes raw meter payloads as JSON strings; this
//! adapter extracts the instantaneous power reading, converts it to watts,
//! and smooths it before it reaches the engine. Malformed payloads never
//! reach the engine and never raise: they are logged and dropped, because a
//! flaky meter must not disturb a running session.

use powermatch_system_smoothing::InputSmoother;
use thiserror::Error;

/// OBIS code identifying the instantaneous power reading inside a payload's
/// `reader_data` array.
pub const POWER_READING_KEY: &str = "1-0:1.7.0.255";

/// Unit the source meter reports instantaneous power in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceUnit {
    /// Readings arrive in watts and pass through unchanged.
    Watts,
    /// Readings arrive in kilowatts and are scaled by 1000.
    Kilowatts,
}

impl SourceUnit {
    fn to_watts(self, value: f64) -> f64 {
        match self {
            Self::Watts => value,
            Self::Kilowatts => value * 1_000.0,
        }
    }
}

/// Why a telemetry payload was dropped.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The payload was not valid JSON or lacked the `reader_data` array.
    #[error("malformed telemetry payload: {0}")]
    Malformed(String),
    /// No entry in `reader_data` carried the power reading key.
    #[error("payload carries no `{POWER_READING_KEY}` reading")]
    MissingReading,
    /// The power reading entry was not a finite number.
    #[error("power reading is not numeric")]
    NonNumeric,
}

/// Extracts the instantaneous power reading from one raw payload, converted
/// to watts.
///
/// The payload shape is `{"reader_data": [{"<obis>": <value>}, ...]}`; the
/// first entry carrying [`POWER_READING_KEY`] wins. Values may be JSON
/// numbers or numeric strings (some meter firmwares quote them).
pub fn extract_power(payload: &str, unit: SourceUnit) -> Result<f64, TelemetryError> {
    let payload: serde_json::Value =
        serde_json::from_str(payload).map_err(|error| TelemetryError::Malformed(error.to_string()))?;
    let readers = payload
        .get("reader_data")
        .and_then(serde_json::Value::as_array)
        .ok_or_else(|| TelemetryError::Malformed("missing reader_data array".to_owned()))?;

    for entry in readers {
        if let Some(raw) = entry.get(POWER_READING_KEY) {
            let value = numeric(raw).ok_or(TelemetryError::NonNumeric)?;
            return Ok(unit.to_watts(value));
        }
    }
    Err(TelemetryError::MissingReading)
}

fn numeric(value: &serde_json::Value) -> Option<f64> {
    let parsed = match value {
        serde_json::Value::Number(number) => number.as_f64(),
        serde_json::Value::String(text) => text.trim().parse().ok(),
        _ => None,
    };
    parsed.filter(|value| value.is_finite())
}

/// Decodes raw payloads into smoothed watt readings ready for the engine.
///
/// One feed fronts one physical sensor stream; the smoothing window lives
/// here rather than per session because the noise belongs to the sensor, not
/// to any player.
#[derive(Debug)]
pub struct PowerFeed {
    unit: SourceUnit,
    smoother: InputSmoother,
}

impl PowerFeed {
    /// Creates a feed with the default smoothing window.
    #[must_use]
    pub fn new(unit: SourceUnit) -> Self {
        Self {
            unit,
            smoother: InputSmoother::new(),
        }
    }

    /// Creates a feed with a caller-provided smoother.
    #[must_use]
    pub fn with_smoother(unit: SourceUnit, smoother: InputSmoother) -> Self {
        Self { unit, smoother }
    }

    /// Decodes one payload and returns the smoothed reading, or `None` when
    /// the payload was dropped.
    pub fn ingest(&mut self, payload: &str) -> Option<f64> {
        match extract_power(payload, self.unit) {
            Ok(watts) => Some(self.smoother.push(watts)),
            Err(error) => {
                tracing::debug!(%error, "dropped telemetry payload");
                None
            }
        }
    }
}
