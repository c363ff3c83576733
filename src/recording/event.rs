// src/recording/event.rs
//! Recorded events and log entries
//!
//! Events keep the rrweb wire shape (`{"type", "timestamp", "data"}` with
//! numeric type codes) so stored recordings can be handed straight to a
//! player. Log entries use the compact `{t, v, c, m, d?}` shape.

use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Millisecond timestamp from an integer or a finite float (truncated)
pub fn timestamp_from_value(value: &Value) -> Option<i64> {
    match value.as_i64() {
        Some(ts) => Some(ts),
        None => value.as_f64().filter(|ts| ts.is_finite()).map(|ts| ts as i64),
    }
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    timestamp_from_value(&value)
        .ok_or_else(|| de::Error::custom(format!("invalid timestamp: {}", value)))
}

/// Kind of a recorded event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum EventKind {
    /// Self-contained checkpoint replay can resume from
    FullSnapshot,

    /// Delta against the last snapshot
    Incremental,

    /// Page metadata (href, viewport), emitted right before a snapshot
    Meta,

    /// Application-defined marker
    Custom,
}

impl EventKind {
    pub fn code(&self) -> u8 {
        match self {
            EventKind::FullSnapshot => 2,
            EventKind::Incremental => 3,
            EventKind::Meta => 4,
            EventKind::Custom => 5,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            2 => Some(EventKind::FullSnapshot),
            3 => Some(EventKind::Incremental),
            4 => Some(EventKind::Meta),
            5 => Some(EventKind::Custom),
            _ => None,
        }
    }
}

impl TryFrom<u8> for EventKind {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        EventKind::from_code(code).ok_or_else(|| format!("unknown event type {}", code))
    }
}

impl From<EventKind> for u8 {
    fn from(kind: EventKind) -> Self {
        kind.code()
    }
}

/// A recorded UI event; the payload is opaque to the relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedEvent {
    /// Event kind
    #[serde(rename = "type")]
    pub kind: EventKind,

    /// Capture time (milliseconds since epoch)
    #[serde(rename = "timestamp", deserialize_with = "deserialize_timestamp")]
    pub timestamp_ms: i64,

    /// Producer payload
    #[serde(rename = "data", default)]
    pub payload: Value,
}

impl RecordedEvent {
    pub fn new(kind: EventKind, timestamp_ms: i64, payload: Value) -> Self {
        Self {
            kind,
            timestamp_ms,
            payload,
        }
    }

    pub fn meta(timestamp_ms: i64, href: &str) -> Self {
        Self::new(
            EventKind::Meta,
            timestamp_ms,
            serde_json::json!({ "href": href }),
        )
    }

    pub fn full_snapshot(timestamp_ms: i64) -> Self {
        Self::new(
            EventKind::FullSnapshot,
            timestamp_ms,
            serde_json::json!({ "node": {}, "initialOffset": { "top": 0, "left": 0 } }),
        )
    }

    /// Incremental event with the given source discriminator
    pub fn incremental(timestamp_ms: i64, source: u8) -> Self {
        Self::new(
            EventKind::Incremental,
            timestamp_ms,
            serde_json::json!({ "source": source }),
        )
    }

    pub fn custom(timestamp_ms: i64, tag: &str) -> Self {
        Self::new(
            EventKind::Custom,
            timestamp_ms,
            serde_json::json!({ "tag": tag }),
        )
    }

    pub fn is_full_snapshot(&self) -> bool {
        self.kind == EventKind::FullSnapshot
    }
}

/// Log severity, encoded 0..3 on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl TryFrom<u8> for LogLevel {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, String> {
        match value {
            0 => Ok(LogLevel::Debug),
            1 => Ok(LogLevel::Info),
            2 => Ok(LogLevel::Warn),
            3 => Ok(LogLevel::Error),
            other => Err(format!("log level out of range: {}", other)),
        }
    }
}

impl From<LogLevel> for u8 {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => 0,
            LogLevel::Info => 1,
            LogLevel::Warn => 2,
            LogLevel::Error => 3,
        }
    }
}

/// Structured log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Time (milliseconds since epoch)
    #[serde(rename = "t", deserialize_with = "deserialize_timestamp")]
    pub timestamp_ms: i64,

    /// Severity
    #[serde(rename = "v")]
    pub level: LogLevel,

    /// Emitting scope, e.g. `"checkout"`
    #[serde(rename = "c")]
    pub scope: String,

    /// Message text
    #[serde(rename = "m")]
    pub message: String,

    /// Optional structured fields
    #[serde(rename = "d", default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
}

impl LogEntry {
    pub fn new(
        timestamp_ms: i64,
        level: LogLevel,
        scope: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            timestamp_ms,
            level,
            scope: scope.into(),
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Map<String, Value>) -> Self {
        self.data = Some(data);
        self
    }
}
