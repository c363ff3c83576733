// src/replay/timeline.rs
//! Player-facing view of a reconstructed recording

use crate::recording::RecordedEvent;
use crate::replay::segments::{self, find_segment_for_time, Segment};
use crate::utils::errors::{EngineError, Result};
use serde_json::Value;
use tracing::info;

/// Where a global offset lands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekPosition {
    /// Segment index
    pub segment: usize,

    /// Offset from the segment's first event, clamped to its span
    pub local_ms: i64,
}

/// Segments of one recording on a shared virtual timeline
#[derive(Debug, Clone, Default)]
pub struct Timeline {
    segments: Vec<Segment>,
    start_ms: i64,
    end_ms: i64,
}

impl Timeline {
    /// Build from already-typed events; unplayable ones are dropped
    pub fn from_events(events: Vec<RecordedEvent>) -> Self {
        let events: Vec<RecordedEvent> = events.into_iter().filter(segments::is_playable).collect();
        Self::build(&events)
    }

    /// Build from stored records
    pub fn from_records(raw: &[Value]) -> Self {
        Self::build(&segments::sanitize(raw))
    }

    /// Build from a JSON array of stored records
    pub fn from_json_str(text: &str) -> Result<Self> {
        match serde_json::from_str::<Value>(text)? {
            Value::Array(records) => Ok(Self::from_records(&records)),
            other => Err(EngineError::MalformedMessage(format!(
                "expected an array of events, got {}",
                type_name(&other)
            ))),
        }
    }

    fn build(events: &[RecordedEvent]) -> Self {
        let start_ms = events.first().map_or(0, |e| e.timestamp_ms);
        let end_ms = events.last().map_or(0, |e| e.timestamp_ms);
        let segments = segments::partition(events);

        info!(
            "Reconstructed {} segments spanning {} ms",
            segments.len(),
            end_ms - start_ms
        );

        Self {
            segments,
            start_ms,
            end_ms,
        }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn start_ms(&self) -> i64 {
        self.start_ms
    }

    pub fn end_ms(&self) -> i64 {
        self.end_ms
    }

    pub fn duration_ms(&self) -> i64 {
        self.end_ms - self.start_ms
    }

    /// Map an offset from recording start to a segment and local offset
    pub fn locate(&self, offset_ms: i64) -> Option<SeekPosition> {
        let index = find_segment_for_time(&self.segments, offset_ms)?;
        let segment = &self.segments[index];
        let local_ms = (offset_ms - segment.offset_ms).clamp(0, segment.duration_ms);
        Some(SeekPosition {
            segment: index,
            local_ms,
        })
    }

    /// Segment events padded to the full recording span
    pub fn padded(&self, index: usize) -> Option<Vec<RecordedEvent>> {
        self.segments
            .get(index)
            .map(|segment| segments::pad(segment, self.start_ms, self.end_ms))
    }

    pub fn padded_segments(&self) -> Vec<Vec<RecordedEvent>> {
        self.segments
            .iter()
            .map(|segment| segments::pad(segment, self.start_ms, self.end_ms))
            .collect()
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
