// src/replay/segments.rs
//! Segment reconstruction
//!
//! A recording captured across client reloads contains several full
//! snapshots. Each one after the first starts a new independently replayable
//! [`Segment`]; all segments share one virtual timeline anchored at the
//! recording's first timestamp.
//!
//! ```text
//! events:   M S i i i M S i i M S i
//!           └──seg 0──┘ └seg 1┘ └seg 2
//! offset:   0           t(M₂)−t₀ ...
//! ```
//!
//! The `Meta` event a reload emits right before its snapshot moves with the
//! snapshot into the new segment.

use crate::recording::{timestamp_from_value, EventKind, RecordedEvent};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

/// Tag carried by synthetic padding markers
pub const BOUNDARY_TAG: &str = "segment-boundary";

/// Independently replayable slice of a recording
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Segment {
    pub events: Vec<RecordedEvent>,

    /// First event timestamp minus recording start
    pub offset_ms: i64,

    /// Last minus first event timestamp
    pub duration_ms: i64,
}

impl Segment {
    fn from_events(events: Vec<RecordedEvent>, recording_start: i64) -> Option<Self> {
        let first = events.first()?.timestamp_ms;
        let last = events.last()?.timestamp_ms;
        Some(Self {
            events,
            offset_ms: first - recording_start,
            duration_ms: last - first,
        })
    }

    pub fn first_timestamp(&self) -> Option<i64> {
        self.events.first().map(|e| e.timestamp_ms)
    }

    pub fn last_timestamp(&self) -> Option<i64> {
        self.events.last().map(|e| e.timestamp_ms)
    }
}

/// Parse one stored record, or `None` if a player could not use it
pub fn parse_event(raw: &Value) -> Option<RecordedEvent> {
    let code = raw.get("type")?.as_u64()?;
    let kind = EventKind::from_code(u8::try_from(code).ok()?)?;

    let timestamp_ms = timestamp_from_value(raw.get("timestamp")?)?;

    let event = RecordedEvent::new(
        kind,
        timestamp_ms,
        raw.get("data").cloned().unwrap_or(Value::Null),
    );
    is_playable(&event).then_some(event)
}

/// Incremental events must carry their `source` discriminator
pub fn is_playable(event: &RecordedEvent) -> bool {
    match event.kind {
        EventKind::Incremental => event
            .payload
            .get("source")
            .map_or(false, |source| !source.is_null()),
        _ => true,
    }
}

/// Drop records lacking a kind, a timestamp or a required discriminator
pub fn sanitize(raw: &[Value]) -> Vec<RecordedEvent> {
    let events: Vec<RecordedEvent> = raw.iter().filter_map(parse_event).collect();
    if events.len() != raw.len() {
        debug!("Dropped {} unplayable records", raw.len() - events.len());
    }
    events
}

/// Split a chronological stream at every full snapshot after the first
pub fn partition(events: &[RecordedEvent]) -> Vec<Segment> {
    let Some(recording_start) = events.first().map(|e| e.timestamp_ms) else {
        return Vec::new();
    };

    let mut segments = Vec::new();
    let mut current: Vec<RecordedEvent> = Vec::new();
    let mut seen_snapshot = false;

    for event in events {
        if event.is_full_snapshot() && seen_snapshot {
            let carried = match current.last() {
                Some(last) if last.kind == EventKind::Meta => current.pop(),
                _ => None,
            };

            if let Some(segment) = Segment::from_events(std::mem::take(&mut current), recording_start) {
                segments.push(segment);
            }
            current.extend(carried);
        }

        if event.is_full_snapshot() {
            seen_snapshot = true;
        }
        current.push(event.clone());
    }

    segments.extend(Segment::from_events(current, recording_start));
    segments
}

/// Sanitize then partition stored records
pub fn reconstruct(raw: &[Value]) -> Vec<Segment> {
    partition(&sanitize(raw))
}

pub fn boundary_marker(timestamp_ms: i64) -> RecordedEvent {
    RecordedEvent::custom(timestamp_ms, BOUNDARY_TAG)
}

pub fn is_boundary_marker(event: &RecordedEvent) -> bool {
    event.kind == EventKind::Custom
        && event.payload.get("tag").and_then(Value::as_str) == Some(BOUNDARY_TAG)
}

/// Stretch a segment to span the whole recording with boundary markers
pub fn pad(segment: &Segment, recording_start: i64, recording_end: i64) -> Vec<RecordedEvent> {
    let mut padded = Vec::with_capacity(segment.events.len() + 2);

    if segment.first_timestamp().map_or(false, |first| first > recording_start) {
        padded.push(boundary_marker(recording_start));
    }
    padded.extend(segment.events.iter().cloned());
    if segment.last_timestamp().map_or(false, |last| last < recording_end) {
        padded.push(boundary_marker(recording_end));
    }

    padded
}

/// Index of the last segment starting at or before `time_ms`, clamped
pub fn find_segment_for_time(segments: &[Segment], time_ms: i64) -> Option<usize> {
    if segments.is_empty() {
        return None;
    }

    let index = segments
        .iter()
        .rposition(|segment| segment.offset_ms <= time_ms)
        .unwrap_or(0);
    Some(index)
}
