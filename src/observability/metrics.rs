// src/observability/metrics.rs
//! Metric names and recording helpers

use metrics::{counter, gauge};

pub const FLUSH_TOTAL: &str = "sessionwire_flush_total";
pub const EVENTS_DROPPED_TOTAL: &str = "sessionwire_events_dropped_total";
pub const LOGS_EVICTED_TOTAL: &str = "sessionwire_logs_evicted_total";
pub const LIVE_MESSAGES_TOTAL: &str = "sessionwire_live_messages_total";
pub const MALFORMED_MESSAGES_TOTAL: &str = "sessionwire_malformed_messages_total";
pub const EVENT_QUEUE_DEPTH: &str = "sessionwire_event_queue_depth";

/// Outcome label of a flush attempt
#[derive(Debug, Clone, Copy)]
pub enum FlushOutcomeLabel {
    Delivered,
    Requeued,
    Dropped,
    Beacon,
}

impl FlushOutcomeLabel {
    fn as_str(&self) -> &'static str {
        match self {
            FlushOutcomeLabel::Delivered => "delivered",
            FlushOutcomeLabel::Requeued => "requeued",
            FlushOutcomeLabel::Dropped => "dropped",
            FlushOutcomeLabel::Beacon => "beacon",
        }
    }
}

pub fn record_flush(outcome: FlushOutcomeLabel) {
    counter!(FLUSH_TOTAL, "outcome" => outcome.as_str()).increment(1);
}

pub fn record_events_dropped(count: usize) {
    counter!(EVENTS_DROPPED_TOTAL).increment(count as u64);
}

pub fn record_logs_evicted(count: usize) {
    if count > 0 {
        counter!(LOGS_EVICTED_TOTAL).increment(count as u64);
    }
}

pub fn record_live_message(direction: &'static str) {
    counter!(LIVE_MESSAGES_TOTAL, "direction" => direction).increment(1);
}

pub fn record_malformed_message() {
    counter!(MALFORMED_MESSAGES_TOTAL).increment(1);
}

pub fn record_event_queue_depth(depth: usize) {
    gauge!(EVENT_QUEUE_DEPTH).set(depth as f64);
}
