// src/recording/mod.rs
//! Recorded data model and queues
//!
//! - **Event**: recorded UI events (`RecordedEvent`) and structured log
//!   entries (`LogEntry`) in their wire shapes
//! - **Queue**: strict FIFO queue with optional oldest-first eviction and
//!   counters, used for both buffer queues
//!
//! Producers hand records to `ingest::IngestBuffer`, which owns one queue of
//! each kind:
//!
//! ```text
//! Recorder → push_event() → RecordQueue<RecordedEvent>  (soft cap, flush trigger)
//! Logger   → push_log()   → RecordQueue<LogEntry>       (hard cap, evicts oldest)
//! ```

pub mod event;
pub mod queue;

// Re-export commonly used types
pub use event::{timestamp_from_value, EventKind, LogEntry, LogLevel, RecordedEvent};
pub use queue::{QueueStats, RecordQueue};
