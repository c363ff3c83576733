// src/lib.rs
//! Sessionwire capture relay
//!
//! Moves recorded UI events and structured logs off a client, in batches
//! or over a live WebSocket link, and reconstructs stored recordings into
//! seekable segments for playback.
//!
//! # Architecture
//!
//! - **ingest**: buffering and flush policy, transport, flush fan-out, lifecycle
//! - **live**: upgraded duplex link and the annotation/chat protocol
//! - **recording**: event/log model and the FIFO queues
//! - **replay**: segment reconstruction, timeline and export
//! - **session**: the handle that wires a session together
//! - **observability**: tracing setup and metrics
//! - **utils**: configuration, errors, clock

// Public module exports
pub mod ingest;
pub mod live;
pub mod observability;
pub mod recording;
pub mod replay;
pub mod session;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used types
pub use ingest::buffer::{BufferConfig, FlushOutcome, IngestBuffer};
pub use ingest::flush_coordinator::{FlushCoordinator, FlushReport};
pub use ingest::transport::{HttpTransport, PostOutcome, Transport};
pub use live::link::{LiveConfig, LiveLink};
pub use recording::{EventKind, LogEntry, LogLevel, RecordedEvent};
pub use replay::{Segment, Timeline};
pub use session::{Producer, Session, SessionBuilder};
pub use utils::config::SdkConfig;
pub use utils::errors::{EngineError, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
