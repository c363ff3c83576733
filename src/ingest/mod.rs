// src/ingest/mod.rs
//! Ingest pipeline: buffering, flush fan-out, lifecycle and transport

pub mod buffer;
pub mod flush_coordinator;
pub mod lifecycle;
pub mod transport;

pub use buffer::{BufferConfig, BufferStats, FlushOutcome, IngestBuffer, LiveChannel, Route};
pub use flush_coordinator::{FlushCoordinator, FlushHandle, FlushReport};
pub use lifecycle::{Lifecycle, LifecycleSignal};
pub use transport::{
    HttpTransport, IngestEndpoint, IngestPayload, PayloadHeader, PostOutcome, Transport,
    TransportConfig,
};
