// src/replay/mod.rs
//! Replay: reconstruct stored event streams into seekable segments

pub mod exporter;
pub mod segments;
pub mod timeline;

pub use exporter::{ExportFormat, Exporter};
pub use segments::{find_segment_for_time, pad, partition, reconstruct, sanitize, Segment, BOUNDARY_TAG};
pub use timeline::{SeekPosition, Timeline};
