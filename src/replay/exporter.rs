// src/replay/exporter.rs
//! Export reconstructed recordings
//!
//! Supports:
//! - JSON (whole timeline, pretty printed)
//! - NDJSON (one padded segment per line, for streaming into a player)

use crate::recording::RecordedEvent;
use crate::replay::timeline::Timeline;
use crate::utils::errors::Result;
use serde::Serialize;
use std::io::Write;
use tracing::debug;

/// Export formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// Single JSON document
    Json,

    /// Newline-delimited JSON, one segment per line
    Ndjson,
}

#[derive(Serialize)]
struct ExportedTimeline {
    start_ms: i64,
    end_ms: i64,
    duration_ms: i64,
    segments: Vec<ExportedSegment>,
}

#[derive(Serialize)]
struct ExportedSegment {
    index: usize,
    offset_ms: i64,
    duration_ms: i64,
    events: Vec<RecordedEvent>,
}

/// Exporter for reconstructed timelines
pub struct Exporter {
    format: ExportFormat,
}

impl Exporter {
    /// Create a new exporter
    pub fn new(format: ExportFormat) -> Self {
        Self { format }
    }

    /// Export a timeline to a string
    pub fn export(&self, timeline: &Timeline) -> Result<String> {
        let mut out = Vec::new();
        self.write_to(timeline, &mut out)?;
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    /// Export a timeline into any writer
    pub fn write_to<W: Write>(&self, timeline: &Timeline, writer: &mut W) -> Result<()> {
        debug!(
            "Exporting {} segments to {:?} format",
            timeline.len(),
            self.format
        );

        let segments = exported_segments(timeline);
        match self.format {
            ExportFormat::Json => {
                let document = ExportedTimeline {
                    start_ms: timeline.start_ms(),
                    end_ms: timeline.end_ms(),
                    duration_ms: timeline.duration_ms(),
                    segments,
                };
                serde_json::to_writer_pretty(&mut *writer, &document)?;
                writeln!(writer)?;
            }
            ExportFormat::Ndjson => {
                for segment in segments {
                    serde_json::to_writer(&mut *writer, &segment)?;
                    writeln!(writer)?;
                }
            }
        }

        Ok(())
    }
}

fn exported_segments(timeline: &Timeline) -> Vec<ExportedSegment> {
    timeline
        .segments()
        .iter()
        .zip(timeline.padded_segments())
        .enumerate()
        .map(|(index, (segment, events))| ExportedSegment {
            index,
            offset_ms: segment.offset_ms,
            duration_ms: segment.duration_ms,
            events,
        })
        .collect()
}
