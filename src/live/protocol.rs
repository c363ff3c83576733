// src/live/protocol.rs
//! Live link wire protocol
//!
//! JSON frames tagged by `"type"`. Inbound commands are a closed enum so an
//! unknown or malformed frame fails to parse and is dropped by the link.

use crate::recording::{LogEntry, RecordedEvent};
use crate::utils::errors::{EngineError, Result};
use serde::{Deserialize, Serialize};

/// Point on the host document, in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Client → collector frames
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Relayed recorded events
    Events { events: Vec<RecordedEvent> },

    /// Relayed log entries
    Logs { logs: Vec<LogEntry> },

    /// Chat message typed by the user
    Chat { message: String },

    /// The user is typing
    Typing,

    /// Host visibility changed
    Focus { visible: bool },
}

impl OutboundMessage {
    pub fn direction_label(&self) -> &'static str {
        match self {
            OutboundMessage::Events { .. } => "events",
            OutboundMessage::Logs { .. } => "logs",
            OutboundMessage::Chat { .. } => "chat",
            OutboundMessage::Typing => "typing",
            OutboundMessage::Focus { .. } => "focus",
        }
    }

    /// Recover relayed events from a frame that could not be sent
    pub fn into_events(self) -> Vec<RecordedEvent> {
        match self {
            OutboundMessage::Events { events } => events,
            _ => Vec::new(),
        }
    }

    /// Recover relayed logs from a frame that could not be sent
    pub fn into_logs(self) -> Vec<LogEntry> {
        match self {
            OutboundMessage::Logs { logs } => logs,
            _ => Vec::new(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Collector/agent → client commands
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundCommand {
    AgentConnected,
    AgentDisconnected,
    Highlight { x: f64, y: f64 },
    Cursor { x: f64, y: f64 },
    CursorHide,
    RemoteClick { x: f64, y: f64 },
    PenStart { x: f64, y: f64 },
    PenMove { x: f64, y: f64 },
    PenEnd { x: f64, y: f64 },
    StartChat,
    EndChat,
    Typing,
    Chat { message: String, from: String },
    RequestSnapshot,
}

impl InboundCommand {
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| EngineError::MalformedMessage(e.to_string()))
    }
}
