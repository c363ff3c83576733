// src/live/mod.rs
//! Live delivery: WebSocket link, wire protocol and annotation state

pub mod annotations;
pub mod link;
pub mod protocol;

pub use annotations::{Annotations, ChatMessage, LiveHost, NoopHost, NoopOverlay, Overlay, PointerEventKind};
pub use link::{LinkState, LiveConfig, LiveLink};
pub use protocol::{InboundCommand, OutboundMessage, Point};
