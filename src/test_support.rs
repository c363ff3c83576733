// src/test_support.rs
//! Shared fakes for unit tests

use crate::ingest::buffer::{BufferConfig, IngestBuffer, LiveChannel};
use crate::ingest::transport::{IngestPayload, PayloadHeader, PostOutcome, Transport};
use crate::live::annotations::{ChatMessage, LiveHost, Overlay, PointerEventKind};
use crate::live::protocol::{OutboundMessage, Point};
use crate::recording::RecordedEvent;
use crate::utils::clock::ManualClock;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub(crate) const TEST_START_MS: i64 = 1_700_000_000_000;

/// Incremental event stamped with `i`
pub(crate) fn event_at(i: i64) -> RecordedEvent {
    RecordedEvent::incremental(i, 2)
}

/// Let spawned tasks run
pub(crate) async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

pub(crate) fn test_header() -> PayloadHeader {
    PayloadHeader {
        identity: serde_json::json!({"user": "u-1"}),
        meta: serde_json::json!({"app": "test"}),
        launch_ts: TEST_START_MS,
    }
}

pub(crate) fn test_buffer(config: BufferConfig, transport: Arc<MockTransport>) -> IngestBuffer {
    IngestBuffer::new(
        config,
        test_header(),
        transport,
        Arc::new(ManualClock::new(TEST_START_MS)),
    )
}

/// Transport that records payloads and replays scripted outcomes
#[derive(Default)]
pub(crate) struct MockTransport {
    script: Mutex<VecDeque<PostOutcome>>,
    delay: Mutex<Option<Duration>>,
    posts: Mutex<Vec<IngestPayload>>,
    beacons: Mutex<Vec<IngestPayload>>,
}

impl MockTransport {
    /// Always delivers
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Plays `outcomes` in order, then delivers
    pub(crate) fn scripted(outcomes: Vec<PostOutcome>) -> Arc<Self> {
        let transport = Self::default();
        *transport.script.lock() = outcomes.into();
        Arc::new(transport)
    }

    pub(crate) fn with_delay(self: Arc<Self>, delay: Duration) -> Arc<Self> {
        *self.delay.lock() = Some(delay);
        self
    }

    pub(crate) fn post_count(&self) -> usize {
        self.posts.lock().len()
    }

    pub(crate) fn posts(&self) -> Vec<IngestPayload> {
        self.posts.lock().clone()
    }

    pub(crate) fn beacons(&self) -> Vec<IngestPayload> {
        self.beacons.lock().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn post(&self, _channel: &str, body: &IngestPayload) -> PostOutcome {
        self.posts.lock().push(body.clone());
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(PostOutcome::delivered)
    }

    fn beacon(&self, _channel: &str, body: &IngestPayload) -> bool {
        self.beacons.lock().push(body.clone());
        true
    }
}

/// Live channel that records frames instead of writing to a socket
pub(crate) struct FakeLiveChannel {
    connected: AtomicBool,
    sent: Mutex<Vec<OutboundMessage>>,
    upgrades: AtomicUsize,
}

impl FakeLiveChannel {
    fn with_state(connected: bool) -> Arc<Self> {
        Arc::new(Self {
            connected: AtomicBool::new(connected),
            sent: Mutex::new(Vec::new()),
            upgrades: AtomicUsize::new(0),
        })
    }

    pub(crate) fn connected() -> Arc<Self> {
        Self::with_state(true)
    }

    pub(crate) fn disconnected() -> Arc<Self> {
        Self::with_state(false)
    }

    pub(crate) fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub(crate) fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().clone()
    }

    pub(crate) fn upgrade_requests(&self) -> usize {
        self.upgrades.load(Ordering::SeqCst)
    }
}

impl LiveChannel for FakeLiveChannel {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn send(&self, message: OutboundMessage) -> Result<(), OutboundMessage> {
        if !self.is_connected() {
            return Err(message);
        }
        self.sent.lock().push(message);
        Ok(())
    }

    fn request_upgrade(self: Arc<Self>) {
        self.upgrades.fetch_add(1, Ordering::SeqCst);
    }
}

/// Overlay that records every call as a short string
#[derive(Default)]
pub(crate) struct RecordingOverlay {
    calls: Mutex<Vec<String>>,
}

impl RecordingOverlay {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub(crate) fn count(&self, prefix: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.starts_with(prefix)).count()
    }

    fn push(&self, call: String) {
        self.calls.lock().push(call);
    }
}

impl Overlay for RecordingOverlay {
    fn mount(&self) {
        self.push("mount".to_string());
    }

    fn unmount(&self) {
        self.push("unmount".to_string());
    }

    fn show_highlight(&self, id: u64, at: Point) {
        self.push(format!("highlight {} {},{}", id, at.x, at.y));
    }

    fn clear_highlight(&self, id: u64) {
        self.push(format!("clear_highlight {}", id));
    }

    fn move_cursor(&self, at: Point) {
        self.push(format!("cursor {},{}", at.x, at.y));
    }

    fn hide_cursor(&self) {
        self.push("hide_cursor".to_string());
    }

    fn draw_stroke(&self, id: u64, points: &[Point]) {
        self.push(format!("stroke {} {}", id, points.len()));
    }

    fn fade_stroke(&self, id: u64) {
        self.push(format!("fade_stroke {}", id));
    }

    fn set_chat_enabled(&self, enabled: bool) {
        self.push(format!("chat_enabled {}", enabled));
    }

    fn set_typing(&self, visible: bool) {
        self.push(format!("typing {}", visible));
    }
}

/// Host that records callbacks
#[derive(Default)]
pub(crate) struct RecordingHost {
    calls: Mutex<Vec<String>>,
    pointer: Mutex<Vec<(PointerEventKind, Point)>>,
}

impl RecordingHost {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub(crate) fn pointer_events(&self) -> Vec<(PointerEventKind, Point)> {
        self.pointer.lock().clone()
    }
}

impl LiveHost for RecordingHost {
    fn agent_connected(&self) {
        self.calls.lock().push("agent_connected".to_string());
    }

    fn agent_disconnected(&self) {
        self.calls.lock().push("agent_disconnected".to_string());
    }

    fn chat_received(&self, message: &ChatMessage) {
        self.calls
            .lock()
            .push(format!("chat {}: {}", message.from, message.message));
    }

    fn dispatch_pointer(&self, kind: PointerEventKind, at: Point) {
        self.pointer.lock().push((kind, at));
    }
}
