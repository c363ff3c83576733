// src/live/link.rs
//! Live link: upgraded WebSocket delivery and the annotation protocol
//!
//! # Architecture
//!
//! ```text
//!                  ┌──────────── LiveLink ─────────────┐
//! IngestBuffer ──→ │ send() ──→ mpsc ──→ writer task ──┼──→ socket
//! chat/typing ───→ │                                   │
//!                  │ reader task ←─────────────────────┼─── socket
//!                  │   └─→ handle_text → Annotations   │
//!                  │                   → LiveHost      │
//!                  │ heartbeat task ──→ focus frames   │
//!                  └───────────────────────────────────┘
//! ```
//!
//! States move `Disconnected → Connecting → Connected → Disconnected`. Every
//! frame goes through one unbounded channel, so frames leave in call order.
//! A generation counter fences off connect attempts and reader tasks that
//! were superseded by a `downgrade()`.

use crate::ingest::buffer::{IngestBuffer, LiveChannel};
use crate::ingest::lifecycle::{Lifecycle, LifecycleSignal};
use crate::ingest::transport::IngestEndpoint;
use crate::live::annotations::{Annotations, ChatMessage, LiveHost, Overlay, PointerEventKind};
use crate::live::protocol::{InboundCommand, OutboundMessage, Point};
use crate::observability::metrics;
use crate::utils::clock::Clock;
use crate::utils::errors::EngineError;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Live link settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    /// Mount the overlay as soon as the link connects
    pub mount_overlay: bool,

    /// Minimum spacing of outbound typing frames (milliseconds)
    pub typing_rate_limit_ms: u64,

    /// Inbound typing indicator lifetime (milliseconds)
    pub typing_indicator_ms: u64,

    /// Highlight marker lifetime (milliseconds)
    pub highlight_fade_ms: u64,

    /// Delay before a finished pen stroke fades (milliseconds)
    pub pen_fade_ms: u64,

    /// Visibility heartbeat period (milliseconds)
    pub focus_heartbeat_ms: u64,

    /// WebSocket handshake bound (milliseconds)
    pub connect_timeout_ms: u64,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            mount_overlay: true,
            typing_rate_limit_ms: 1000,
            typing_indicator_ms: 3000,
            highlight_fade_ms: 1500,
            pen_fade_ms: 2000,
            focus_heartbeat_ms: 2000,
            connect_timeout_ms: 10_000,
        }
    }
}

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

struct LinkShared {
    state: LinkState,
    generation: u64,
    writer: Option<mpsc::UnboundedSender<Message>>,
    shutdown: Option<CancellationToken>,
    last_typing_ms: Option<i64>,
}

struct LinkInner {
    config: LiveConfig,
    url: String,
    buffer: IngestBuffer,
    lifecycle: Lifecycle,
    clock: Arc<dyn Clock>,
    annotations: Annotations,
    host: Arc<dyn LiveHost>,
    shared: Mutex<LinkShared>,
}

/// Handle to the session's live link
#[derive(Clone)]
pub struct LiveLink {
    inner: Arc<LinkInner>,
}

impl LiveLink {
    /// Create a disconnected link and attach it to `buffer`
    pub fn new(
        endpoint: &IngestEndpoint,
        config: LiveConfig,
        buffer: IngestBuffer,
        lifecycle: Lifecycle,
        clock: Arc<dyn Clock>,
        overlay: Arc<dyn Overlay>,
        host: Arc<dyn LiveHost>,
    ) -> Self {
        let annotations = Annotations::new(&config, overlay, Arc::clone(&clock));
        let inner = Arc::new(LinkInner {
            config,
            url: endpoint.live_url(),
            buffer,
            lifecycle,
            clock,
            annotations,
            host,
            shared: Mutex::new(LinkShared {
                state: LinkState::Disconnected,
                generation: 0,
                writer: None,
                shutdown: None,
                last_typing_ms: None,
            }),
        });

        let channel: Weak<dyn LiveChannel> = Arc::downgrade(&inner) as Weak<dyn LiveChannel>;
        inner.buffer.attach_live(channel);

        Self { inner }
    }

    pub fn url(&self) -> &str {
        &self.inner.url
    }

    pub fn state(&self) -> LinkState {
        self.inner.shared.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == LinkState::Connected
    }

    pub fn annotations(&self) -> &Annotations {
        &self.inner.annotations
    }

    /// Start connecting; no-op when connected or connecting
    pub fn upgrade(&self) -> bool {
        Arc::clone(&self.inner).begin_connect()
    }

    /// Close the socket and tear down live state
    pub fn downgrade(&self) {
        self.inner.downgrade();
    }

    /// Send a chat message and add it to the history
    pub fn send_chat(&self, message: &str) -> bool {
        let sent = self
            .inner
            .send(OutboundMessage::Chat {
                message: message.to_string(),
            })
            .is_ok();
        if sent {
            self.inner.annotations.record_outgoing(message);
        }
        sent
    }

    /// Tell the agent the user is typing, at most once per rate-limit window
    pub fn notify_typing(&self) -> bool {
        let now = self.inner.clock.now_ms();
        let limit = self.inner.config.typing_rate_limit_ms as i64;
        {
            let shared = self.inner.shared.lock();
            if let Some(last) = shared.last_typing_ms {
                if now - last < limit {
                    return false;
                }
            }
        }

        if self.inner.send(OutboundMessage::Typing).is_err() {
            return false;
        }
        self.inner.shared.lock().last_typing_ms = Some(now);
        true
    }

    pub fn chat_history(&self) -> Vec<ChatMessage> {
        self.inner.annotations.chat_history()
    }
}

impl LinkInner {
    /// Move to `Connecting` and spawn the handshake
    fn begin_connect(self: Arc<Self>) -> bool {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("No runtime available; live link cannot connect");
            return false;
        };

        let generation = {
            let mut shared = self.shared.lock();
            if shared.state != LinkState::Disconnected {
                return false;
            }
            shared.state = LinkState::Connecting;
            shared.generation += 1;
            shared.generation
        };

        info!("Opening live link to {}", self.url);
        handle.spawn(self.connect(generation));
        true
    }

    async fn connect(self: Arc<Self>, generation: u64) {
        let timeout = Duration::from_millis(self.config.connect_timeout_ms);
        let stream = match tokio::time::timeout(timeout, connect_async(self.url.as_str())).await {
            Ok(Ok((stream, _response))) => stream,
            Ok(Err(e)) => {
                self.abandon_connect(generation, EngineError::LinkFailed(e.to_string()));
                return;
            }
            Err(_) => {
                self.abandon_connect(generation, EngineError::Timeout(timeout));
                return;
            }
        };

        let (mut sink, mut source) = stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        let shutdown = CancellationToken::new();

        let current = {
            let mut shared = self.shared.lock();
            let current = shared.generation == generation && shared.state == LinkState::Connecting;
            if current {
                shared.state = LinkState::Connected;
                shared.writer = Some(tx);
                shared.shutdown = Some(shutdown.clone());
            }
            current
        };

        if !current {
            debug!("Live link connect superseded; closing socket");
            let _ = sink.close().await;
            return;
        }

        info!("Live link connected");

        // Writer
        let writer_shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = writer_shutdown.cancelled() => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                    next = rx.recv() => match next {
                        Some(message) => {
                            if let Err(e) = sink.send(message).await {
                                warn!("Live link write failed: {}", e);
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
            let _ = sink.close().await;
        });

        // Reader
        let reader = Arc::clone(&self);
        let reader_shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = reader_shutdown.cancelled() => break,
                    next = source.next() => match next {
                        Some(Ok(Message::Text(text))) => reader.handle_text(text.as_str()),
                        Some(Ok(Message::Close(_))) | None => {
                            debug!("Live link closed by peer");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!("Live link read failed: {}", e);
                            break;
                        }
                    },
                }
            }
            reader.on_closed(generation);
        });

        self.spawn_heartbeat(shutdown);

        self.buffer.set_live_mode(true);
        if self.config.mount_overlay {
            self.annotations.mount();
        }
    }

    /// Report visibility changes as `focus` frames; the periodic tick
    /// reconciles after a lagged subscription
    fn spawn_heartbeat(self: &Arc<Self>, shutdown: CancellationToken) {
        let heartbeat: Weak<LinkInner> = Arc::downgrade(self);
        let period = Duration::from_millis(self.config.focus_heartbeat_ms);
        let mut signals = self.lifecycle.subscribe();
        let mut last_visible = self.lifecycle.is_visible();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                let visible = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    signal = signals.recv() => match signal {
                        Ok(LifecycleSignal::Hidden) => Some(false),
                        Ok(LifecycleSignal::Visible) => Some(true),
                        Ok(LifecycleSignal::Teardown) => continue,
                        Err(RecvError::Lagged(skipped)) => {
                            debug!("Heartbeat lagged by {} lifecycle signals", skipped);
                            None
                        }
                        Err(RecvError::Closed) => break,
                    },
                    _ = interval.tick() => None,
                };

                let Some(link) = heartbeat.upgrade() else { break };
                let visible = visible.unwrap_or_else(|| link.lifecycle.is_visible());
                if visible != last_visible {
                    last_visible = visible;
                    let _ = link.send(OutboundMessage::Focus { visible });
                }
            }
        });
    }

    fn abandon_connect(&self, generation: u64, error: EngineError) {
        warn!("Live link connect failed: {}", error);
        let mut shared = self.shared.lock();
        if shared.generation == generation && shared.state == LinkState::Connecting {
            shared.state = LinkState::Disconnected;
        }
    }

    /// Reader exit path; a stale generation means downgrade already ran
    fn on_closed(&self, generation: u64) {
        {
            let mut shared = self.shared.lock();
            if shared.generation != generation || shared.state != LinkState::Connected {
                return;
            }
            shared.state = LinkState::Disconnected;
            shared.writer = None;
            if let Some(token) = shared.shutdown.take() {
                token.cancel();
            }
        }

        info!("Live link disconnected");
        self.teardown();
    }

    fn downgrade(&self) {
        let previous = {
            let mut shared = self.shared.lock();
            let previous = shared.state;
            shared.state = LinkState::Disconnected;
            shared.generation += 1;
            shared.writer = None;
            if let Some(token) = shared.shutdown.take() {
                token.cancel();
            }
            previous
        };

        match previous {
            LinkState::Connected => {
                info!("Live link downgraded");
                self.teardown();
            }
            LinkState::Connecting => debug!("Live link connect cancelled"),
            LinkState::Disconnected => {}
        }
    }

    fn teardown(&self) {
        self.buffer.set_live_mode(false);
        self.annotations.teardown();
    }

    fn handle_text(&self, text: &str) {
        let command = match InboundCommand::parse(text) {
            Ok(command) => command,
            Err(e) => {
                debug!("Ignoring live message: {}", e);
                metrics::record_malformed_message();
                return;
            }
        };

        metrics::record_live_message("inbound");
        self.dispatch(command);
    }

    fn dispatch(&self, command: InboundCommand) {
        match command {
            InboundCommand::AgentConnected => {
                info!("Agent joined the live session");
                self.host.agent_connected();
                self.annotations.mount();
            }
            InboundCommand::AgentDisconnected => {
                info!("Agent left the live session");
                self.host.agent_disconnected();
                self.downgrade();
            }
            InboundCommand::Highlight { x, y } => {
                self.annotations.highlight(Point::new(x, y));
            }
            InboundCommand::Cursor { x, y } => self.annotations.move_cursor(Point::new(x, y)),
            InboundCommand::CursorHide => self.annotations.hide_cursor(),
            InboundCommand::RemoteClick { x, y } => {
                let at = Point::new(x, y);
                self.annotations.highlight(at);
                for kind in [
                    PointerEventKind::MouseDown,
                    PointerEventKind::MouseUp,
                    PointerEventKind::Click,
                ] {
                    self.host.dispatch_pointer(kind, at);
                }
            }
            InboundCommand::PenStart { x, y } => self.annotations.pen_start(Point::new(x, y)),
            InboundCommand::PenMove { x, y } => self.annotations.pen_move(Point::new(x, y)),
            InboundCommand::PenEnd { x, y } => self.annotations.pen_end(Point::new(x, y)),
            InboundCommand::StartChat => self.annotations.set_chat_enabled(true),
            InboundCommand::EndChat => self.annotations.set_chat_enabled(false),
            InboundCommand::Typing => self.annotations.show_typing(),
            InboundCommand::Chat { message, from } => {
                let entry = self.annotations.receive_chat(&from, &message);
                self.host.chat_received(&entry);
            }
            InboundCommand::RequestSnapshot => {
                info!("Agent requested a full snapshot");
                self.buffer.request_full_snapshot();
            }
        }
    }
}

impl LiveChannel for LinkInner {
    fn is_connected(&self) -> bool {
        self.shared.lock().state == LinkState::Connected
    }

    fn send(&self, message: OutboundMessage) -> Result<(), OutboundMessage> {
        let shared = self.shared.lock();
        let Some(writer) = shared.writer.as_ref().filter(|_| shared.state == LinkState::Connected)
        else {
            return Err(message);
        };

        let text = match message.to_json() {
            Ok(text) => text,
            Err(e) => {
                warn!("Failed to encode live frame: {}", e);
                return Err(message);
            }
        };

        let direction = message.direction_label();
        if writer.send(Message::Text(text.into())).is_err() {
            return Err(message);
        }
        metrics::record_live_message(direction);
        Ok(())
    }

    fn request_upgrade(self: Arc<Self>) {
        self.begin_connect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::buffer::BufferConfig;
    use crate::test_support::{event_at, test_buffer, MockTransport, RecordingHost, RecordingOverlay};
    use crate::utils::clock::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Harness {
        link: LiveLink,
        buffer: IngestBuffer,
        frames: mpsc::UnboundedReceiver<Message>,
        overlay: Arc<RecordingOverlay>,
        host: Arc<RecordingHost>,
        clock: Arc<ManualClock>,
        lifecycle: Lifecycle,
    }

    fn harness() -> Harness {
        let buffer = test_buffer(BufferConfig::default(), MockTransport::new());
        let overlay = RecordingOverlay::new();
        let host = RecordingHost::new();
        let clock = Arc::new(ManualClock::new(10_000));
        let lifecycle = Lifecycle::new();
        let link = LiveLink::new(
            &IngestEndpoint::new("http://127.0.0.1:1", "acme", "s-1"),
            LiveConfig::default(),
            buffer.clone(),
            lifecycle.clone(),
            clock.clone(),
            overlay.clone(),
            host.clone(),
        );

        // Stand in for a completed handshake
        let (tx, frames) = mpsc::unbounded_channel();
        {
            let mut shared = link.inner.shared.lock();
            shared.state = LinkState::Connected;
            shared.generation = 1;
            shared.writer = Some(tx);
            shared.shutdown = Some(CancellationToken::new());
        }
        buffer.set_live_mode(true);
        link.inner.annotations.mount();

        Harness {
            link,
            buffer,
            frames,
            overlay,
            host,
            clock,
            lifecycle,
        }
    }

    fn frame_types(frames: &mut mpsc::UnboundedReceiver<Message>) -> Vec<String> {
        let mut types = Vec::new();
        while let Ok(Message::Text(text)) = frames.try_recv() {
            let value: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
            types.push(value["type"].as_str().unwrap().to_string());
        }
        types
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_pushes_bypass_queue() {
        let mut h = harness();

        h.buffer.push_event(event_at(1));
        h.buffer.log(crate::recording::LogLevel::Info, "nav", "opened", None);

        assert_eq!(h.buffer.queued_events(), 0);
        assert_eq!(frame_types(&mut h.frames), vec!["events", "logs"]);
    }

    fn focus_frames(frames: &mut mpsc::UnboundedReceiver<Message>) -> Vec<bool> {
        let mut visible = Vec::new();
        while let Ok(Message::Text(text)) = frames.try_recv() {
            let value: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
            if value["type"] == "focus" {
                visible.push(value["visible"].as_bool().unwrap());
            }
        }
        visible
    }

    #[tokio::test(start_paused = true)]
    async fn test_focus_reports_every_visibility_change() {
        let mut h = harness();
        let shutdown = CancellationToken::new();
        h.link.inner.spawn_heartbeat(shutdown.clone());
        tokio::task::yield_now().await;

        // Both changes land well inside one heartbeat period
        h.lifecycle.emit(LifecycleSignal::Hidden);
        h.lifecycle.emit(LifecycleSignal::Visible);
        h.lifecycle.emit(LifecycleSignal::Visible);
        h.lifecycle.emit(LifecycleSignal::Teardown);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(focus_frames(&mut h.frames), vec![false, true]);

        tokio::time::sleep(Duration::from_millis(5_000)).await;
        assert!(focus_frames(&mut h.frames).is_empty());

        shutdown.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_frames_are_ignored() {
        let h = harness();

        h.link.inner.handle_text("{not json");
        h.link.inner.handle_text(r#"{"type":"warp_drive"}"#);
        h.link.inner.handle_text(r#"{"type":"cursor","x":"nope"}"#);

        assert!(h.link.is_connected());
        assert!(h.host.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_click_highlights_and_dispatches() {
        let h = harness();

        h.link.inner.handle_text(r#"{"type":"remote_click","x":40,"y":80}"#);

        let kinds: Vec<PointerEventKind> = h.host.pointer_events().iter().map(|(k, _)| *k).collect();
        assert_eq!(
            kinds,
            vec![
                PointerEventKind::MouseDown,
                PointerEventKind::MouseUp,
                PointerEventKind::Click
            ]
        );
        assert_eq!(h.host.pointer_events()[0].1, Point::new(40.0, 80.0));
        assert_eq!(h.overlay.count("highlight"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_chat_protocol() {
        let mut h = harness();

        h.link.inner.handle_text(r#"{"type":"start_chat"}"#);
        assert!(h.link.annotations().chat_enabled());

        h.link.inner.handle_text(r#"{"type":"typing"}"#);
        assert!(h.link.annotations().typing_visible());
        h.link.inner.handle_text(r#"{"type":"chat","message":"need help?","from":"agent"}"#);
        assert!(!h.link.annotations().typing_visible());
        assert_eq!(h.host.calls(), vec!["chat agent: need help?".to_string()]);

        assert!(h.link.send_chat("yes please"));
        let history = h.link.chat_history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].from, "user");
        assert_eq!(frame_types(&mut h.frames), vec!["chat"]);

        h.link.inner.handle_text(r#"{"type":"end_chat"}"#);
        assert!(!h.link.annotations().chat_enabled());
        assert_eq!(h.link.chat_history().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_typing_is_rate_limited() {
        let mut h = harness();

        assert!(h.link.notify_typing());
        h.clock.advance(400);
        assert!(!h.link.notify_typing());
        h.clock.advance(600);
        assert!(h.link.notify_typing());

        assert_eq!(frame_types(&mut h.frames), vec!["typing", "typing"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_snapshot_reaches_producer() {
        let h = harness();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        h.buffer.set_resync_handler(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        h.link.inner.handle_text(r#"{"type":"request_snapshot"}"#);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_agent_disconnect_downgrades() {
        let h = harness();
        h.link.inner.handle_text(r#"{"type":"start_chat"}"#);
        h.link.inner.handle_text(r#"{"type":"chat","message":"bye","from":"agent"}"#);

        h.link.inner.handle_text(r#"{"type":"agent_disconnected"}"#);

        assert_eq!(h.link.state(), LinkState::Disconnected);
        assert!(!h.buffer.is_live());
        assert!(!h.link.annotations().is_mounted());
        assert!(!h.link.annotations().chat_enabled());
        assert_eq!(h.link.chat_history().len(), 1);
        assert_eq!(h.host.calls()[1], "agent_disconnected");

        // Data queues again once the link is gone
        h.buffer.push_event(event_at(5));
        assert_eq!(h.buffer.queued_events(), 1);
        assert!(!h.link.send_chat("anyone?"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_reader_close_is_ignored() {
        let h = harness();

        h.link.downgrade();
        let teardowns = h.overlay.count("unmount");

        // A reader from the downgraded connection exits late
        h.link.inner.on_closed(1);
        assert_eq!(h.overlay.count("unmount"), teardowns);
        assert_eq!(h.link.state(), LinkState::Disconnected);
    }

    #[tokio::test]
    async fn test_upgrade_is_idempotent() {
        let buffer = test_buffer(BufferConfig::default(), MockTransport::new());
        let link = LiveLink::new(
            &IngestEndpoint::new("http://127.0.0.1:1", "acme", "s-1"),
            LiveConfig::default(),
            buffer.clone(),
            Lifecycle::new(),
            Arc::new(ManualClock::new(0)),
            Arc::new(crate::live::annotations::NoopOverlay),
            Arc::new(crate::live::annotations::NoopHost),
        );

        assert_eq!(link.url(), "ws://127.0.0.1:1/v1/ingest/s-1/live");
        assert!(link.upgrade());
        assert!(!link.upgrade());

        // Nothing listens on port 1
        for _ in 0..50 {
            if link.state() == LinkState::Disconnected {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(link.state(), LinkState::Disconnected);
        assert!(!buffer.is_live());
    }
}
