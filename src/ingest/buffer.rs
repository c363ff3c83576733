// src/ingest/buffer.rs
//! Ingest buffer: queueing, flush policy and batch/live routing
//!
//! Owns the event and log queues for one session and decides when and how
//! they leave the client:
//!
//! ```text
//! push_event ─┬─ live mode + link up ──────────────→ LiveChannel::send
//!             └─ event queue ── ≥ max_events ─┐
//!                              timer tick ────┼─→ flush() ─┬─ link up → LiveChannel
//!                              overflow ──────┘            └─ Transport::post
//! ```
//!
//! Failed batches go back to the front of their queue. After
//! `max_consecutive_failures` failures in a row the event batch is dropped
//! and the producer is asked for a full snapshot on the next success.

use crate::ingest::transport::{IngestPayload, PayloadHeader, PostOutcome, Transport, DATA_CHANNEL};
use crate::live::protocol::OutboundMessage;
use crate::observability::metrics::{self, FlushOutcomeLabel};
use crate::recording::{LogEntry, LogLevel, QueueStats, RecordQueue, RecordedEvent};
use crate::utils::clock::Clock;
use crate::utils::errors::{EngineError, Result};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Buffer thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Queued events that trigger a flush
    pub max_events: usize,

    /// Queued events that force a flush and a resync request
    pub overflow_events: usize,

    /// Hard cap of the log queue (oldest evicted first)
    pub max_log_queue: usize,

    /// Periodic flush interval (milliseconds)
    pub flush_interval_ms: u64,

    /// Consecutive failures before the event batch is dropped
    pub max_consecutive_failures: u32,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            max_events: 50,
            overflow_events: 500,
            max_log_queue: 1500,
            flush_interval_ms: 5000,
            max_consecutive_failures: 3,
        }
    }
}

impl BufferConfig {
    /// Validate buffer thresholds
    pub fn validate(&self) -> Result<()> {
        if self.max_events == 0 {
            return Err(EngineError::ConfigError("max_events cannot be 0".to_string()));
        }
        if self.overflow_events < self.max_events {
            return Err(EngineError::ConfigError(
                "overflow_events cannot be below max_events".to_string(),
            ));
        }
        if self.max_log_queue == 0 {
            return Err(EngineError::ConfigError("max_log_queue cannot be 0".to_string()));
        }
        if self.flush_interval_ms == 0 {
            return Err(EngineError::ConfigError(
                "flush_interval_ms cannot be 0".to_string(),
            ));
        }
        if self.max_consecutive_failures == 0 {
            return Err(EngineError::ConfigError(
                "max_consecutive_failures cannot be 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// The live side of the buffer, implemented by the live link
pub trait LiveChannel: Send + Sync {
    /// Socket is open and accepting frames
    fn is_connected(&self) -> bool;

    /// Queue a frame on the socket; hands the frame back if it cannot
    fn send(&self, message: OutboundMessage) -> std::result::Result<(), OutboundMessage>;

    /// Start connecting unless already connected or connecting
    fn request_upgrade(self: Arc<Self>);
}

/// Called when the producer should emit a fresh full snapshot
pub type ResyncHandler = Arc<dyn Fn() + Send + Sync>;

/// Route a batch left the buffer through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Http,
    Live,
}

/// Result of a flush attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Already flushing or nothing queued
    Skipped,

    /// Batch accepted
    Delivered {
        events: usize,
        logs: usize,
        route: Route,
    },

    /// Batch failed and went back to the front of the queues
    Requeued {
        events: usize,
        logs: usize,
        consecutive_failures: u32,
    },

    /// Batch failed too often; events dropped, logs re-queued
    Dropped { events: usize, logs_requeued: usize },

    /// Response arrived after the buffer was stopped
    Ignored,
}

/// Buffer statistics
#[derive(Debug, Clone, Default)]
pub struct BufferStats {
    pub events: QueueStats,
    pub logs: QueueStats,
    pub consecutive_failures: u32,
    pub needs_full_snapshot: bool,
    pub live_mode: bool,
    pub is_flushing: bool,
    pub flushes_delivered: u64,
    pub flushes_failed: u64,
    pub batches_dropped: u64,
}

#[derive(Debug)]
struct BufferState {
    event_queue: RecordQueue<RecordedEvent>,
    log_queue: RecordQueue<LogEntry>,
    is_flushing: bool,
    flush_scheduled: bool,
    consecutive_failures: u32,
    needs_full_snapshot: bool,
    live_mode: bool,
    flushes_delivered: u64,
    flushes_failed: u64,
    batches_dropped: u64,
}

struct BufferInner {
    config: BufferConfig,
    header: PayloadHeader,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    state: Mutex<BufferState>,
    live: RwLock<Option<Weak<dyn LiveChannel>>>,
    resync: RwLock<Option<ResyncHandler>>,
    timer: Mutex<Option<CancellationToken>>,
    started: AtomicBool,
    stopped: AtomicBool,
}

/// Handle to the session's ingest buffer; clones share state
#[derive(Clone)]
pub struct IngestBuffer {
    inner: Arc<BufferInner>,
}

impl IngestBuffer {
    /// Create a buffer; call [`IngestBuffer::start`] to arm the timer
    pub fn new(
        config: BufferConfig,
        header: PayloadHeader,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let state = BufferState {
            event_queue: RecordQueue::unbounded(),
            log_queue: RecordQueue::bounded(config.max_log_queue),
            is_flushing: false,
            flush_scheduled: false,
            consecutive_failures: 0,
            needs_full_snapshot: false,
            live_mode: false,
            flushes_delivered: 0,
            flushes_failed: 0,
            batches_dropped: 0,
        };

        Self {
            inner: Arc::new(BufferInner {
                config,
                header,
                transport,
                clock,
                state: Mutex::new(state),
                live: RwLock::new(None),
                resync: RwLock::new(None),
                timer: Mutex::new(None),
                started: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &BufferConfig {
        &self.inner.config
    }

    /// Attach the live link (held weakly)
    pub fn attach_live(&self, channel: Weak<dyn LiveChannel>) {
        *self.inner.live.write() = Some(channel);
    }

    /// Install the callback that asks the producer for a full snapshot
    pub fn set_resync_handler(&self, handler: ResyncHandler) {
        *self.inner.resync.write() = Some(handler);
    }

    fn live_channel(&self) -> Option<Arc<dyn LiveChannel>> {
        self.inner.live.read().as_ref().and_then(Weak::upgrade)
    }

    fn connected_live(&self) -> Option<Arc<dyn LiveChannel>> {
        self.live_channel().filter(|channel| channel.is_connected())
    }

    /// Arm the periodic flush timer
    pub fn start(&self) {
        if self.inner.stopped.load(Ordering::SeqCst) {
            return;
        }
        self.inner.started.store(true, Ordering::SeqCst);
        if !self.inner.state.lock().live_mode {
            self.start_timer();
        }
    }

    fn start_timer(&self) {
        let mut timer = self.inner.timer.lock();
        if timer.is_some() {
            return;
        }

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("No runtime available; periodic flush disabled");
            return;
        };

        let token = CancellationToken::new();
        let cancelled = token.clone();
        let weak = Arc::downgrade(&self.inner);
        let period = Duration::from_millis(self.inner.config.flush_interval_ms);

        handle.spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = interval.tick() => {
                        let Some(inner) = weak.upgrade() else { break };
                        IngestBuffer { inner }.flush().await;
                    }
                }
            }
        });

        debug!("Periodic flush armed every {:?}", period);
        *timer = Some(token);
    }

    fn stop_timer(&self) {
        if let Some(token) = self.inner.timer.lock().take() {
            token.cancel();
        }
    }

    /// Record an event
    pub fn push_event(&self, event: RecordedEvent) {
        if self.inner.stopped.load(Ordering::SeqCst) {
            return;
        }

        let events = match self.try_send_live(OutboundMessage::Events {
            events: vec![event],
        }) {
            Ok(()) => return,
            Err(message) => message.into_events(),
        };

        let (depth, trigger, live_backlog) = {
            let mut state = self.inner.state.lock();
            for event in events {
                state.event_queue.push(event);
            }

            let depth = state.event_queue.len();
            if depth >= self.inner.config.overflow_events && !state.needs_full_snapshot {
                warn!(
                    "Event queue overflow ({} events); requesting full snapshot after next delivery",
                    depth
                );
                state.needs_full_snapshot = true;
            }

            let trigger = depth >= self.inner.config.max_events
                && !state.is_flushing
                && !state.flush_scheduled;
            if trigger {
                state.flush_scheduled = true;
            }
            (depth, trigger, state.live_mode && !state.is_flushing)
        };

        metrics::record_event_queue_depth(depth);
        if live_backlog {
            self.drain_to_live();
        }
        if trigger {
            self.spawn_flush();
        }
    }

    /// Record a log entry
    pub fn push_log(&self, entry: LogEntry) {
        if self.inner.stopped.load(Ordering::SeqCst) {
            return;
        }

        let logs = match self.try_send_live(OutboundMessage::Logs { logs: vec![entry] }) {
            Ok(()) => return,
            Err(message) => message.into_logs(),
        };

        let mut evicted = 0;
        let live_backlog = {
            let mut state = self.inner.state.lock();
            for entry in logs {
                evicted += state.log_queue.push(entry);
            }
            state.live_mode && !state.is_flushing
        };
        metrics::record_logs_evicted(evicted);
        if live_backlog {
            self.drain_to_live();
        }
    }

    /// Stamp and record a log entry
    pub fn log(
        &self,
        level: LogLevel,
        scope: &str,
        message: &str,
        data: Option<Map<String, Value>>,
    ) {
        let mut entry = LogEntry::new(self.inner.clock.now_ms(), level, scope, message);
        entry.data = data;
        self.push_log(entry);
    }

    /// Send straight over the link when live and nothing older is pending;
    /// otherwise hand the frame back to be queued
    fn try_send_live(&self, message: OutboundMessage) -> std::result::Result<(), OutboundMessage> {
        let state = self.inner.state.lock();
        if !state.live_mode
            || state.is_flushing
            || !state.event_queue.is_empty()
            || !state.log_queue.is_empty()
        {
            return Err(message);
        }
        // Sent under the state lock so a concurrent drain cannot interleave
        match self.connected_live() {
            Some(channel) => channel.send(message),
            None => Err(message),
        }
    }

    fn spawn_flush(&self) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let buffer = self.clone();
                handle.spawn(async move {
                    buffer.flush().await;
                });
            }
            Err(_) => {
                self.inner.state.lock().flush_scheduled = false;
                debug!("No runtime available; flush left to the timer");
            }
        }
    }

    /// Deliver everything queued
    pub async fn flush(&self) -> FlushOutcome {
        let (events, logs) = {
            let mut state = self.inner.state.lock();
            state.flush_scheduled = false;
            if state.is_flushing || (state.event_queue.is_empty() && state.log_queue.is_empty()) {
                return FlushOutcome::Skipped;
            }
            state.is_flushing = true;
            (state.event_queue.drain_all(), state.log_queue.drain_all())
        };

        let event_count = events.len();
        let log_count = logs.len();

        let (events, logs) = match self.connected_live() {
            Some(channel) => match relay(channel.as_ref(), events, logs) {
                Ok(()) => {
                    debug!("Relayed {} events and {} logs over live link", event_count, log_count);
                    return self.finish_success(PostOutcome::delivered(), event_count, log_count, Route::Live);
                }
                Err(returned) => returned,
            },
            None => (events, logs),
        };

        debug!("Flushing {} events and {} logs", events.len(), logs.len());
        let payload = self.payload(events, logs);
        let outcome = self.inner.transport.post(DATA_CHANNEL, &payload).await;

        if outcome.ok {
            self.finish_success(outcome, event_count, log_count, Route::Http)
        } else {
            self.finish_failure(payload.events, payload.logs)
        }
    }

    fn finish_success(
        &self,
        outcome: PostOutcome,
        events: usize,
        logs: usize,
        route: Route,
    ) -> FlushOutcome {
        let stopped = self.inner.stopped.load(Ordering::SeqCst);
        let (resync, live_mode) = {
            let mut state = self.inner.state.lock();
            state.is_flushing = false;
            state.consecutive_failures = 0;
            state.flushes_delivered += 1;
            if stopped {
                (false, false)
            } else {
                (std::mem::take(&mut state.needs_full_snapshot), state.live_mode)
            }
        };

        metrics::record_flush(FlushOutcomeLabel::Delivered);
        if stopped {
            return FlushOutcome::Delivered { events, logs, route };
        }

        if outcome.upgrade {
            match self.live_channel() {
                Some(channel) if !channel.is_connected() => {
                    info!("Collector requested live delivery; upgrading");
                    channel.request_upgrade();
                }
                Some(_) => {}
                None => debug!("Collector requested live delivery but no live link is attached"),
            }
        }

        if resync {
            info!("Delivery recovered; requesting full snapshot");
            self.request_full_snapshot();
        }

        if live_mode {
            self.drain_to_live();
        }

        FlushOutcome::Delivered { events, logs, route }
    }

    fn finish_failure(&self, events: Vec<RecordedEvent>, logs: Vec<LogEntry>) -> FlushOutcome {
        let event_count = events.len();
        let log_count = logs.len();

        let (outcome, evicted, live_mode) = {
            let mut state = self.inner.state.lock();
            state.is_flushing = false;

            if self.inner.stopped.load(Ordering::SeqCst) {
                debug!("Discarding failed batch returned after stop");
                return FlushOutcome::Ignored;
            }

            state.consecutive_failures += 1;
            state.flushes_failed += 1;
            let failures = state.consecutive_failures;

            let evicted = state.log_queue.requeue_front(logs);

            let outcome = if failures >= self.inner.config.max_consecutive_failures {
                state.consecutive_failures = 0;
                state.needs_full_snapshot = true;
                state.batches_dropped += 1;
                warn!(
                    "Flush failed {} times in a row; dropping {} events and requesting resync",
                    failures, event_count
                );
                FlushOutcome::Dropped {
                    events: event_count,
                    logs_requeued: log_count,
                }
            } else {
                state.event_queue.requeue_front(events);
                warn!(
                    "Flush failed ({} consecutive); re-queued {} events and {} logs",
                    failures, event_count, log_count
                );
                FlushOutcome::Requeued {
                    events: event_count,
                    logs: log_count,
                    consecutive_failures: failures,
                }
            };

            (outcome, evicted, state.live_mode)
        };

        metrics::record_logs_evicted(evicted);
        match outcome {
            FlushOutcome::Dropped { events, .. } => {
                metrics::record_flush(FlushOutcomeLabel::Dropped);
                metrics::record_events_dropped(events);
            }
            _ => metrics::record_flush(FlushOutcomeLabel::Requeued),
        }

        if live_mode {
            self.drain_to_live();
        }

        outcome
    }

    /// Synchronously move everything queued onto the live link
    fn drain_to_live(&self) {
        let Some(channel) = self.connected_live() else {
            return;
        };

        let mut state = self.inner.state.lock();
        if state.is_flushing {
            // The in-flight flush drains again when it completes
            return;
        }
        if state.event_queue.is_empty() && state.log_queue.is_empty() {
            return;
        }

        let events = state.event_queue.drain_all();
        let logs = state.log_queue.drain_all();
        let event_count = events.len();
        let log_count = logs.len();

        // Relayed under the state lock; pushes only bypass an empty queue
        match relay(channel.as_ref(), events, logs) {
            Ok(()) => {
                debug!(
                    "Drained {} events and {} logs onto live link",
                    event_count, log_count
                );
            }
            Err((events, logs)) => {
                state.event_queue.requeue_front(events);
                state.log_queue.requeue_front(logs);
            }
        }
    }

    /// Fire-and-forget flush for teardown; never retried
    pub fn flush_beacon(&self) -> bool {
        let (events, logs) = {
            let mut state = self.inner.state.lock();
            if state.event_queue.is_empty() && state.log_queue.is_empty() {
                return false;
            }
            let events = state.event_queue.drain_all();
            let logs = state.log_queue.drain_all();
            match self.connected_live() {
                Some(channel) => match relay(channel.as_ref(), events, logs) {
                    Ok(()) => return true,
                    Err(returned) => returned,
                },
                None => (events, logs),
            }
        };

        let event_count = events.len();
        let payload = self.payload(events, logs);
        let issued = self.inner.transport.beacon(DATA_CHANNEL, &payload);

        metrics::record_flush(FlushOutcomeLabel::Beacon);
        if issued {
            debug!("Beacon issued with {} events", event_count);
        } else {
            warn!("Beacon with {} events could not be issued", event_count);
        }
        issued
    }

    /// Switch between batched and live delivery
    pub fn set_live_mode(&self, enabled: bool) {
        if enabled {
            self.stop_timer();
            let was_live = std::mem::replace(&mut self.inner.state.lock().live_mode, true);
            if !was_live {
                info!("Entering live mode");
            }
            self.drain_to_live();
        } else {
            let was_live = std::mem::replace(&mut self.inner.state.lock().live_mode, false);
            if was_live {
                info!("Leaving live mode");
            }
            if self.inner.started.load(Ordering::SeqCst) && !self.inner.stopped.load(Ordering::SeqCst) {
                self.start_timer();
            }
        }
    }

    /// Stop the timer and beacon whatever is left
    pub fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.stop_timer();
        self.flush_beacon();
        info!("Ingest buffer stopped");
    }

    /// Ask the producer for a fresh full snapshot
    pub fn request_full_snapshot(&self) {
        let handler = self.inner.resync.read().clone();
        match handler {
            Some(handler) => handler(),
            None => debug!("Full snapshot requested but no producer is attached"),
        }
    }

    fn payload(&self, events: Vec<RecordedEvent>, logs: Vec<LogEntry>) -> IngestPayload {
        IngestPayload {
            header: self.inner.header.clone(),
            events,
            logs,
        }
    }

    pub fn is_live(&self) -> bool {
        self.inner.state.lock().live_mode
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    pub fn needs_full_snapshot(&self) -> bool {
        self.inner.state.lock().needs_full_snapshot
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner.state.lock().consecutive_failures
    }

    pub fn queued_events(&self) -> usize {
        self.inner.state.lock().event_queue.len()
    }

    pub fn queued_logs(&self) -> usize {
        self.inner.state.lock().log_queue.len()
    }

    /// Get buffer statistics
    pub fn stats(&self) -> BufferStats {
        let state = self.inner.state.lock();
        BufferStats {
            events: state.event_queue.stats(),
            logs: state.log_queue.stats(),
            consecutive_failures: state.consecutive_failures,
            needs_full_snapshot: state.needs_full_snapshot,
            live_mode: state.live_mode,
            is_flushing: state.is_flushing,
            flushes_delivered: state.flushes_delivered,
            flushes_failed: state.flushes_failed,
            batches_dropped: state.batches_dropped,
        }
    }
}

/// Send events then logs; on refusal returns whatever was not sent
fn relay(
    channel: &dyn LiveChannel,
    events: Vec<RecordedEvent>,
    logs: Vec<LogEntry>,
) -> std::result::Result<(), (Vec<RecordedEvent>, Vec<LogEntry>)> {
    if !events.is_empty() {
        if let Err(message) = channel.send(OutboundMessage::Events { events }) {
            return Err((message.into_events(), logs));
        }
    }
    if !logs.is_empty() {
        if let Err(message) = channel.send(OutboundMessage::Logs { logs }) {
            return Err((Vec::new(), message.into_logs()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{event_at, settle, test_buffer, FakeLiveChannel, MockTransport};
    use std::sync::atomic::AtomicUsize;

    fn resync_counter(buffer: &IngestBuffer) -> Arc<AtomicUsize> {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        buffer.set_resync_handler(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        calls
    }

    #[tokio::test(start_paused = true)]
    async fn test_below_threshold_waits_for_timer() {
        let transport = MockTransport::new();
        let buffer = test_buffer(BufferConfig::default(), transport.clone());
        buffer.start();

        for i in 0..49 {
            buffer.push_event(event_at(i));
        }
        tokio::time::sleep(Duration::from_millis(4_900)).await;
        assert_eq!(transport.post_count(), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(transport.post_count(), 1);
        assert_eq!(transport.posts()[0].events.len(), 49);
    }

    #[tokio::test(start_paused = true)]
    async fn test_threshold_triggers_single_flush() {
        let transport = MockTransport::new();
        let buffer = test_buffer(BufferConfig::default(), transport.clone());

        for i in 0..50 {
            buffer.push_event(event_at(i));
        }
        settle().await;

        assert_eq!(transport.post_count(), 1);
        assert_eq!(transport.posts()[0].events.len(), 50);
        assert_eq!(buffer.queued_events(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_log_queue_evicts_oldest() {
        let transport = MockTransport::new();
        let buffer = test_buffer(BufferConfig::default(), transport.clone());

        for i in 0..1600 {
            buffer.push_log(LogEntry::new(i, LogLevel::Info, "test", format!("entry {}", i)));
        }
        assert_eq!(buffer.queued_logs(), 1500);
        assert_eq!(buffer.stats().logs.evict_count, 100);

        buffer.flush().await;
        let logs = &transport.posts()[0].logs;
        assert_eq!(logs.len(), 1500);
        assert_eq!(logs[0].timestamp_ms, 100);
        assert_eq!(logs[1499].timestamp_ms, 1599);
    }

    #[tokio::test(start_paused = true)]
    async fn test_third_failure_drops_batch_and_requests_resync() {
        let transport = MockTransport::scripted(vec![
            PostOutcome::failed(),
            PostOutcome::failed(),
            PostOutcome::failed(),
            PostOutcome::delivered(),
        ]);
        let buffer = test_buffer(BufferConfig::default(), transport.clone());
        let resyncs = resync_counter(&buffer);

        for i in 0..10 {
            buffer.push_event(event_at(i));
        }

        assert!(matches!(
            buffer.flush().await,
            FlushOutcome::Requeued { events: 10, consecutive_failures: 1, .. }
        ));
        assert!(matches!(
            buffer.flush().await,
            FlushOutcome::Requeued { events: 10, consecutive_failures: 2, .. }
        ));
        assert_eq!(
            buffer.flush().await,
            FlushOutcome::Dropped { events: 10, logs_requeued: 0 }
        );
        assert!(buffer.needs_full_snapshot());
        assert_eq!(buffer.consecutive_failures(), 0);
        assert_eq!(buffer.queued_events(), 0);

        buffer.push_event(event_at(100));
        assert!(buffer.needs_full_snapshot());
        assert!(matches!(buffer.flush().await, FlushOutcome::Delivered { events: 1, .. }));

        let posts = transport.posts();
        assert_eq!(posts.len(), 4);
        assert_eq!(posts[3].events, vec![event_at(100)]);
        assert!(!buffer.needs_full_snapshot());
        assert_eq!(resyncs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_failure_counter() {
        let transport = MockTransport::scripted(vec![
            PostOutcome::failed(),
            PostOutcome::failed(),
            PostOutcome::delivered(),
            PostOutcome::failed(),
        ]);
        let buffer = test_buffer(BufferConfig::default(), transport.clone());

        buffer.push_event(event_at(1));
        buffer.flush().await;
        buffer.flush().await;
        assert_eq!(buffer.consecutive_failures(), 2);

        assert!(matches!(buffer.flush().await, FlushOutcome::Delivered { .. }));
        assert_eq!(buffer.consecutive_failures(), 0);

        buffer.push_event(event_at(2));
        assert!(matches!(
            buffer.flush().await,
            FlushOutcome::Requeued { consecutive_failures: 1, .. }
        ));
        assert_eq!(buffer.queued_events(), 1);
        assert!(!buffer.needs_full_snapshot());
    }

    #[tokio::test(start_paused = true)]
    async fn test_requeued_events_precede_newer_pushes() {
        let transport = MockTransport::scripted(vec![PostOutcome::failed()])
            .with_delay(Duration::from_millis(100));
        let buffer = test_buffer(BufferConfig::default(), transport.clone());

        buffer.push_event(event_at(1));
        buffer.push_event(event_at(2));

        let flushing = {
            let buffer = buffer.clone();
            tokio::spawn(async move { buffer.flush().await })
        };
        settle().await;

        // Second flush while the first is in flight is a no-op
        assert_eq!(buffer.flush().await, FlushOutcome::Skipped);
        buffer.push_event(event_at(3));

        flushing.await.unwrap();
        buffer.flush().await;

        let posts = transport.posts();
        assert_eq!(posts[1].events, vec![event_at(1), event_at(2), event_at(3)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_logs_requeued_and_recapped() {
        let transport = MockTransport::scripted(vec![PostOutcome::failed()])
            .with_delay(Duration::from_millis(100));
        let config = BufferConfig {
            max_log_queue: 3,
            ..BufferConfig::default()
        };
        let buffer = test_buffer(config, transport.clone());

        buffer.push_event(event_at(0));
        for i in 0..3 {
            buffer.push_log(LogEntry::new(i, LogLevel::Info, "t", "m"));
        }

        let flushing = {
            let buffer = buffer.clone();
            tokio::spawn(async move { buffer.flush().await })
        };
        settle().await;
        buffer.push_log(LogEntry::new(3, LogLevel::Info, "t", "m"));
        buffer.push_log(LogEntry::new(4, LogLevel::Info, "t", "m"));

        assert!(matches!(
            flushing.await.unwrap(),
            FlushOutcome::Requeued { events: 1, logs: 3, consecutive_failures: 1 }
        ));
        assert_eq!(buffer.queued_logs(), 3);

        buffer.flush().await;
        let stamps: Vec<i64> = transport.posts()[1].logs.iter().map(|l| l.timestamp_ms).collect();
        assert_eq!(stamps, vec![2, 3, 4]);
        assert_eq!(transport.posts()[1].events, vec![event_at(0)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overflow_forces_flush_and_resync() {
        let transport = MockTransport::new();
        let buffer = test_buffer(BufferConfig::default(), transport.clone());
        let resyncs = resync_counter(&buffer);

        for i in 0..500 {
            buffer.push_event(event_at(i));
        }
        assert!(buffer.needs_full_snapshot());

        settle().await;
        assert_eq!(transport.post_count(), 1);
        assert_eq!(transport.posts()[0].events.len(), 500);
        assert!(!buffer.needs_full_snapshot());
        assert_eq!(resyncs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entering_live_mode_drains_queue_first() {
        let transport = MockTransport::new();
        let buffer = test_buffer(BufferConfig::default(), transport.clone());
        let channel = FakeLiveChannel::connected();
        let weak: Weak<dyn LiveChannel> = Arc::downgrade(&channel) as Weak<dyn LiveChannel>;
        buffer.attach_live(weak);

        for i in 0..3 {
            buffer.push_event(event_at(i));
        }
        buffer.push_log(LogEntry::new(0, LogLevel::Warn, "t", "queued"));

        buffer.set_live_mode(true);
        buffer.push_event(event_at(10));

        let sent = channel.sent();
        assert_eq!(sent.len(), 3);
        assert_eq!(
            sent[0],
            OutboundMessage::Events {
                events: vec![event_at(0), event_at(1), event_at(2)]
            }
        );
        assert!(matches!(sent[1], OutboundMessage::Logs { .. }));
        assert_eq!(sent[2], OutboundMessage::Events { events: vec![event_at(10)] });
        assert_eq!(buffer.queued_events(), 0);
        assert_eq!(transport.post_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_mode_during_failed_flush_keeps_order() {
        let transport = MockTransport::scripted(vec![PostOutcome::failed()])
            .with_delay(Duration::from_millis(100));
        let buffer = test_buffer(BufferConfig::default(), transport.clone());
        let channel = FakeLiveChannel::disconnected();
        let weak: Weak<dyn LiveChannel> = Arc::downgrade(&channel) as Weak<dyn LiveChannel>;
        buffer.attach_live(weak);

        buffer.push_event(event_at(1));
        buffer.push_event(event_at(2));

        let flushing = {
            let buffer = buffer.clone();
            tokio::spawn(async move { buffer.flush().await })
        };
        settle().await;

        channel.set_connected(true);
        buffer.set_live_mode(true);
        buffer.push_event(event_at(3));
        assert!(channel.sent().is_empty());
        assert_eq!(buffer.queued_events(), 1);

        assert!(matches!(
            flushing.await.unwrap(),
            FlushOutcome::Requeued { events: 2, .. }
        ));

        buffer.push_event(event_at(4));

        let relayed: Vec<RecordedEvent> = channel
            .sent()
            .into_iter()
            .flat_map(|message| match message {
                OutboundMessage::Events { events } => events,
                _ => Vec::new(),
            })
            .collect();
        assert_eq!(relayed, vec![event_at(1), event_at(2), event_at(3), event_at(4)]);
        assert_eq!(buffer.queued_events(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_backlog_drains_before_new_push() {
        let transport = MockTransport::new();
        let buffer = test_buffer(BufferConfig::default(), transport.clone());
        let channel = FakeLiveChannel::disconnected();
        let weak: Weak<dyn LiveChannel> = Arc::downgrade(&channel) as Weak<dyn LiveChannel>;
        buffer.attach_live(weak);

        buffer.set_live_mode(true);
        buffer.push_event(event_at(1));
        assert_eq!(buffer.queued_events(), 1);

        channel.set_connected(true);
        buffer.push_event(event_at(2));

        assert_eq!(
            channel.sent(),
            vec![OutboundMessage::Events {
                events: vec![event_at(1), event_at(2)]
            }]
        );
        assert_eq!(transport.post_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_mode_stops_and_restarts_timer() {
        let transport = MockTransport::new();
        let buffer = test_buffer(BufferConfig::default(), transport.clone());
        let channel = FakeLiveChannel::connected();
        buffer.attach_live(Arc::downgrade(&channel) as Weak<dyn LiveChannel>);
        buffer.start();

        buffer.set_live_mode(true);
        channel.set_connected(false);
        buffer.push_event(event_at(1));

        tokio::time::sleep(Duration::from_millis(6_000)).await;
        assert_eq!(transport.post_count(), 0);

        buffer.set_live_mode(false);
        tokio::time::sleep(Duration::from_millis(5_100)).await;
        assert_eq!(transport.post_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_upgrade_signal_requests_live_link() {
        let transport = MockTransport::scripted(vec![PostOutcome::delivered_with_upgrade()]);
        let buffer = test_buffer(BufferConfig::default(), transport.clone());
        let channel = FakeLiveChannel::disconnected();
        buffer.attach_live(Arc::downgrade(&channel) as Weak<dyn LiveChannel>);

        buffer.push_event(event_at(1));
        buffer.flush().await;

        assert_eq!(channel.upgrade_requests(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_response_after_stop_is_ignored() {
        let transport = MockTransport::scripted(vec![PostOutcome::failed()])
            .with_delay(Duration::from_millis(500));
        let buffer = test_buffer(BufferConfig::default(), transport.clone());
        let resyncs = resync_counter(&buffer);

        buffer.push_event(event_at(1));
        let flushing = {
            let buffer = buffer.clone();
            tokio::spawn(async move { buffer.flush().await })
        };
        settle().await;

        buffer.stop();
        assert_eq!(flushing.await.unwrap(), FlushOutcome::Ignored);
        assert_eq!(buffer.queued_events(), 0);
        assert_eq!(buffer.consecutive_failures(), 0);
        assert_eq!(resyncs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_beacons_remaining_data() {
        let transport = MockTransport::new();
        let buffer = test_buffer(BufferConfig::default(), transport.clone());
        buffer.start();

        buffer.push_event(event_at(1));
        buffer.log(LogLevel::Error, "checkout", "payment failed", None);
        buffer.stop();

        let beacons = transport.beacons();
        assert_eq!(beacons.len(), 1);
        assert_eq!(beacons[0].events.len(), 1);
        assert_eq!(beacons[0].logs[0].message, "payment failed");

        // Stopped buffers ignore new data and the timer is gone
        buffer.push_event(event_at(2));
        tokio::time::sleep(Duration::from_millis(10_000)).await;
        assert_eq!(transport.post_count(), 0);
        assert_eq!(buffer.queued_events(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_skips_when_empty() {
        let transport = MockTransport::new();
        let buffer = test_buffer(BufferConfig::default(), transport.clone());

        assert_eq!(buffer.flush().await, FlushOutcome::Skipped);
        assert!(!buffer.flush_beacon());
        assert_eq!(transport.post_count(), 0);
    }

    #[test]
    fn test_config_validation() {
        assert!(BufferConfig::default().validate().is_ok());

        let config = BufferConfig {
            overflow_events: 10,
            ..BufferConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
