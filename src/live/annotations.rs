// src/live/annotations.rs
//! Remote annotation and chat state
//!
//! Tracks what a watching agent has drawn on the host (cursor, highlights,
//! pen strokes) and the chat sub-protocol. Drawing is delegated to an
//! [`Overlay`]; host-facing notifications go to a [`LiveHost`]. Both have
//! no-op defaults so a headless client can ignore presentation entirely.
//!
//! # Timers
//!
//! ```text
//! highlight ──── highlight_fade_ms ───→ clear_highlight
//! pen_end ────── pen_fade_ms ─────────→ fade_stroke
//! typing ─────── typing_indicator_ms ─→ set_typing(false)   (re-armed by each typing)
//! ```

use crate::live::link::LiveConfig;
use crate::live::protocol::Point;
use crate::utils::clock::Clock;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::debug;

/// Presentation contract
#[allow(unused_variables)]
pub trait Overlay: Send + Sync {
    fn mount(&self) {}
    fn unmount(&self) {}
    fn show_highlight(&self, id: u64, at: Point) {}
    fn clear_highlight(&self, id: u64) {}
    fn move_cursor(&self, at: Point) {}
    fn hide_cursor(&self) {}
    fn draw_stroke(&self, id: u64, points: &[Point]) {}
    fn fade_stroke(&self, id: u64) {}
    fn set_chat_enabled(&self, enabled: bool) {}
    fn set_typing(&self, visible: bool) {}
}

/// Synthetic pointer event kinds dispatched for a remote click
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerEventKind {
    MouseDown,
    MouseUp,
    Click,
}

/// Host contract
#[allow(unused_variables)]
pub trait LiveHost: Send + Sync {
    fn agent_connected(&self) {}
    fn agent_disconnected(&self) {}
    fn chat_received(&self, message: &ChatMessage) {}

    /// Dispatch a synthetic pointer event against the host document
    fn dispatch_pointer(&self, kind: PointerEventKind, at: Point) {}
}

/// Overlay that draws nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopOverlay;

impl Overlay for NoopOverlay {}

/// Host that ignores every notification
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHost;

impl LiveHost for NoopHost {}

/// Chat history entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub from: String,
    pub message: String,
    pub timestamp_ms: i64,
}

#[derive(Debug, Default)]
struct AnnotationState {
    mounted: bool,
    cursor: Option<Point>,
    highlights: Vec<u64>,
    stroke: Option<(u64, Vec<Point>)>,
    fading_strokes: Vec<u64>,
    chat_enabled: bool,
    chat_history: Vec<ChatMessage>,
    typing_visible: bool,
    typing_generation: u64,
    next_id: u64,
}

impl AnnotationState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

struct AnnotationsInner {
    overlay: Arc<dyn Overlay>,
    clock: Arc<dyn Clock>,
    highlight_fade: Duration,
    pen_fade: Duration,
    typing_timeout: Duration,
    state: Mutex<AnnotationState>,
}

/// Annotation and chat state for one live link
#[derive(Clone)]
pub struct Annotations {
    inner: Arc<AnnotationsInner>,
}

impl Annotations {
    pub fn new(config: &LiveConfig, overlay: Arc<dyn Overlay>, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(AnnotationsInner {
                overlay,
                clock,
                highlight_fade: Duration::from_millis(config.highlight_fade_ms),
                pen_fade: Duration::from_millis(config.pen_fade_ms),
                typing_timeout: Duration::from_millis(config.typing_indicator_ms),
                state: Mutex::new(AnnotationState::default()),
            }),
        }
    }

    /// Mount the overlay unless already mounted
    pub fn mount(&self) -> bool {
        {
            let mut state = self.inner.state.lock();
            if state.mounted {
                return false;
            }
            state.mounted = true;
        }
        self.inner.overlay.mount();
        true
    }

    pub fn is_mounted(&self) -> bool {
        self.inner.state.lock().mounted
    }

    /// Show a transient highlight; returns its id
    pub fn highlight(&self, at: Point) -> u64 {
        let id = {
            let mut state = self.inner.state.lock();
            let id = state.next_id();
            state.highlights.push(id);
            id
        };
        self.inner.overlay.show_highlight(id, at);

        self.after(self.inner.highlight_fade, move |inner| {
            let removed = {
                let mut state = inner.state.lock();
                let before = state.highlights.len();
                state.highlights.retain(|h| *h != id);
                state.highlights.len() != before
            };
            if removed {
                inner.overlay.clear_highlight(id);
            }
        });

        id
    }

    pub fn active_highlights(&self) -> usize {
        self.inner.state.lock().highlights.len()
    }

    pub fn move_cursor(&self, at: Point) {
        self.inner.state.lock().cursor = Some(at);
        self.inner.overlay.move_cursor(at);
    }

    pub fn hide_cursor(&self) {
        self.inner.state.lock().cursor = None;
        self.inner.overlay.hide_cursor();
    }

    pub fn cursor(&self) -> Option<Point> {
        self.inner.state.lock().cursor
    }

    /// Begin a stroke; an unfinished stroke is finished first
    pub fn pen_start(&self, at: Point) {
        let previous = self.inner.state.lock().stroke.take();
        if let Some((id, _)) = previous {
            self.schedule_stroke_fade(id);
        }

        let (id, points) = {
            let mut state = self.inner.state.lock();
            let id = state.next_id();
            state.stroke = Some((id, vec![at]));
            (id, vec![at])
        };
        self.inner.overlay.draw_stroke(id, &points);
    }

    pub fn pen_move(&self, at: Point) {
        let drawn = {
            let mut state = self.inner.state.lock();
            match state.stroke.as_mut() {
                Some((id, points)) => {
                    points.push(at);
                    Some((*id, points.clone()))
                }
                None => None,
            }
        };

        match drawn {
            Some((id, points)) => self.inner.overlay.draw_stroke(id, &points),
            None => debug!("pen_move without an active stroke"),
        }
    }

    pub fn pen_end(&self, at: Point) {
        let finished = self.inner.state.lock().stroke.take();
        let Some((id, mut points)) = finished else {
            debug!("pen_end without an active stroke");
            return;
        };

        points.push(at);
        self.inner.overlay.draw_stroke(id, &points);
        self.schedule_stroke_fade(id);
    }

    fn schedule_stroke_fade(&self, id: u64) {
        self.inner.state.lock().fading_strokes.push(id);
        self.after(self.inner.pen_fade, move |inner| {
            let removed = {
                let mut state = inner.state.lock();
                let before = state.fading_strokes.len();
                state.fading_strokes.retain(|s| *s != id);
                state.fading_strokes.len() != before
            };
            if removed {
                inner.overlay.fade_stroke(id);
            }
        });
    }

    pub fn is_drawing(&self) -> bool {
        self.inner.state.lock().stroke.is_some()
    }

    pub fn set_chat_enabled(&self, enabled: bool) {
        let changed = {
            let mut state = self.inner.state.lock();
            std::mem::replace(&mut state.chat_enabled, enabled) != enabled
        };
        if changed {
            self.inner.overlay.set_chat_enabled(enabled);
        }
    }

    pub fn chat_enabled(&self) -> bool {
        self.inner.state.lock().chat_enabled
    }

    /// Show the typing indicator and (re)arm its timeout
    pub fn show_typing(&self) {
        let (generation, was_visible) = {
            let mut state = self.inner.state.lock();
            state.typing_generation += 1;
            let was_visible = std::mem::replace(&mut state.typing_visible, true);
            (state.typing_generation, was_visible)
        };
        if !was_visible {
            self.inner.overlay.set_typing(true);
        }

        self.after(self.inner.typing_timeout, move |inner| {
            let expired = {
                let mut state = inner.state.lock();
                if state.typing_generation == generation && state.typing_visible {
                    state.typing_visible = false;
                    true
                } else {
                    false
                }
            };
            if expired {
                inner.overlay.set_typing(false);
            }
        });
    }

    fn clear_typing(&self) {
        let was_visible = std::mem::replace(&mut self.inner.state.lock().typing_visible, false);
        if was_visible {
            self.inner.overlay.set_typing(false);
        }
    }

    pub fn typing_visible(&self) -> bool {
        self.inner.state.lock().typing_visible
    }

    /// Record an inbound chat message; clears the typing indicator
    pub fn receive_chat(&self, from: &str, message: &str) -> ChatMessage {
        let entry = ChatMessage {
            from: from.to_string(),
            message: message.to_string(),
            timestamp_ms: self.inner.clock.now_ms(),
        };
        self.inner.state.lock().chat_history.push(entry.clone());
        self.clear_typing();
        entry
    }

    /// Record a message the local user sent
    pub fn record_outgoing(&self, message: &str) -> ChatMessage {
        let entry = ChatMessage {
            from: "user".to_string(),
            message: message.to_string(),
            timestamp_ms: self.inner.clock.now_ms(),
        };
        self.inner.state.lock().chat_history.push(entry.clone());
        entry
    }

    pub fn chat_history(&self) -> Vec<ChatMessage> {
        self.inner.state.lock().chat_history.clone()
    }

    /// Remove everything drawn and disable chat; history is kept
    pub fn teardown(&self) {
        let (mounted, highlights, strokes, had_cursor) = {
            let mut state = self.inner.state.lock();
            let mut strokes = std::mem::take(&mut state.fading_strokes);
            if let Some((id, _)) = state.stroke.take() {
                strokes.push(id);
            }
            (
                std::mem::replace(&mut state.mounted, false),
                std::mem::take(&mut state.highlights),
                strokes,
                state.cursor.take().is_some(),
            )
        };

        for id in highlights {
            self.inner.overlay.clear_highlight(id);
        }
        for id in strokes {
            self.inner.overlay.fade_stroke(id);
        }
        if had_cursor {
            self.inner.overlay.hide_cursor();
        }
        self.clear_typing();
        self.set_chat_enabled(false);
        if mounted {
            self.inner.overlay.unmount();
        }
    }

    /// Run `f` after `delay` unless the annotations are gone by then
    fn after<F>(&self, delay: Duration, f: F)
    where
        F: FnOnce(Arc<AnnotationsInner>) + Send + 'static,
    {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!("No runtime available; annotation will not fade");
            return;
        };

        let weak: Weak<AnnotationsInner> = Arc::downgrade(&self.inner);
        handle.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                f(inner);
            }
        });
    }
}
