// src/ingest/lifecycle.rs
//! Host lifecycle signals
//!
//! The host forwards page teardown and visibility changes here. The flush
//! coordinator listens for teardown/hidden, the live link's heartbeat reads
//! the current visibility.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

/// Lifecycle signal emitted by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleSignal {
    /// The page/process is going away
    Teardown,

    /// The host became hidden (tab switched, window minimised)
    Hidden,

    /// The host became visible again
    Visible,
}

/// Broadcast source of lifecycle signals
#[derive(Debug, Clone)]
pub struct Lifecycle {
    tx: broadcast::Sender<LifecycleSignal>,
    visible: Arc<AtomicBool>,
}

impl Lifecycle {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(16);
        Self {
            tx,
            visible: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Publish a signal to every subscriber
    pub fn emit(&self, signal: LifecycleSignal) {
        match signal {
            LifecycleSignal::Hidden => self.visible.store(false, Ordering::SeqCst),
            LifecycleSignal::Visible => self.visible.store(true, Ordering::SeqCst),
            LifecycleSignal::Teardown => {}
        }

        // No subscribers is fine
        if self.tx.send(signal).is_err() {
            debug!("Lifecycle signal {:?} had no subscribers", signal);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleSignal> {
        self.tx.subscribe()
    }

    pub fn is_visible(&self) -> bool {
        self.visible.load(Ordering::SeqCst)
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}
