// src/session.rs
//! Capture session
//!
//! The explicit handle that owns one recording session. It is built once,
//! started once and stopped once:
//!
//! ```text
//! SessionBuilder::start()
//!   ├─ IngestBuffer (timer armed)
//!   ├─ LiveLink (attached to the buffer, connects on collector request)
//!   ├─ FlushCoordinator (beacon on hidden/teardown)
//!   └─ Producer::start(buffer)     failure is logged, session keeps running
//!
//! Session::stop()
//!   └─ producer stop → live downgrade → buffer stop (final beacon) → drain
//! ```

use crate::ingest::buffer::{BufferStats, IngestBuffer};
use crate::ingest::flush_coordinator::{FlushCoordinator, FlushHandle};
use crate::ingest::lifecycle::Lifecycle;
use crate::ingest::transport::{HttpTransport, IngestEndpoint, PayloadHeader, Transport};
use crate::live::annotations::{LiveHost, NoopHost, NoopOverlay, Overlay};
use crate::live::link::LiveLink;
use crate::utils::clock::{Clock, SystemClock};
use crate::utils::config::SdkConfig;
use crate::utils::errors::{EngineError, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{error, info};

/// Source of recorded events (e.g. a DOM-diffing recorder)
pub trait Producer: Send + Sync {
    /// Begin pushing events into `buffer`
    fn start(&self, buffer: IngestBuffer) -> Result<()>;

    /// Emit a fresh full snapshot as soon as possible
    fn request_full_snapshot(&self);

    fn stop(&self);
}

/// Builder for [`Session`]
pub struct SessionBuilder {
    config: SdkConfig,
    transport: Option<Arc<dyn Transport>>,
    clock: Option<Arc<dyn Clock>>,
    lifecycle: Option<Lifecycle>,
    overlay: Arc<dyn Overlay>,
    host: Arc<dyn LiveHost>,
    producer: Option<Arc<dyn Producer>>,
}

impl SessionBuilder {
    pub fn new(config: SdkConfig) -> Self {
        Self {
            config,
            transport: None,
            clock: None,
            lifecycle: None,
            overlay: Arc::new(NoopOverlay),
            host: Arc::new(NoopHost),
            producer: None,
        }
    }

    /// Replace the default hyper transport
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn lifecycle(mut self, lifecycle: Lifecycle) -> Self {
        self.lifecycle = Some(lifecycle);
        self
    }

    pub fn overlay(mut self, overlay: Arc<dyn Overlay>) -> Self {
        self.overlay = overlay;
        self
    }

    pub fn host(mut self, host: Arc<dyn LiveHost>) -> Self {
        self.host = host;
        self
    }

    pub fn producer(mut self, producer: Arc<dyn Producer>) -> Self {
        self.producer = Some(producer);
        self
    }

    /// Wire every component and start recording
    pub fn start(self) -> Result<Session> {
        let mut config = self.config;
        config.validate()?;
        let session_id = config.resolve_session_id();
        let endpoint = IngestEndpoint::new(&config.endpoint, &config.tenant_id, &session_id);

        let (transport, http) = match self.transport {
            Some(transport) => (transport, None),
            None => {
                let http = Arc::new(HttpTransport::new(endpoint.clone(), &config.transport)?);
                (http.clone() as Arc<dyn Transport>, Some(http))
            }
        };

        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock::new()) as Arc<dyn Clock>);
        let lifecycle = self.lifecycle.unwrap_or_default();

        let header = PayloadHeader {
            identity: config.identity.clone(),
            meta: config.meta.clone(),
            launch_ts: clock.now_ms(),
        };

        let buffer = IngestBuffer::new(config.buffer.clone(), header, transport, Arc::clone(&clock));
        let link = LiveLink::new(
            &endpoint,
            config.live.clone(),
            buffer.clone(),
            lifecycle.clone(),
            clock,
            self.overlay,
            self.host,
        );

        let coordinator = FlushCoordinator::new(lifecycle.clone());
        let beacon_buffer = buffer.clone();
        let flush_handle = coordinator.register(move || {
            let buffer = beacon_buffer.clone();
            async move {
                let pending = buffer.queued_events() + buffer.queued_logs();
                if pending > 0 && !buffer.flush_beacon() {
                    return Err(EngineError::TransportFailed(format!(
                        "beacon with {} records could not be issued",
                        pending
                    )));
                }
                Ok(())
            }
        });

        if let Some(producer) = &self.producer {
            let weak: Weak<dyn Producer> = Arc::downgrade(producer);
            buffer.set_resync_handler(Arc::new(move || {
                if let Some(producer) = weak.upgrade() {
                    producer.request_full_snapshot();
                }
            }));
        }

        buffer.start();

        if let Some(producer) = &self.producer {
            if let Err(e) = producer.start(buffer.clone()) {
                let e = match e {
                    EngineError::ProducerInitFailed(_) => e,
                    other => EngineError::ProducerInitFailed(other.to_string()),
                };
                error!("{}; continuing without new events", e);
            }
        }

        info!("Session {} started against {}", session_id, endpoint.base());

        Ok(Session {
            session_id,
            config,
            buffer,
            link,
            coordinator,
            lifecycle,
            producer: self.producer,
            http,
            flush_handle: Mutex::new(Some(flush_handle)),
            stopped: AtomicBool::new(false),
        })
    }
}

/// One capture session
pub struct Session {
    session_id: String,
    config: SdkConfig,
    buffer: IngestBuffer,
    link: LiveLink,
    coordinator: FlushCoordinator,
    lifecycle: Lifecycle,
    producer: Option<Arc<dyn Producer>>,
    http: Option<Arc<HttpTransport>>,
    flush_handle: Mutex<Option<FlushHandle>>,
    stopped: AtomicBool,
}

impl Session {
    pub fn builder(config: SdkConfig) -> SessionBuilder {
        SessionBuilder::new(config)
    }

    /// Start with the default transport and no producer
    pub fn start(config: SdkConfig) -> Result<Self> {
        SessionBuilder::new(config).start()
    }

    pub fn id(&self) -> &str {
        &self.session_id
    }

    pub fn config(&self) -> &SdkConfig {
        &self.config
    }

    pub fn buffer(&self) -> &IngestBuffer {
        &self.buffer
    }

    pub fn link(&self) -> &LiveLink {
        &self.link
    }

    pub fn coordinator(&self) -> &FlushCoordinator {
        &self.coordinator
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    pub fn stats(&self) -> BufferStats {
        self.buffer.stats()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Stop recording, flush what is left and wait for issued beacons
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(producer) = &self.producer {
            producer.stop();
        }
        if let Some(handle) = self.flush_handle.lock().take() {
            self.coordinator.unregister(handle);
        }

        self.link.downgrade();
        self.buffer.stop();

        if let Some(http) = &self.http {
            http.drain().await;
        }

        info!("Session {} stopped", self.session_id);
    }
}
