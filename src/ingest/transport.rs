// src/ingest/transport.rs
//! Ingest transport: JSON POST and fire-and-forget beacons
//!
//! Requests go to `{endpoint}/v1/ingest/{tenant}/{session}/{channel}`. Every
//! failure mode (connect error, timeout, non-2xx) collapses to
//! `PostOutcome { ok: false }`; the buffer owns the retry policy.

use crate::recording::{LogEntry, RecordedEvent};
use crate::utils::errors::{EngineError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::CONTENT_TYPE;
use hyper::{Method, Request};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

/// Channel used for event/log batches
pub const DATA_CHANNEL: &str = "data";

/// Characters left unescaped by `encodeURIComponent`
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Per-request time bound (milliseconds)
    pub timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self { timeout_ms: 10_000 }
    }
}

/// Collection endpoint addressing for one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestEndpoint {
    base: String,
    tenant_id: String,
    session_id: String,
}

impl IngestEndpoint {
    pub fn new(
        base: impl Into<String>,
        tenant_id: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        let base: String = base.into();
        Self {
            base: base.trim_end_matches('/').to_string(),
            tenant_id: tenant_id.into(),
            session_id: session_id.into(),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// URL of an ingest channel
    pub fn ingest_url(&self, channel: &str) -> String {
        format!(
            "{}/v1/ingest/{}/{}/{}",
            self.base,
            utf8_percent_encode(&self.tenant_id, COMPONENT),
            self.session_id,
            channel
        )
    }

    /// WebSocket URL of the live link
    pub fn live_url(&self) -> String {
        let ws_base = if let Some(rest) = self.base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = self.base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            self.base.clone()
        };
        format!("{}/v1/ingest/{}/live", ws_base, self.session_id)
    }
}

/// Fields sent with every ingest body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadHeader {
    pub identity: Value,
    pub meta: Value,
    #[serde(rename = "launchTs")]
    pub launch_ts: i64,
}

/// Ingest request body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestPayload {
    #[serde(flatten)]
    pub header: PayloadHeader,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<RecordedEvent>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<LogEntry>,
}

/// Result of a POST
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PostOutcome {
    /// Collector accepted the batch
    pub ok: bool,

    /// Collector asks the client to open the live link
    pub upgrade: bool,
}

impl PostOutcome {
    pub fn failed() -> Self {
        Self {
            ok: false,
            upgrade: false,
        }
    }

    pub fn delivered() -> Self {
        Self {
            ok: true,
            upgrade: false,
        }
    }

    pub fn delivered_with_upgrade() -> Self {
        Self {
            ok: true,
            upgrade: true,
        }
    }
}

#[derive(Debug, Deserialize)]
struct IngestResponse {
    #[serde(default)]
    upgrade: bool,
}

/// Delivery primitives used by the buffer
#[async_trait]
pub trait Transport: Send + Sync {
    /// POST a batch; never errors, failures are `ok: false`
    async fn post(&self, channel: &str, body: &IngestPayload) -> PostOutcome;

    /// Issue a delivery attempt that survives the caller going away;
    /// returns whether the attempt was issued
    fn beacon(&self, channel: &str, body: &IngestPayload) -> bool;
}

type IngestClient = Client<HttpsConnector<HttpConnector>, Full<Bytes>>;

/// hyper-based HTTP(S) transport
pub struct HttpTransport {
    endpoint: IngestEndpoint,
    timeout: Duration,
    client: IngestClient,
    beacons: TaskTracker,
}

impl HttpTransport {
    /// Create a transport for an `http` or `https` endpoint
    ///
    /// TLS uses rustls with the bundled webpki root store.
    pub fn new(endpoint: IngestEndpoint, config: &TransportConfig) -> Result<Self> {
        let base = endpoint.base();
        if !base.starts_with("http://") && !base.starts_with("https://") {
            return Err(EngineError::ConfigError(format!(
                "HttpTransport needs an http(s) endpoint, got {}",
                base
            )));
        }

        let connector = HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .build();
        let client = Client::builder(TokioExecutor::new()).build(connector);

        Ok(Self {
            endpoint,
            timeout: Duration::from_millis(config.timeout_ms),
            client,
            beacons: TaskTracker::new(),
        })
    }

    pub fn endpoint(&self) -> &IngestEndpoint {
        &self.endpoint
    }

    /// Wait for issued beacons to finish (or time out)
    pub async fn drain(&self) {
        self.beacons.close();
        self.beacons.wait().await;
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post(&self, channel: &str, body: &IngestPayload) -> PostOutcome {
        let url = self.endpoint.ingest_url(channel);
        let bytes = match serde_json::to_vec(body) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Failed to encode ingest body: {}", e);
                return PostOutcome::failed();
            }
        };

        execute(self.client.clone(), url, Bytes::from(bytes), self.timeout).await
    }

    fn beacon(&self, channel: &str, body: &IngestPayload) -> bool {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("No runtime available for beacon");
            return false;
        };

        let bytes = match serde_json::to_vec(body) {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) => {
                warn!("Failed to encode beacon body: {}", e);
                return false;
            }
        };

        let url = self.endpoint.ingest_url(channel);
        let client = self.client.clone();
        let timeout = self.timeout;

        self.beacons.spawn_on(
            async move {
                let outcome = execute(client, url, bytes, timeout).await;
                debug!("Beacon finished (ok = {})", outcome.ok);
            },
            &handle,
        );

        true
    }
}

async fn execute(
    client: IngestClient,
    url: String,
    body: Bytes,
    timeout: Duration,
) -> PostOutcome {
    match tokio::time::timeout(timeout, send(&client, &url, body)).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) => {
            warn!("Ingest request to {} failed: {}", url, e);
            PostOutcome::failed()
        }
        Err(_) => {
            let err = EngineError::Timeout(timeout);
            warn!("Ingest request to {} failed: {}", url, err);
            PostOutcome::failed()
        }
    }
}

async fn send(
    client: &IngestClient,
    url: &str,
    body: Bytes,
) -> Result<PostOutcome> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(url)
        .header(CONTENT_TYPE, "application/json")
        .body(Full::new(body))
        .map_err(|e| EngineError::TransportFailed(format!("Request build error: {}", e)))?;

    let response = client
        .request(request)
        .await
        .map_err(|e| EngineError::TransportFailed(format!("Request error: {}", e)))?;

    let status = response.status();
    if !status.is_success() {
        return Err(EngineError::TransportFailed(format!("Status {}", status)));
    }

    let body = response
        .into_body()
        .collect()
        .await
        .map_err(|e| EngineError::TransportFailed(format!("Response body error: {}", e)))?
        .to_bytes();

    Ok(parse_response(&body))
}

/// A 2xx body that does not parse still counts as delivered
fn parse_response(body: &[u8]) -> PostOutcome {
    match serde_json::from_slice::<IngestResponse>(body) {
        Ok(response) => PostOutcome {
            ok: true,
            upgrade: response.upgrade,
        },
        Err(_) => PostOutcome::delivered(),
    }
}
