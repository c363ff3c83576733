// src/utils/config.rs
//! Session configuration
//!
//! Layered with the `config` crate: built-in defaults, then an optional
//! `sessionwire.{toml,json,yaml}` file, then `SESSIONWIRE__*` environment
//! variables (e.g. `SESSIONWIRE__BUFFER__FLUSH_INTERVAL_MS=2000`).

use crate::ingest::buffer::BufferConfig;
use crate::ingest::transport::TransportConfig;
use crate::live::link::LiveConfig;
use crate::utils::errors::{EngineError, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Top-level configuration for a capture session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SdkConfig {
    /// Collection endpoint base URL (http or https)
    pub endpoint: String,

    /// Tenant the recording belongs to
    pub tenant_id: String,

    /// Session id; a fresh ULID is generated when absent
    pub session_id: Option<String>,

    /// Identity block sent with every ingest payload
    pub identity: serde_json::Value,

    /// Free-form client metadata sent with every ingest payload
    pub meta: serde_json::Value,

    /// Buffering thresholds
    pub buffer: BufferConfig,

    /// HTTP transport settings
    pub transport: TransportConfig,

    /// Live link settings
    pub live: LiveConfig,
}

impl Default for SdkConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8787".to_string(),
            tenant_id: "default".to_string(),
            session_id: None,
            identity: serde_json::Value::Null,
            meta: serde_json::json!({}),
            buffer: BufferConfig::default(),
            transport: TransportConfig::default(),
            live: LiveConfig::default(),
        }
    }
}

impl SdkConfig {
    /// Load from `./sessionwire.*` (optional) and the environment
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load from an explicit file (optional) and the environment
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name("sessionwire").required(false),
        };

        let config: SdkConfig = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix("SESSIONWIRE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        debug!("Loaded configuration for endpoint {}", config.endpoint);

        Ok(config)
    }

    /// Reject configurations the relay cannot operate with
    pub fn validate(&self) -> Result<()> {
        let url = url::Url::parse(&self.endpoint)
            .map_err(|e| EngineError::ConfigError(format!("Invalid endpoint: {}", e)))?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(EngineError::ConfigError(format!(
                "Endpoint scheme must be http or https, got {}",
                url.scheme()
            )));
        }

        if self.tenant_id.is_empty() {
            return Err(EngineError::ConfigError("Tenant id cannot be empty".to_string()));
        }

        self.buffer.validate()?;

        if self.transport.timeout_ms == 0 {
            return Err(EngineError::ConfigError(
                "Transport timeout cannot be 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Session id, generating and storing one on first use
    pub fn resolve_session_id(&mut self) -> String {
        self.session_id
            .get_or_insert_with(|| ulid::Ulid::new().to_string())
            .clone()
    }
}
