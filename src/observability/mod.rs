// src/observability/mod.rs
//! Logging and metrics
//!
//! The library only emits `tracing` events and `metrics` samples. Binaries
//! call [`init_tracing`] once; installing a metrics exporter is left to the
//! host process.

pub mod metrics;

use crate::utils::errors::{EngineError, Result};
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global tracing subscriber
///
/// Honours `RUST_LOG` (default `info`). `SESSIONWIRE_LOG_FORMAT=json`
/// switches to JSON lines.
pub fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("SESSIONWIRE_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let result = if json {
        fmt()
            .with_env_filter(filter)
            .json()
            .with_writer(std::io::stderr)
            .try_init()
    } else {
        fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .try_init()
    };

    result.map_err(|e| EngineError::ConfigError(format!("Failed to init tracing: {}", e)))
}
