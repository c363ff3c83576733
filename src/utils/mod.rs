// src/utils/mod.rs
//! Shared utilities: error types, configuration and the injectable clock.

pub mod clock;
pub mod config;
pub mod errors;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::SdkConfig;
pub use errors::{EngineError, Result};
