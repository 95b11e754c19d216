//! Quarry Telemetry - logging setup for the quarry plugin loader.
//!
//! # Example
//!
//! ```rust,no_run
//! use quarry_telemetry::{LogConfig, LogFormat, setup_logging};
//!
//! # fn main() -> Result<(), quarry_telemetry::TelemetryError> {
//! let config = LogConfig::new("info")
//!     .with_format(LogFormat::Compact)
//!     .with_directive("quarry_plugins=debug");
//!
//! setup_logging(&config)?;
//! tracing::info!("plugin loader ready");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod error;
mod logging;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::{LogConfig, LogFormat, LogTarget, setup_default_logging, setup_logging};
