//! Telemetry error types.

use thiserror::Error;

/// Errors raised while building or installing the log subscriber.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// A level or directive is not valid filter syntax.
    #[error("invalid log filter `{directive}`: {message}")]
    InvalidFilter {
        /// The offending level or directive.
        directive: String,
        /// Parser diagnostic.
        message: String,
    },

    /// A format name other than `pretty`, `compact`, `json` or `full`.
    #[error("unknown log format `{0}`")]
    UnknownFormat(String),

    /// A global subscriber is already installed.
    #[error("failed to install log subscriber: {0}")]
    InitError(String),
}

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;
