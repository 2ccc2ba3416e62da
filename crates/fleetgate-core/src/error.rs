//! Domain-level error types.

use std::time::Duration;

use thiserror::Error;

/// Domain errors - invalid identities handed to the limiter.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("Invalid subject id: {0}")]
    InvalidSubject(String),

    #[error("Invalid resource: {0}")]
    InvalidResource(String),

    #[error("Invalid key pattern: {0}")]
    InvalidPattern(String),
}

/// Policy configuration errors, raised before any request is evaluated.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Window length must be positive")]
    NonPositiveWindow,

    #[error("Max requests must be positive")]
    NonPositiveLimit,

    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: String, value: String },
}

/// Window store errors. Never surfaced to request callers: the limiter
/// converts them into fail-open readings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Window store unavailable: {0}")]
    Unavailable(String),

    #[error("Window store timed out after {0:?}")]
    Timeout(Duration),

    #[error("Unexpected window store reply: {0}")]
    Protocol(String),
}

/// Monitor errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MonitorError {
    #[error("Rate limit data unavailable: {0}")]
    DataUnavailable(#[source] StoreError),
}

/// Errors of administrative window operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AdminError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
