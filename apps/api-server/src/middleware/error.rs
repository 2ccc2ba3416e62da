//! Error handling middleware - RFC 7807 compliant responses.

use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use fleetgate_core::{AdminError, DomainError, MonitorError};
use fleetgate_shared::ErrorResponse;
use std::fmt;

/// Application-level error type that converts to RFC 7807 responses.
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    /// No usable subject identity was resolved for the request.
    MissingIdentity,
    /// Window data could not be read or written.
    StoreUnavailable(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::MissingIdentity => write!(f, "Missing subject identity"),
            AppError::StoreUnavailable(msg) => write!(f, "Window store unavailable: {}", msg),
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::MissingIdentity => StatusCode::UNAUTHORIZED,
            AppError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(self.problem())
    }
}

impl AppError {
    /// Problem response whose `instance` is the request path that caused it.
    pub fn response_for(&self, path: &str) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(self.problem().with_instance(path))
    }

    fn problem(&self) -> ErrorResponse {
        match self {
            AppError::BadRequest(detail) => ErrorResponse::bad_request(detail),
            AppError::MissingIdentity => ErrorResponse::unauthorized(
                "A resolved subject identity is required for this resource.",
            ),
            AppError::StoreUnavailable(detail) => {
                tracing::warn!("Window store unavailable: {}", detail);
                ErrorResponse::service_unavailable("Rate limit data is temporarily unavailable.")
            }
        }
    }
}

// Conversion from domain errors
impl From<DomainError> for AppError {
    fn from(err: DomainError) -> Self {
        AppError::BadRequest(err.to_string())
    }
}

impl From<MonitorError> for AppError {
    fn from(err: MonitorError) -> Self {
        match err {
            MonitorError::DataUnavailable(source) => AppError::StoreUnavailable(source.to_string()),
        }
    }
}

impl From<AdminError> for AppError {
    fn from(err: AdminError) -> Self {
        match err {
            AdminError::Domain(e) => e.into(),
            AdminError::Store(e) => AppError::StoreUnavailable(e.to_string()),
        }
    }
}

/// Result type alias for handlers.
pub type AppResult<T> = Result<T, AppError>;
