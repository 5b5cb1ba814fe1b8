//! Centralized error types for the jam core library.
//!
//! This module provides a unified error handling system that:
//! - Defines structured error types using `thiserror`
//! - Maps errors to appropriate HTTP status codes
//! - Implements `IntoResponse` for automatic JSON error responses

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::directory::DirectoryError;
use crate::store::StoreError;

/// Trait for error types that provide machine-readable error codes.
///
/// Implement this trait to provide consistent error codes across different
/// error conversion paths.
pub trait ErrorCode {
    /// Returns a machine-readable error code for API responses.
    fn code(&self) -> &'static str;
}

impl ErrorCode for StoreError {
    fn code(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "store_unavailable",
            Self::WrongType(_) => "store_wrong_type",
            Self::Lagged(_) => "subscriber_lagged",
            Self::InvalidValue { .. } => "store_invalid_value",
        }
    }
}

impl ErrorCode for DirectoryError {
    fn code(&self) -> &'static str {
        match self {
            Self::Http(_) => "directory_http_failed",
            Self::HttpStatus(_) => "directory_http_status",
            Self::NotFound(_) => "directory_user_not_found",
            Self::InvalidUrl(_) => "directory_invalid_url",
            Self::Disabled => "directory_disabled",
        }
    }
}

/// Application-wide error type for jam operations.
#[derive(Debug, Error)]
pub enum JamError {
    /// The room does not exist (never created, expired or closed).
    #[error("Room not found: {0}")]
    RoomNotFound(String),

    /// A host-only command was issued by someone other than the host.
    #[error("User {0} is not the host of this room")]
    NotHost(String),

    /// A client sent `jam:closed`, which only the server may emit.
    #[error("jam:closed is a server-only event")]
    JamClosed,

    /// The message could not be parsed or has a type clients may not send.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// The message parsed but its arguments are unusable.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Session Store failure. Not retried; partial effects are left in place.
    #[error("Session store error: {0}")]
    Store(#[from] StoreError),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ErrorCode for JamError {
    fn code(&self) -> &'static str {
        match self {
            Self::RoomNotFound(_) => "room_not_found",
            Self::NotHost(_) => "not_host",
            Self::JamClosed => "jam_closed",
            Self::InvalidMessage(_) => "invalid_message",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Store(e) => e.code(),
            Self::Internal(_) => "internal_error",
        }
    }
}

impl JamError {
    /// Returns a machine-readable error code for API responses.
    pub fn code(&self) -> &'static str {
        ErrorCode::code(self)
    }

    /// Maps the error to an appropriate HTTP status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::RoomNotFound(_) => StatusCode::NOT_FOUND,
            Self::NotHost(_) => StatusCode::FORBIDDEN,
            Self::JamClosed | Self::InvalidMessage(_) | Self::InvalidRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::Store(StoreError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Convenient Result alias for jam operations.
pub type JamResult<T> = Result<T, JamError>;

/// JSON response body for error responses.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    status: u16,
}

impl IntoResponse for JamError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.code(),
            message: self.to_string(),
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_not_found_maps_to_404() {
        let err = JamError::RoomNotFound("r1".into());
        assert_eq!(err.code(), "room_not_found");
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn not_host_maps_to_403() {
        let err = JamError::NotHost("u1".into());
        assert_eq!(err.code(), "not_host");
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn store_unavailable_maps_to_503() {
        let err: JamError = StoreError::Unavailable("down".into()).into();
        assert_eq!(err.code(), "store_unavailable");
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn protocol_violations_are_bad_requests() {
        assert_eq!(JamError::JamClosed.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            JamError::InvalidMessage("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
    }
}
