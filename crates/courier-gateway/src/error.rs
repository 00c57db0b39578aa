//! Error types for the courier gateway.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use courier_devices::DeviceError;
use serde::Serialize;
use thiserror::Error;

/// Gateway error types.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid device id: {0}")]
    InvalidFingerprint(String),

    #[error("Email or password incorrect")]
    AuthenticationFailed,

    #[error("Sign in required")]
    Unauthenticated,

    #[error("This account is not a registered courier")]
    NotACourier,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            GatewayError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST"),
            GatewayError::InvalidFingerprint(_) => (StatusCode::BAD_REQUEST, "INVALID_DEVICE_ID"),
            GatewayError::AuthenticationFailed => {
                (StatusCode::UNAUTHORIZED, "AUTHENTICATION_FAILED")
            }
            GatewayError::Unauthenticated => (StatusCode::UNAUTHORIZED, "UNAUTHENTICATED"),
            GatewayError::NotACourier => (StatusCode::FORBIDDEN, "NOT_A_COURIER"),
            GatewayError::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            GatewayError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            GatewayError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            GatewayError::RateLimitExceeded => (StatusCode::TOO_MANY_REQUESTS, "RATE_LIMIT_EXCEEDED"),
            GatewayError::StorageUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "STORAGE_UNAVAILABLE")
            }
            GatewayError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };

        let body = ErrorResponse {
            error: self.to_string(),
            code: code.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

impl From<DeviceError> for GatewayError {
    fn from(e: DeviceError) -> Self {
        match e {
            DeviceError::StorageUnavailable(msg) => GatewayError::StorageUnavailable(msg),
            DeviceError::InvalidFingerprint(msg) => GatewayError::InvalidFingerprint(msg),
            DeviceError::AuthenticationFailed => GatewayError::AuthenticationFailed,
            DeviceError::NotACourier(_) => GatewayError::NotACourier,
            DeviceError::CourierNotFound(id) => GatewayError::NotFound(format!("courier {}", id)),
            DeviceError::CourierExists(id) => {
                GatewayError::Conflict(format!("courier {} already exists", id))
            }
        }
    }
}
