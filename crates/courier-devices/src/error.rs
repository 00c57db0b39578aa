//! Device reconciliation errors.

use crate::registry::CourierId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeviceError {
    /// The registry could not complete a read or write. Never means "not found".
    #[error("Device storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Invalid fingerprint: {0}")]
    InvalidFingerprint(String),

    #[error("Authentication failed")]
    AuthenticationFailed,

    #[error("Identity is not a registered courier: {0}")]
    NotACourier(String),

    #[error("Courier not found: {0}")]
    CourierNotFound(CourierId),

    #[error("Courier already exists: {0}")]
    CourierExists(CourierId),
}

impl From<std::io::Error> for DeviceError {
    fn from(e: std::io::Error) -> Self {
        DeviceError::StorageUnavailable(e.to_string())
    }
}

impl From<serde_json::Error> for DeviceError {
    fn from(e: serde_json::Error) -> Self {
        DeviceError::StorageUnavailable(format!("JSON serialization error: {}", e))
    }
}

impl From<tokio::time::error::Elapsed> for DeviceError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        DeviceError::StorageUnavailable("storage operation timed out".to_string())
    }
}

impl From<tokio::task::JoinError> for DeviceError {
    fn from(e: tokio::task::JoinError) -> Self {
        DeviceError::StorageUnavailable(format!("registry task failed: {}", e))
    }
}

/// Result type alias for device operations.
pub type DeviceResult<T> = Result<T, DeviceError>;
