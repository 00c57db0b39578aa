//! API request and response types.

use courier_devices::CourierId;
use serde::{Deserialize, Serialize};

/// Query string for a device check.
#[derive(Debug, Default, Deserialize)]
pub struct CheckDeviceQuery {
    /// Client-held device id, if the client has one
    pub device_id: Option<String>,
}

/// Request to register a new courier.
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub email: String,

    #[serde(default)]
    pub password: String,

    #[serde(default)]
    pub full_name: String,

    /// Device id to remember for this courier
    pub device_id: Option<String>,
}

/// Courier login request.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,

    #[serde(default)]
    pub password: String,

    /// Device id to remember for this courier
    pub device_id: Option<String>,
}

/// Response after a successful login or registration.
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub success: bool,
    pub message: String,
    pub courier_id: CourierId,
    pub session_token: String,
    /// Whether the device id was new for this courier
    pub device_added: bool,
}

/// Response after logout.
#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub success: bool,
}

/// Server-derived device hint.
#[derive(Debug, Serialize)]
pub struct DeviceHintResponse {
    pub device_id: String,
}

/// Devices remembered for a courier.
#[derive(Debug, Serialize)]
pub struct DevicesResponse {
    pub courier_id: CourierId,
    pub device_ids: Vec<String>,
}

/// Request to clear every courier's devices.
#[derive(Debug, Deserialize)]
pub struct ResetDevicesRequest {
    /// Must be exactly [`RESET_CONFIRMATION`]
    #[serde(default)]
    pub confirm: String,
}

/// Confirmation phrase for the device reset.
pub const RESET_CONFIRMATION: &str = "RESET";

/// Response after clearing devices.
#[derive(Debug, Serialize)]
pub struct ResetDevicesResponse {
    /// Couriers whose device set was non-empty
    pub cleared: usize,
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub courier_count: usize,
}
