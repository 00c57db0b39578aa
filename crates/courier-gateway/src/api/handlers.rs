//! HTTP request handlers.

use super::types::{
    AuthResponse, CheckDeviceQuery, DeviceHintResponse, DevicesResponse, HealthResponse,
    LoginRequest, LogoutResponse, RegisterRequest, ResetDevicesRequest, ResetDevicesResponse,
    RESET_CONFIRMATION,
};
use super::AppState;
use crate::accounts::secrets_match;
use crate::error::GatewayError;
use crate::extractors::{bearer_token, ClientSignals, Session};
use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use courier_devices::{
    generate_fingerprint, CourierId, Credentials, DeviceCheckResponse, Fingerprint,
};
use secrecy::ExposeSecret;
use tracing::{debug, info, warn};

/// Header carrying the operator token for administrative endpoints.
pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

/// Health check endpoint.
pub async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>, GatewayError> {
    let courier_count = state.reconciler.courier_count().await?;

    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        courier_count,
    }))
}

/// Decide whether to show the login or the registration form.
pub async fn check_device(
    State(state): State<AppState>,
    Session(identity): Session,
    Query(query): Query<CheckDeviceQuery>,
) -> Result<Json<DeviceCheckResponse>, GatewayError> {
    let check = state
        .reconciler
        .check_device(identity.as_ref(), query.device_id.as_deref())
        .await?;

    Ok(Json(check.into()))
}

/// Server-derived fingerprint from request signals. Only a hint: the
/// server never stores it on its own.
pub async fn device_hint(ClientSignals(signals): ClientSignals) -> Json<DeviceHintResponse> {
    let fingerprint = generate_fingerprint(&signals);
    debug!(%fingerprint, "Device hint generated");

    Json(DeviceHintResponse {
        device_id: fingerprint.into_inner(),
    })
}

/// Register a new courier and remember the device they registered from.
pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Result<Json<AuthResponse>, GatewayError> {
    let full_name = request.full_name.trim();
    if request.email.trim().is_empty() || request.password.is_empty() || full_name.is_empty() {
        return Err(GatewayError::InvalidRequest(
            "email, password and full_name are required".into(),
        ));
    }

    // Reject a bad device id before anything is created.
    Fingerprint::from_claim(request.device_id.as_deref())?;

    let courier_id = CourierId::new();
    let identity = state
        .accounts
        .create_account(&request.email, &request.password, full_name, Some(courier_id))
        .await?;

    let device_added = match state
        .reconciler
        .register_courier(courier_id, request.device_id.as_deref())
        .await
    {
        Ok(added) => added,
        Err(e) => {
            warn!(courier_id = %courier_id, error = %e, "Courier registration failed, removing account");
            state.accounts.remove_account(&identity).await;
            return Err(e.into());
        }
    };

    let session_token = state.accounts.issue_session(&identity).await;
    info!(courier_id = %courier_id, device_added, "Courier registration complete");

    Ok(Json(AuthResponse {
        success: true,
        message: "Courier registered successfully".to_string(),
        courier_id,
        session_token,
        device_added,
    }))
}

/// Courier login. Wrong credentials and unknown devices are never the same answer.
pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, GatewayError> {
    if request.email.trim().is_empty() || request.password.is_empty() {
        return Err(GatewayError::InvalidRequest(
            "email and password are required".into(),
        ));
    }

    let credentials = Credentials {
        login: request.email,
        secret: request.password,
    };

    let outcome = state
        .reconciler
        .login(&credentials, request.device_id.as_deref())
        .await?;

    let session_token = state.accounts.issue_session(&outcome.identity).await;
    let message = match state.accounts.full_name(&outcome.identity).await {
        Some(name) if !name.is_empty() => format!("Welcome back, {}", name),
        _ => "Logged in successfully".to_string(),
    };

    Ok(Json(AuthResponse {
        success: true,
        message,
        courier_id: outcome.courier_id,
        session_token,
        device_added: outcome.device_added,
    }))
}

/// End the caller's session. Devices stay remembered.
pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Json<LogoutResponse> {
    let success = match bearer_token(&headers) {
        Some(token) => state.accounts.end_session(token).await,
        None => false,
    };

    Json(LogoutResponse { success })
}

/// Devices remembered for a courier. Only the courier themself may look.
pub async fn list_devices(
    State(state): State<AppState>,
    Session(identity): Session,
    Path(courier_id): Path<String>,
) -> Result<Json<DevicesResponse>, GatewayError> {
    let courier_id: CourierId = courier_id
        .parse()
        .map_err(|_| GatewayError::InvalidRequest("malformed courier id".into()))?;

    let Some(identity) = identity else {
        return Err(GatewayError::Unauthenticated);
    };

    if state.reconciler.courier_for_identity(&identity).await? != Some(courier_id) {
        return Err(GatewayError::Forbidden(
            "devices of another courier".into(),
        ));
    }

    let devices = state.reconciler.devices(courier_id).await?;

    Ok(Json(DevicesResponse {
        courier_id,
        device_ids: devices.into_iter().map(Fingerprint::into_inner).collect(),
    }))
}

/// Clear every courier's devices. Needs the operator token and an explicit
/// confirmation phrase.
pub async fn reset_devices(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ResetDevicesRequest>,
) -> Result<Json<ResetDevicesResponse>, GatewayError> {
    let Some(expected) = state.admin_token.as_ref() else {
        return Err(GatewayError::Forbidden("device reset is disabled".into()));
    };

    let provided = headers
        .get(ADMIN_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if provided.is_empty() || !secrets_match(provided, expected.expose_secret()) {
        warn!("Device reset refused: bad admin token");
        return Err(GatewayError::Forbidden("invalid admin token".into()));
    }

    if request.confirm != RESET_CONFIRMATION {
        return Err(GatewayError::InvalidRequest(format!(
            "confirm must be \"{}\"",
            RESET_CONFIRMATION
        )));
    }

    let cleared = state.reconciler.reset_all_devices().await?;
    warn!(cleared, "Courier devices reset by operator");

    Ok(Json(ResetDevicesResponse { cleared }))
}
