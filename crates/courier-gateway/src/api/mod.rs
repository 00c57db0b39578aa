//! HTTP API for courier device checks.

mod handlers;
mod middleware;
mod types;

pub use handlers::*;
pub use middleware::{logging_middleware, rate_limit_middleware, RateLimitState};
pub use types::*;

use crate::accounts::Accounts;
use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use courier_devices::DeviceReconciler;
use secrecy::SecretString;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Device reconciler over the courier device registry
    pub reconciler: DeviceReconciler,
    /// Credentials and sessions
    pub accounts: Arc<Accounts>,
    /// Operator token for the device reset; `None` disables it
    pub admin_token: Option<Arc<SecretString>>,
}

impl AppState {
    pub fn new(
        reconciler: DeviceReconciler,
        accounts: Arc<Accounts>,
        admin_token: Option<SecretString>,
    ) -> Self {
        Self {
            reconciler,
            accounts,
            admin_token: admin_token.map(Arc::new),
        }
    }
}

/// Create the API router with the default rate limits.
pub fn create_router(state: AppState) -> Router {
    create_router_with_rate_limit(state, RateLimitState::new(0, 0))
}

/// Create the API router with custom rate limiting.
pub fn create_router_with_rate_limit(state: AppState, rate_limit: RateLimitState) -> Router {
    let v1 = Router::new()
        .route("/v1/couriers/check-device", get(handlers::check_device))
        .route("/v1/couriers/device-hint", get(handlers::device_hint))
        .route("/v1/couriers/register", post(handlers::register))
        .route("/v1/couriers/login", post(handlers::login))
        .route("/v1/couriers/logout", post(handlers::logout))
        .route("/v1/couriers/:courier_id/devices", get(handlers::list_devices))
        .route("/v1/admin/devices/reset", post(handlers::reset_devices))
        .layer(axum_middleware::from_fn_with_state(
            rate_limit,
            rate_limit_middleware,
        ));

    Router::new()
        // Health check (no rate limiting)
        .route("/health", get(handlers::health))
        .merge(v1)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(axum_middleware::from_fn(logging_middleware)),
        )
        .with_state(state)
}
