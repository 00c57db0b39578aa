//! Rate limiting and request logging middleware.

use crate::error::GatewayError;
use crate::extractors::client_address;
use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use governor::{
    clock::DefaultClock,
    state::{keyed::DefaultKeyedStateStore, InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::{net::SocketAddr, num::NonZeroU32, sync::Arc};
use tracing::{debug, warn};

/// Global rate limiter (not keyed).
pub type GlobalLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Limiter keyed on the client address that also feeds the device hint.
pub type ClientLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

const DEFAULT_GLOBAL_PER_MINUTE: u32 = 120;
const DEFAULT_PER_CLIENT_PER_MINUTE: u32 = 30;

/// Tracked clients above which idle entries are pruned.
const CLIENT_PRUNE_THRESHOLD: usize = 10_000;

/// Rate limiter state shared across requests.
#[derive(Clone)]
pub struct RateLimitState {
    pub global: Arc<GlobalLimiter>,
    pub per_client: Arc<ClientLimiter>,
}

impl RateLimitState {
    /// Zero for either budget falls back to its default.
    pub fn new(global_per_minute: u32, per_client_per_minute: u32) -> Self {
        Self {
            global: Arc::new(RateLimiter::direct(quota(
                global_per_minute,
                DEFAULT_GLOBAL_PER_MINUTE,
            ))),
            per_client: Arc::new(RateLimiter::keyed(quota(
                per_client_per_minute,
                DEFAULT_PER_CLIENT_PER_MINUTE,
            ))),
        }
    }

    /// Create a permissive rate limiter for testing.
    pub fn permissive() -> Self {
        Self::new(10_000, 10_000)
    }

    /// Spend one request from the client's budget, then the global one.
    pub fn admit(&self, client: &str) -> bool {
        if self.per_client.check_key(&client.to_string()).is_err() {
            warn!(client, "Client rate limit exceeded");
            return false;
        }

        if self.global.check().is_err() {
            warn!("Global rate limit exceeded");
            return false;
        }

        if self.per_client.len() > CLIENT_PRUNE_THRESHOLD {
            self.per_client.retain_recent();
        }
        true
    }
}

fn quota(per_minute: u32, fallback: u32) -> Quota {
    let per_minute = NonZeroU32::new(per_minute)
        .or(NonZeroU32::new(fallback))
        .unwrap_or(NonZeroU32::MIN);
    Quota::per_minute(per_minute)
}

/// Returns 429 once the client's or the global budget is spent. Clients
/// are told apart the same way device hints are: forwarded address, then
/// the socket peer.
pub async fn rate_limit_middleware(
    State(rate_limit): State<RateLimitState>,
    request: Request,
    next: Next,
) -> Result<Response, GatewayError> {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let client = client_address(request.headers(), peer);

    if !rate_limit.admit(&client) {
        return Err(GatewayError::RateLimitExceeded);
    }

    Ok(next.run(request).await)
}

/// Logging middleware for requests.
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = std::time::Instant::now();

    let response = next.run(request).await;

    let duration = start.elapsed();
    let status = response.status();

    if status.is_success() {
        debug!(%method, %uri, %status, ?duration, "Request completed");
    } else {
        warn!(%method, %uri, %status, ?duration, "Request failed");
    }

    response
}
