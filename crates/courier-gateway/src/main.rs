//! Courier Gateway - Entry point.

use courier_devices::{DeviceReconciler, DeviceRegistry, Registry, Store};
use courier_gateway::{
    api::{create_router_with_rate_limit, AppState, RateLimitState},
    config::{Config, LogFormat},
    Accounts,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() {
    // Load configuration
    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log.level));

    match config.log.format {
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }

    info!("Starting Courier Gateway");

    // Initialize storage
    let store = if config.registry.persist {
        Store::file(config.registry.path.clone())
    } else {
        info!("Persistence disabled, using in-memory storage");
        Store::memory()
    };

    // An unreadable registry must not be mistaken for an empty one
    let registry = match Registry::open(store).await {
        Ok(r) => r,
        Err(e) => {
            error!(path = %config.registry.path.display(), "Failed to load device registry: {}", e);
            std::process::exit(1);
        }
    };

    match registry.courier_count().await {
        Ok(count) => info!("Loaded device registry with {} couriers", count),
        Err(e) => error!("Failed to count couriers: {}", e),
    }

    // Create application state
    let accounts = Arc::new(Accounts::new());
    let reconciler = DeviceReconciler::new(Arc::new(registry), accounts.clone(), accounts.clone())
        .with_storage_timeout(config.reconciler.storage_timeout);

    if config.admin.token.is_none() {
        info!("No admin token configured, device reset is disabled");
    }

    let state = AppState::new(reconciler, accounts, config.admin.token);

    // Create rate limiter from config
    let rate_limit = RateLimitState::new(
        config.rate_limit.global_per_minute,
        config.rate_limit.per_client_per_minute,
    );

    // Create router with rate limiting
    let app = create_router_with_rate_limit(state, rate_limit);

    // Bind to address
    let addr = SocketAddr::new(
        config.server.listen_addr.parse().unwrap_or([0, 0, 0, 0].into()),
        config.server.port,
    );

    info!("Listening on {}", addr);

    let listener = match TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    // Peer addresses feed the device hint when no proxy header is present
    if let Err(e) = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    {
        error!("Server error: {}", e);
        std::process::exit(1);
    }
}
