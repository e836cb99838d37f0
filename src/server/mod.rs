pub mod auth;
pub mod handlers;
pub mod headers;
pub mod state;

use crate::{config::Config, error::RelayError};
use axum::{
    Router,
    http::{HeaderName, HeaderValue},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};
use state::AppState;
use std::any::Any;
use std::time::Duration;
use tower_http::{
    catch_panic::CatchPanicLayer, set_header::SetResponseHeaderLayer, trace::TraceLayer,
};
use tracing::{error, info};

/// Header carrying the relay version on every response
pub const VERSION_HEADER: &str = "x-relay-version";

/// How often expired in-memory cache entries are swept
pub const CACHE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Build the router from configuration
pub async fn build_router(config: Config) -> Result<Router, Box<dyn std::error::Error>> {
    let state = AppState::new(config).await?;
    Ok(router(state))
}

/// Build the router around prepared state
pub fn router(state: AppState) -> Router {
    let proxy = Router::new()
        .route(
            "/proxy/{*target}",
            get(handlers::proxy::proxy)
                .post(handlers::proxy::proxy)
                .options(handlers::proxy::preflight),
        )
        .route(
            "/proxy",
            get(handlers::proxy::proxy)
                .post(handlers::proxy::proxy)
                .options(handlers::proxy::preflight),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::access_gate,
        ));

    Router::new()
        .route("/", get(handlers::health::health_check))
        .route("/health", get(handlers::health::health_check))
        .route("/metrics", get(handlers::health::metrics))
        .merge(proxy)
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static(VERSION_HEADER),
            HeaderValue::from_static(env!("CARGO_PKG_VERSION")),
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Render a handler panic as a regular 500 relay error
fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .cloned()
        .or_else(|| panic.downcast_ref::<&str>().map(|s| s.to_string()))
        .unwrap_or_else(|| "unknown panic".to_string());
    RelayError::Internal(format!("handler panicked: {}", detail)).into_response()
}

/// Start the Axum HTTP server
pub async fn start(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("0.0.0.0:{}", config.port);

    let state = AppState::new(config).await?;
    let relay = state.relay.clone();
    let sweeper = relay.cache().spawn_sweeper(CACHE_SWEEP_INTERVAL);
    let app = router(state);

    // Bind TCP listener
    let listener = match tokio::net::TcpListener::bind(addr.as_str()).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to address {}: {}", addr, e);
            return Err(e.into());
        }
    };

    info!("🚀 Relay listening on http://{}", addr);

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("Server error: {}", e);
        return Err(e.into());
    }

    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }
    info!("Draining pending cache writes");
    relay.cache().flush().await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
