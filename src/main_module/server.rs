//! HTTP server initialization and routing

use anyhow::{Context, Result};
use axum::{routing::get, Router};
use log::info;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::core::shared::state::AppState;
use crate::performance::configure_performance_routes;

use super::{health_check, shutdown_signal};

/// Performance routes live under `api_prefix`; an empty or `/` prefix mounts them at the root.
pub fn build_router(app_state: Arc<AppState>) -> Router {
    let prefix = app_state.config.api_prefix.trim_end_matches('/');

    let api_router = if prefix.is_empty() {
        configure_performance_routes()
    } else {
        Router::new().nest(prefix, configure_performance_routes())
    };

    Router::new()
        .route("/health", get(health_check))
        .merge(api_router)
        .with_state(app_state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

pub async fn run_server(app_state: Arc<AppState>) -> Result<()> {
    let addr = app_state.config.server_addr()?;
    let prefix = app_state.config.api_prefix.clone();
    let app = build_router(app_state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("HTTP server listening on {} (api prefix: {})", addr, prefix);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    info!("Server stopped");
    Ok(())
}
