pub mod config;
pub mod handlers;
pub mod registry;
pub mod router;
pub mod session;
pub mod signaling;
pub mod telemetry;
pub mod websocket;

use std::{future::Future, net::SocketAddr};

use anyhow::{Context, Result};
use axum::{routing::get, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::{net::TcpListener, signal};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{
    config::ServerConfig,
    handlers::{health_check, render_metrics, stats, AppState},
    registry::IdentityRegistry,
    websocket::websocket_handler,
};

pub fn build_router(state: AppState, metrics: Option<PrometheusHandle>, ws_path: &str) -> Router {
    let mut router = Router::new()
        .route("/healthz", get(health_check))
        .route("/debug/stats", get(stats))
        .route(ws_path, get(websocket_handler))
        .with_state(state);
    if let Some(handle) = metrics {
        router = router.merge(
            Router::new()
                .route("/metrics", get(render_metrics))
                .with_state(handle),
        );
    }

    router
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Serve `router` on an already-bound listener until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, router: Router, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
    .context("server shutdown with error")
}

pub async fn run(config: ServerConfig, metrics: Option<PrometheusHandle>) -> Result<()> {
    let registry = IdentityRegistry::new();
    let router = build_router(AppState::new(registry), metrics, &config.ws_path);

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    info!(
        listen_addr = %config.listen_addr,
        ws_path = %config.ws_path,
        "beach-ring listening"
    );

    serve(listener, router, shutdown_signal()).await?;

    if !config.shutdown_grace.is_zero() {
        info!(
            grace_seconds = config.shutdown_grace.as_secs(),
            "shutdown signal received; sleeping for graceful period"
        );
        tokio::time::sleep(config.shutdown_grace).await;
    }
    info!("shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
}
