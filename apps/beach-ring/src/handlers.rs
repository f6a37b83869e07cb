use axum::{
    extract::{FromRef, State},
    http::header,
    response::IntoResponse,
    Json,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use serde_json::json;

use crate::registry::IdentityRegistry;
use crate::websocket::SignalingState;

#[derive(Clone)]
pub struct AppState {
    signaling: SignalingState,
}

impl AppState {
    pub fn new(registry: IdentityRegistry) -> Self {
        Self {
            signaling: SignalingState::new(registry),
        }
    }
}

impl FromRef<AppState> for SignalingState {
    fn from_ref(state: &AppState) -> Self {
        state.signaling.clone()
    }
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub registered_identities: usize,
    pub active_sessions: usize,
}

pub async fn health_check() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        registered_identities: state.signaling.registry().len(),
        active_sessions: state.signaling.active_sessions(),
    })
}

/// Mounted with its own state, only when a recorder is installed.
pub async fn render_metrics(State(metrics): State<PrometheusHandle>) -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], metrics.render())
}
