use axum::extract::State;
use axum::{Json, Router, routing::get};
use serde::Serialize;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub sessions: usize,
    pub pending_authorizations: usize,
    pub connections: usize,
    pub oauth_configured: bool,
}

/// Liveness plus in-memory counters; never touches Jira.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let stats = state.store.stats();
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        sessions: stats.sessions,
        pending_authorizations: stats.pending_authorizations,
        connections: state.connections.len(),
        oauth_configured: state.flow.is_configured(),
    })
}
