//! Health and metrics handlers.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use tracing::error;

use crate::http::responses::{error_response, HealthResponse};
use crate::state::AppState;

/// Health check endpoint.
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        gateway: state.gateway.state().as_str(),
        last_heartbeat: state.gateway.last_heartbeat(),
        observers: state.hub.observer_count().await,
    })
}

/// Prometheus metrics endpoint.
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> Response {
    match crate::metrics::collect_metrics(&state).await {
        Ok(body) => ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to collect metrics");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}
