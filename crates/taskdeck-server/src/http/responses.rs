//! HTTP request and response types.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use taskdeck_core::{RunId, TaskId};
use taskdeck_gateway::GatewayError;

use crate::dispatcher::DispatchError;
use crate::store::StoreError;

// ============================================================================
// Error types
// ============================================================================

/// Error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Build an error response.
pub fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
        .into_response()
}

impl IntoResponse for StoreError {
    fn into_response(self) -> Response {
        let status = match self {
            StoreError::TaskNotFound(_) | StoreError::AgentNotFound(_) => StatusCode::NOT_FOUND,
            StoreError::DuplicateTask(_) => StatusCode::CONFLICT,
            StoreError::Backend(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        error_response(status, self.to_string())
    }
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        let status = match &self {
            DispatchError::TaskNotFound(_) => StatusCode::NOT_FOUND,
            DispatchError::NoAgentAssigned(_) | DispatchError::InvalidState { .. } => {
                StatusCode::CONFLICT
            }
            DispatchError::Gateway(GatewayError::NotConnected) => StatusCode::SERVICE_UNAVAILABLE,
            DispatchError::Gateway(GatewayError::Timeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
            DispatchError::Gateway(_) => StatusCode::BAD_GATEWAY,
            DispatchError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        error_response(status, self.to_string())
    }
}

// ============================================================================
// Health types
// ============================================================================

/// Health check response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub gateway: &'static str,
    /// Last heartbeat frame received from the gateway.
    pub last_heartbeat: Option<chrono::DateTime<chrono::Utc>>,
    pub observers: usize,
}

// ============================================================================
// Task read types
// ============================================================================

/// Output of a task.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputResponse {
    pub task_id: TaskId,
    pub run_id: Option<RunId>,
    pub output: String,
    /// True while the run is still streaming.
    pub live: bool,
}

// ============================================================================
// Observer protocol
// ============================================================================

/// Messages an observer may send.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "subscribe:task", rename_all = "camelCase")]
    SubscribeTask { task_id: TaskId },
    #[serde(rename = "unsubscribe:task", rename_all = "camelCase")]
    UnsubscribeTask { task_id: TaskId },
    #[serde(rename = "ping")]
    Ping,
}

/// Reply to a JSON ping.
#[derive(Debug, Serialize)]
pub struct PongMessage {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl PongMessage {
    pub fn now() -> Self {
        Self {
            kind: "pong",
            timestamp: chrono::Utc::now(),
        }
    }
}
