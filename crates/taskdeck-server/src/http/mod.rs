//! HTTP server for the coordinator.
//!
//! Provides endpoints for:
//! - Observer WebSocket (`/ws`)
//! - Task output and audit trail (`/v1/tasks/:task_id/...`)
//! - Task dispatch (`/v1/tasks/:task_id/dispatch`)
//! - Health check (`/health`)
//! - Prometheus metrics (`/metrics`)

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

mod handlers;
pub mod responses;

/// Create the HTTP router.
pub fn create_router(state: Arc<AppState>) -> Router {
    // CORS layer for dashboard access
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Observer stream
        .route("/ws", get(handlers::observer_ws))
        // Task routes
        .route("/v1/tasks/:task_id/output", get(handlers::get_task_output))
        .route(
            "/v1/tasks/:task_id/activities",
            get(handlers::list_task_activities),
        )
        .route("/v1/tasks/:task_id/dispatch", post(handlers::dispatch_task))
        // Observability routes
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;
    use crate::testing::{test_state, test_state_with, FixedGateway};
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use chrono::{TimeZone, Utc};
    use serde_json::Value;
    use taskdeck_core::{Activity, ActivityKind, AgentId, RunId, Task, TaskId};
    use taskdeck_gateway::ConnectionState;
    use tower::ServiceExt;

    async fn call(router: Router, method: &str, uri: &str) -> (StatusCode, Value) {
        let response = router
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    #[tokio::test]
    async fn test_health_reports_gateway_state() {
        let (state, _) = test_state(ConnectionState::Connecting).await;
        let (status, body) = call(create_router(state), "GET", "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["gateway"], "connecting");
        assert!(body["lastHeartbeat"].is_null());
    }

    #[tokio::test]
    async fn test_health_reports_last_heartbeat() {
        let beat = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        let (state, _) = test_state_with(FixedGateway {
            state: ConnectionState::Connected,
            last_heartbeat: Some(beat),
        })
        .await;

        let (status, body) = call(create_router(state), "GET", "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["gateway"], "connected");
        let reported: chrono::DateTime<Utc> =
            serde_json::from_value(body["lastHeartbeat"].clone()).unwrap();
        assert_eq!(reported, beat);
    }

    #[tokio::test]
    async fn test_metrics_is_prometheus_text() {
        let (state, _) = test_state(ConnectionState::Connected).await;
        let response = create_router(state)
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("taskdeck_gateway_connected 1"));
    }

    #[tokio::test]
    async fn test_output_prefers_live_buffer() {
        let (state, store) = test_state(ConnectionState::Connected).await;
        store
            .insert_task(
                Task::new("Live", "")
                    .with_id(TaskId::new("t1"))
                    .with_run(RunId::new("r1")),
            )
            .await
            .unwrap();
        state.accumulator.append(&RunId::new("r1"), "streaming").await;

        let (status, body) = call(create_router(state), "GET", "/v1/tasks/t1/output").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["output"], "streaming");
        assert_eq!(body["live"], true);
        assert_eq!(body["runId"], "r1");
    }

    #[tokio::test]
    async fn test_output_falls_back_to_snapshot() {
        let (state, store) = test_state(ConnectionState::Connected).await;
        store
            .insert_task(Task::new("Finished", "").with_id(TaskId::new("t1")))
            .await
            .unwrap();
        store
            .upsert_output(&TaskId::new("t1"), &RunId::new("r1"), "final text")
            .await
            .unwrap();

        let (status, body) = call(create_router(state), "GET", "/v1/tasks/t1/output").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["output"], "final text");
        assert_eq!(body["live"], false);
    }

    #[tokio::test]
    async fn test_unknown_task_is_404() {
        let (state, _) = test_state(ConnectionState::Connected).await;
        let (status, body) = call(create_router(state.clone()), "GET", "/v1/tasks/nope/output").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Task not found: nope");

        let (status, _) = call(create_router(state), "GET", "/v1/tasks/nope/activities").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_activities_listed() {
        let (state, store) = test_state(ConnectionState::Connected).await;
        store
            .insert_task(Task::new("Audited", "").with_id(TaskId::new("t1")))
            .await
            .unwrap();
        store
            .insert_activity(&Activity::new(
                TaskId::new("t1"),
                None,
                RunId::new("r1"),
                ActivityKind::RunStarted,
                "Run started",
            ))
            .await
            .unwrap();

        let (status, body) = call(create_router(state), "GET", "/v1/tasks/t1/activities").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().map(Vec::len), Some(1));
        assert_eq!(body[0]["kind"], "run_started");
    }

    #[tokio::test]
    async fn test_dispatch_routes() {
        let (state, store) = test_state(ConnectionState::Connected).await;
        store
            .insert_task(
                Task::new("Go", "")
                    .with_id(TaskId::new("t1"))
                    .with_agent(AgentId::new("a1")),
            )
            .await
            .unwrap();
        store
            .insert_task(Task::new("Nobody", "").with_id(TaskId::new("t2")))
            .await
            .unwrap();

        let (status, body) = call(create_router(state.clone()), "POST", "/v1/tasks/t1/dispatch").await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["activeRunId"], "run-1");
        assert_eq!(body["sessionKey"], "task:t1");

        let (status, _) = call(create_router(state), "POST", "/v1/tasks/t2/dispatch").await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_dispatch_without_gateway_is_503() {
        let (state, store) = test_state(ConnectionState::Disconnected).await;
        store
            .insert_task(
                Task::new("Go", "")
                    .with_id(TaskId::new("t1"))
                    .with_agent(AgentId::new("a1")),
            )
            .await
            .unwrap();

        let (status, _) = call(create_router(state), "POST", "/v1/tasks/t1/dispatch").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
