//! Task read and dispatch handlers.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::info;

use taskdeck_core::{Task, TaskId};

use crate::http::responses::OutputResponse;
use crate::state::AppState;
use crate::store::StoreError;

async fn load_task(state: &AppState, task_id: &TaskId) -> Result<Task, Response> {
    match state.store.get_task(task_id).await {
        Ok(Some(task)) => Ok(task),
        Ok(None) => Err(StoreError::TaskNotFound(task_id.clone()).into_response()),
        Err(e) => Err(e.into_response()),
    }
}

/// Current output of a task: the live buffer while a run streams,
/// otherwise the last persisted snapshot.
pub async fn get_task_output(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Response {
    let task_id = TaskId::new(task_id);
    let task = match load_task(&state, &task_id).await {
        Ok(task) => task,
        Err(response) => return response,
    };

    if let Some(run_id) = &task.active_run_id {
        if state.accumulator.contains(run_id).await {
            let output = state.accumulator.peek(run_id).await;
            return Json(OutputResponse {
                task_id,
                run_id: Some(run_id.clone()),
                output,
                live: true,
            })
            .into_response();
        }
    }

    match state.store.get_output(&task_id).await {
        Ok(Some(stored)) => Json(OutputResponse {
            task_id,
            run_id: Some(stored.run_id),
            output: stored.text,
            live: false,
        })
        .into_response(),
        Ok(None) => Json(OutputResponse {
            task_id,
            run_id: task.active_run_id.clone(),
            output: task.output.unwrap_or_default(),
            live: false,
        })
        .into_response(),
        Err(e) => e.into_response(),
    }
}

/// Audit trail of a task.
pub async fn list_task_activities(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Response {
    let task_id = TaskId::new(task_id);
    if let Err(response) = load_task(&state, &task_id).await {
        return response;
    }
    match state.store.list_activities(&task_id).await {
        Ok(activities) => Json(activities).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Start a run for an assigned task.
pub async fn dispatch_task(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Response {
    let task_id = TaskId::new(task_id);
    match state.dispatcher.dispatch(&task_id).await {
        Ok(task) => {
            info!(task_id = %task.id, "Task dispatched via HTTP");
            (StatusCode::ACCEPTED, Json(task)).into_response()
        }
        Err(e) => e.into_response(),
    }
}
