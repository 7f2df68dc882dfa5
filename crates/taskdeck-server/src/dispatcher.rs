//! Task dispatcher - hands assigned tasks to their agent through the gateway.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, warn};

use taskdeck_core::{Task, TaskId, TaskStatus};
use taskdeck_gateway::{AgentRunAccepted, AgentRunRequest, ConnectionManager, GatewayError};

use crate::hub::{BroadcastHub, BroadcastMessage, Envelope};
use crate::runs::RunTable;
use crate::store::{Store, StoreError};

/// Dispatcher errors.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Task has no assigned agent: {0}")]
    NoAgentAssigned(TaskId),

    #[error("Task {task_id} cannot be dispatched while {status}")]
    InvalidState { task_id: TaskId, status: TaskStatus },

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Starts agent runs. Implemented by the gateway connection.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    async fn run_agent(&self, request: &AgentRunRequest) -> Result<AgentRunAccepted, GatewayError>;
}

#[async_trait]
impl AgentRunner for ConnectionManager {
    async fn run_agent(&self, request: &AgentRunRequest) -> Result<AgentRunAccepted, GatewayError> {
        ConnectionManager::run_agent(self, request).await
    }
}

/// Session key a task's runs execute under.
pub fn session_key_for(task_id: &TaskId) -> String {
    format!("task:{}", task_id)
}

/// Task dispatcher.
pub struct Dispatcher {
    store: Arc<dyn Store>,
    runner: Arc<dyn AgentRunner>,
    hub: Arc<BroadcastHub>,
    runs: Arc<RunTable>,
}

impl Dispatcher {
    /// Create a new Dispatcher.
    pub fn new(store: Arc<dyn Store>, runner: Arc<dyn AgentRunner>, hub: Arc<BroadcastHub>) -> Self {
        Self {
            store,
            runner,
            hub,
            runs: Arc::new(RunTable::new()),
        }
    }

    /// Builder method to share the reconciler's run table, so re-dispatching
    /// a task retires the record of its previous run.
    pub fn with_run_table(mut self, runs: Arc<RunTable>) -> Self {
        self.runs = runs;
        self
    }

    /// Start a run for an assigned task.
    ///
    /// The session key is persisted before the gateway call so lifecycle
    /// events that beat the RPC response can still find the task.
    pub async fn dispatch(&self, task_id: &TaskId) -> Result<Task, DispatchError> {
        let mut task = self
            .store
            .get_task(task_id)
            .await?
            .ok_or_else(|| DispatchError::TaskNotFound(task_id.clone()))?;

        if !matches!(task.status, TaskStatus::Inbox | TaskStatus::Assigned) {
            return Err(DispatchError::InvalidState {
                task_id: task_id.clone(),
                status: task.status,
            });
        }
        let agent_id = task
            .assigned_agent_id
            .clone()
            .ok_or_else(|| DispatchError::NoAgentAssigned(task_id.clone()))?;

        let session_key = session_key_for(&task.id);
        let now = Utc::now();
        let previous_status = task.status;
        if let Some(previous_run) = task.active_run_id.as_ref() {
            if self.runs.forget(previous_run).await.is_some() {
                debug!(task_id = %task.id, run_id = %previous_run, "Dropped record of previous run");
            }
        }
        task.status = TaskStatus::Assigned;
        task.session_key = Some(session_key.clone());
        task.active_run_id = None;
        task.output = None;
        task.outcome = None;
        task.updated_at = now;
        self.store.update_task(&task).await?;

        let request = AgentRunRequest {
            agent_id: agent_id.as_str().to_string(),
            session_key,
            message: prompt_for(&task),
            idempotency_key: format!("{}:{}", task.id, now.timestamp_millis()),
        };

        info!(task_id = %task.id, agent_id = %agent_id, "Dispatching task to agent");
        let accepted = match self.runner.run_agent(&request).await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "Agent run request failed");
                return Err(e.into());
            }
        };

        // Lifecycle events may already have bound the run through the session
        // and moved the task on; only the binding is written here.
        let current = match self
            .store
            .bind_run_if_unbound(task_id, &accepted.run_id)
            .await?
        {
            Some(bound) => bound,
            None => {
                debug!(task_id = %task_id, run_id = %accepted.run_id, "Run already bound by lifecycle event");
                self.store
                    .get_task(task_id)
                    .await?
                    .ok_or_else(|| DispatchError::TaskNotFound(task_id.clone()))?
            }
        };
        info!(task_id = %current.id, run_id = %accepted.run_id, "Agent run accepted");

        self.hub
            .deliver(&Envelope::task(
                current.id.clone(),
                BroadcastMessage::task_update(&current),
            ))
            .await;
        if previous_status != TaskStatus::Assigned {
            let counts = self.store.task_counts().await?;
            self.hub
                .deliver(&Envelope::all(BroadcastMessage::stats_update(&counts)))
                .await;
        }

        Ok(current)
    }
}

fn prompt_for(task: &Task) -> String {
    if task.description.is_empty() {
        task.title.clone()
    } else {
        format!("{}\n\n{}", task.title, task.description)
    }
}
