//! Agent projection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AgentId, AgentStatus, TaskId};

/// An autonomous agent that executes tasks through the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    /// Unique agent identifier (also the gateway agent id).
    pub id: AgentId,

    /// Display name.
    pub name: String,

    /// Current status.
    pub status: AgentStatus,

    /// Task the agent is currently working on.
    pub current_task_id: Option<TaskId>,

    /// Number of tasks completed successfully.
    pub completed_tasks: u64,

    /// Tokens consumed across all completed runs.
    pub total_tokens: u64,

    /// When the agent row last changed.
    pub updated_at: DateTime<Utc>,
}

impl Agent {
    /// Create a new idle Agent.
    pub fn new(id: AgentId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            status: AgentStatus::Idle,
            current_task_id: None,
            completed_tasks: 0,
            total_tokens: 0,
            updated_at: Utc::now(),
        }
    }
}
