//! Task projection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AgentId, RunId, TaskId, TaskOutcome, TaskStatus};

/// A Task is a unit of work handed to an agent.
///
/// This is the coordinator's view of the task row owned by the persistence
/// store. Lifecycle reconciliation only ever moves it forward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Unique task identifier.
    pub id: TaskId,

    /// Short title shown on the board.
    pub title: String,

    /// Instructions sent to the agent.
    pub description: String,

    /// Current task status.
    pub status: TaskStatus,

    /// Agent the task is assigned to.
    pub assigned_agent_id: Option<AgentId>,

    /// Gateway session the task's runs execute in.
    pub session_key: Option<String>,

    /// Run currently bound to this task.
    pub active_run_id: Option<RunId>,

    /// Latest output (final assistant text or error text).
    pub output: Option<String>,

    /// Outcome of the latest finished run.
    pub outcome: Option<TaskOutcome>,

    /// Tokens consumed by the latest finished run.
    pub tokens_used: u64,

    /// When the task was created.
    pub created_at: DateTime<Utc>,

    /// When the task row last changed.
    pub updated_at: DateTime<Utc>,

    /// When the latest run started.
    pub started_at: Option<DateTime<Utc>>,

    /// When the latest run finished.
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a new Task in the inbox.
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::generate(),
            title: title.into(),
            description: description.into(),
            status: TaskStatus::Inbox,
            assigned_agent_id: None,
            session_key: None,
            active_run_id: None,
            output: None,
            outcome: None,
            tokens_used: 0,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// Builder method to set a specific ID (useful for testing).
    pub fn with_id(mut self, id: TaskId) -> Self {
        self.id = id;
        self
    }

    /// Builder method to assign the task to an agent.
    pub fn with_agent(mut self, agent_id: AgentId) -> Self {
        self.assigned_agent_id = Some(agent_id);
        self.status = TaskStatus::Assigned;
        self
    }

    /// Builder method to bind a run.
    pub fn with_run(mut self, run_id: RunId) -> Self {
        self.active_run_id = Some(run_id);
        self
    }

    /// Check whether the given run is the one bound to this task.
    pub fn is_bound_to(&self, run_id: &RunId) -> bool {
        self.active_run_id.as_ref() == Some(run_id)
    }

    /// Check if the task is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_task_starts_in_inbox() {
        let task = Task::new("Write docs", "Document the bridge");
        assert_eq!(task.status, TaskStatus::Inbox);
        assert!(task.active_run_id.is_none());
        assert_eq!(task.tokens_used, 0);
    }

    #[test]
    fn test_with_agent_marks_assigned() {
        let task = Task::new("t", "d").with_agent(AgentId::new("a1"));
        assert_eq!(task.status, TaskStatus::Assigned);
        assert_eq!(task.assigned_agent_id, Some(AgentId::new("a1")));
    }

    #[test]
    fn test_serializes_camel_case() {
        let task = Task::new("t", "d").with_run(RunId::new("r1"));
        let value = serde_json::to_value(&task).unwrap();
        assert_eq!(value["activeRunId"], "r1");
        assert_eq!(value["status"], "inbox");
    }
}
