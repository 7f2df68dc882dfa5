//! Audit records derived from run lifecycle events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::ids::{ActivityId, AgentId, RunId, TaskId};

/// An append-only audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    /// Unique record identifier.
    pub id: ActivityId,
    /// Task the record belongs to.
    pub task_id: TaskId,
    /// Agent that produced it, if known.
    pub agent_id: Option<AgentId>,
    /// Run that produced it.
    pub run_id: RunId,
    /// Type of record.
    pub kind: ActivityKind,
    /// Human-readable summary.
    pub message: String,
    /// Record-specific metadata (tool name, tokens, error, ...).
    pub metadata: HashMap<String, String>,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
}

impl Activity {
    /// Create a new activity record.
    pub fn new(
        task_id: TaskId,
        agent_id: Option<AgentId>,
        run_id: RunId,
        kind: ActivityKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: ActivityId::generate(),
            task_id,
            agent_id,
            run_id,
            kind,
            message: message.into(),
            metadata: HashMap::new(),
            created_at: Utc::now(),
        }
    }

    /// Builder method to add a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Builder method to set the creation time.
    pub fn at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }
}

/// Type of audit record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    /// Run started executing.
    RunStarted,
    /// Run finished successfully.
    RunCompleted,
    /// Run failed.
    RunFailed,
    /// Agent called a tool.
    ToolCalled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_called_record() {
        let activity = Activity::new(
            TaskId::new("t1"),
            Some(AgentId::new("a1")),
            RunId::new("r1"),
            ActivityKind::ToolCalled,
            "Called read",
        )
        .with_metadata("tool_name", "read");

        assert_eq!(activity.kind, ActivityKind::ToolCalled);
        assert_eq!(activity.metadata.get("tool_name"), Some(&"read".to_string()));
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ActivityKind::RunCompleted).unwrap();
        assert_eq!(json, "\"run_completed\"");
    }
}
