//! Status enums for Tasks, Agents, and Runs.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::CoreError;

/// Status of a Task on the board.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task created, nobody is working on it yet.
    #[default]
    Inbox,
    /// Task handed to an agent, run not started yet.
    Assigned,
    /// The agent's run is executing.
    InProgress,
    /// Waiting for a human to review the output.
    Review,
    /// The run failed; needs attention.
    Blocked,
    /// Completed successfully.
    Done,
    /// Cancelled by a user.
    Cancelled,
}

impl TaskStatus {
    /// All statuses in board order.
    pub const ALL: [TaskStatus; 7] = [
        TaskStatus::Inbox,
        TaskStatus::Assigned,
        TaskStatus::InProgress,
        TaskStatus::Review,
        TaskStatus::Blocked,
        TaskStatus::Done,
        TaskStatus::Cancelled,
    ];

    /// Wire name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inbox => "inbox",
            Self::Assigned => "assigned",
            Self::InProgress => "in_progress",
            Self::Review => "review",
            Self::Blocked => "blocked",
            Self::Done => "done",
            Self::Cancelled => "cancelled",
        }
    }

    /// Returns true if no run lifecycle event may move the task any further.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Cancelled)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| CoreError::UnknownStatus(s.to_string()))
    }
}

/// Outcome recorded when a task's run finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    Success,
    Failed,
}

/// Status of an Agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Agent is ready to take work.
    #[default]
    Idle,
    /// Agent is executing a run.
    Working,
    /// Agent is not reachable through the gateway.
    Offline,
}

impl AgentStatus {
    /// Wire name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Working => "working",
            Self::Offline => "offline",
        }
    }
}

/// Lifecycle phase of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    /// Run requested but no lifecycle event seen yet.
    #[default]
    Pending,
    /// Lifecycle start observed.
    Started,
    /// Lifecycle end observed.
    Ended,
    /// Lifecycle error observed.
    Errored,
}

impl RunPhase {
    /// Returns true if the run is in a terminal phase.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ended | Self::Errored)
    }
}
