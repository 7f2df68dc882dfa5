//! Persistence interface.
//!
//! The reconciler and dispatcher only need keyed reads and single-row
//! writes; nothing here assumes multi-row transactions. [`MemoryStore`] is
//! the in-process implementation used by the binary and the tests.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::RwLock;

use taskdeck_core::{Activity, Agent, AgentId, AgentStatus, RunId, Task, TaskId, TaskStatus};

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Agent not found: {0}")]
    AgentNotFound(AgentId),

    #[error("Task already exists: {0}")]
    DuplicateTask(TaskId),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// A persisted output snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredOutput {
    /// Run that produced the text.
    pub run_id: RunId,
    /// Accumulated text at the time of the snapshot.
    pub text: String,
}

/// Keyed persistence for tasks, agents, audit records and output snapshots.
#[async_trait]
pub trait Store: Send + Sync {
    /// Look up a task by id.
    async fn get_task(&self, id: &TaskId) -> Result<Option<Task>, StoreError>;

    /// Find the task whose active run is `run_id`.
    async fn find_task_by_run(&self, run_id: &RunId) -> Result<Option<Task>, StoreError>;

    /// Find the task dispatched under `session_key`.
    async fn find_task_by_session(&self, session_key: &str) -> Result<Option<Task>, StoreError>;

    /// Insert a new task.
    async fn insert_task(&self, task: Task) -> Result<(), StoreError>;

    /// Overwrite an existing task.
    async fn update_task(&self, task: &Task) -> Result<(), StoreError>;

    /// Set the task's active run if it has none, in one step.
    ///
    /// Only `active_run_id` and `updated_at` change. Returns the updated row,
    /// or `None` if a run was already bound.
    async fn bind_run_if_unbound(
        &self,
        task_id: &TaskId,
        run_id: &RunId,
    ) -> Result<Option<Task>, StoreError>;

    /// Look up an agent by id.
    async fn get_agent(&self, id: &AgentId) -> Result<Option<Agent>, StoreError>;

    /// Insert or replace an agent.
    async fn upsert_agent(&self, agent: &Agent) -> Result<(), StoreError>;

    /// Append an audit record.
    async fn insert_activity(&self, activity: &Activity) -> Result<(), StoreError>;

    /// Audit records for a task, oldest first.
    async fn list_activities(&self, task_id: &TaskId) -> Result<Vec<Activity>, StoreError>;

    /// Insert or replace the output snapshot for a task.
    async fn upsert_output(
        &self,
        task_id: &TaskId,
        run_id: &RunId,
        text: &str,
    ) -> Result<(), StoreError>;

    /// Latest output snapshot for a task.
    async fn get_output(&self, task_id: &TaskId) -> Result<Option<StoredOutput>, StoreError>;

    /// Number of tasks in each status. Every status is present.
    async fn task_counts(&self) -> Result<BTreeMap<TaskStatus, u64>, StoreError>;

    /// Number of agents in each status.
    async fn agent_counts(&self) -> Result<HashMap<AgentStatus, u64>, StoreError>;
}

/// In-memory store.
#[derive(Default)]
pub struct MemoryStore {
    tasks: RwLock<HashMap<TaskId, Task>>,
    agents: RwLock<HashMap<AgentId, Agent>>,
    activities: RwLock<Vec<Activity>>,
    outputs: RwLock<HashMap<TaskId, StoredOutput>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_task(&self, id: &TaskId) -> Result<Option<Task>, StoreError> {
        Ok(self.tasks.read().await.get(id).cloned())
    }

    async fn find_task_by_run(&self, run_id: &RunId) -> Result<Option<Task>, StoreError> {
        let tasks = self.tasks.read().await;
        Ok(tasks.values().find(|t| t.is_bound_to(run_id)).cloned())
    }

    async fn find_task_by_session(&self, session_key: &str) -> Result<Option<Task>, StoreError> {
        let tasks = self.tasks.read().await;
        Ok(tasks
            .values()
            .find(|t| t.session_key.as_deref() == Some(session_key))
            .cloned())
    }

    async fn insert_task(&self, task: Task) -> Result<(), StoreError> {
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&task.id) {
            return Err(StoreError::DuplicateTask(task.id));
        }
        tasks.insert(task.id.clone(), task);
        Ok(())
    }

    async fn update_task(&self, task: &Task) -> Result<(), StoreError> {
        let mut tasks = self.tasks.write().await;
        let slot = tasks
            .get_mut(&task.id)
            .ok_or_else(|| StoreError::TaskNotFound(task.id.clone()))?;
        *slot = task.clone();
        Ok(())
    }

    async fn bind_run_if_unbound(
        &self,
        task_id: &TaskId,
        run_id: &RunId,
    ) -> Result<Option<Task>, StoreError> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(task_id)
            .ok_or_else(|| StoreError::TaskNotFound(task_id.clone()))?;
        if task.active_run_id.is_some() {
            return Ok(None);
        }
        task.active_run_id = Some(run_id.clone());
        task.updated_at = Utc::now();
        Ok(Some(task.clone()))
    }

    async fn get_agent(&self, id: &AgentId) -> Result<Option<Agent>, StoreError> {
        Ok(self.agents.read().await.get(id).cloned())
    }

    async fn upsert_agent(&self, agent: &Agent) -> Result<(), StoreError> {
        self.agents
            .write()
            .await
            .insert(agent.id.clone(), agent.clone());
        Ok(())
    }

    async fn insert_activity(&self, activity: &Activity) -> Result<(), StoreError> {
        self.activities.write().await.push(activity.clone());
        Ok(())
    }

    async fn list_activities(&self, task_id: &TaskId) -> Result<Vec<Activity>, StoreError> {
        let activities = self.activities.read().await;
        Ok(activities
            .iter()
            .filter(|a| &a.task_id == task_id)
            .cloned()
            .collect())
    }

    async fn upsert_output(
        &self,
        task_id: &TaskId,
        run_id: &RunId,
        text: &str,
    ) -> Result<(), StoreError> {
        self.outputs.write().await.insert(
            task_id.clone(),
            StoredOutput {
                run_id: run_id.clone(),
                text: text.to_string(),
            },
        );
        Ok(())
    }

    async fn get_output(&self, task_id: &TaskId) -> Result<Option<StoredOutput>, StoreError> {
        Ok(self.outputs.read().await.get(task_id).cloned())
    }

    async fn task_counts(&self) -> Result<BTreeMap<TaskStatus, u64>, StoreError> {
        let mut counts: BTreeMap<TaskStatus, u64> =
            TaskStatus::ALL.iter().map(|s| (*s, 0)).collect();
        for task in self.tasks.read().await.values() {
            *counts.entry(task.status).or_default() += 1;
        }
        Ok(counts)
    }

    async fn agent_counts(&self) -> Result<HashMap<AgentStatus, u64>, StoreError> {
        let mut counts = HashMap::new();
        for agent in self.agents.read().await.values() {
            *counts.entry(agent.status).or_default() += 1;
        }
        Ok(counts)
    }
}
