//! Startup fixtures for the in-memory store.
//!
//! A seed file is JSON of the form `{"tasks": [...], "agents": [...]}`.
//! Agents are upserted first so tasks may reference them.

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use taskdeck_core::{Agent, AgentId, Task, TaskId};

use crate::store::{Store, StoreError};

/// Seed loading errors.
#[derive(Debug, Error)]
pub enum SeedError {
    #[error("Failed to read seed file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid seed file: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Parsed seed file.
#[derive(Debug, Default, Deserialize)]
pub struct Seed {
    #[serde(default)]
    pub tasks: Vec<SeedTask>,
    #[serde(default)]
    pub agents: Vec<SeedAgent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedTask {
    pub id: TaskId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Assigning an agent puts the task straight into `assigned`.
    #[serde(default)]
    pub assigned_agent_id: Option<AgentId>,
}

#[derive(Debug, Deserialize)]
pub struct SeedAgent {
    pub id: AgentId,
    pub name: String,
}

/// Rows written by [`Seed::apply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedSummary {
    pub tasks: usize,
    pub agents: usize,
}

impl Seed {
    pub fn parse(json: &str) -> Result<Self, SeedError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Write every agent and task into the store. Stops at the first
    /// failure, e.g. a duplicate task id.
    pub async fn apply(self, store: &dyn Store) -> Result<SeedSummary, SeedError> {
        let summary = SeedSummary {
            tasks: self.tasks.len(),
            agents: self.agents.len(),
        };

        for agent in self.agents {
            store.upsert_agent(&Agent::new(agent.id, agent.name)).await?;
        }
        for seed in self.tasks {
            let mut task = Task::new(seed.title, seed.description).with_id(seed.id);
            if let Some(agent_id) = seed.assigned_agent_id {
                task = task.with_agent(agent_id);
            }
            store.insert_task(task).await?;
        }
        Ok(summary)
    }
}

/// Read a seed file and load it into the store.
pub async fn load_seed(path: &Path, store: &dyn Store) -> Result<SeedSummary, SeedError> {
    let json = tokio::fs::read_to_string(path).await?;
    Seed::parse(&json)?.apply(store).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use taskdeck_core::TaskStatus;

    const SEED: &str = r#"{
        "agents": [{"id": "a1", "name": "Writer"}],
        "tasks": [
            {"id": "t1", "title": "Draft", "description": "First pass", "assignedAgentId": "a1"},
            {"id": "t2", "title": "Later"}
        ]
    }"#;

    #[tokio::test]
    async fn test_seed_populates_store() {
        let store = MemoryStore::new();
        let summary = Seed::parse(SEED).unwrap().apply(&store).await.unwrap();
        assert_eq!(summary, SeedSummary { tasks: 2, agents: 1 });

        let agent = store.get_agent(&AgentId::new("a1")).await.unwrap().unwrap();
        assert_eq!(agent.name, "Writer");

        let assigned = store.get_task(&TaskId::new("t1")).await.unwrap().unwrap();
        assert_eq!(assigned.status, TaskStatus::Assigned);
        assert_eq!(assigned.assigned_agent_id, Some(AgentId::new("a1")));
        assert_eq!(assigned.description, "First pass");

        let inbox = store.get_task(&TaskId::new("t2")).await.unwrap().unwrap();
        assert_eq!(inbox.status, TaskStatus::Inbox);
        assert!(inbox.assigned_agent_id.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_task_fails() {
        let store = MemoryStore::new();
        let json = r#"{"tasks": [{"id": "t1", "title": "a"}, {"id": "t1", "title": "b"}]}"#;
        let result = Seed::parse(json).unwrap().apply(&store).await;
        assert!(matches!(
            result,
            Err(SeedError::Store(StoreError::DuplicateTask(_)))
        ));
    }

    #[test]
    fn test_malformed_seed_is_rejected() {
        assert!(matches!(Seed::parse("{\"tasks\": 3}"), Err(SeedError::Json(_))));
        let empty = Seed::parse("{}").unwrap();
        assert!(empty.tasks.is_empty() && empty.agents.is_empty());
    }

    #[tokio::test]
    async fn test_load_seed_from_file() {
        let path = std::env::temp_dir().join(format!("taskdeck-seed-{}.json", std::process::id()));
        tokio::fs::write(&path, SEED).await.unwrap();

        let store = MemoryStore::new();
        let summary = load_seed(&path, &store).await;
        tokio::fs::remove_file(&path).await.ok();

        assert_eq!(summary.unwrap(), SeedSummary { tasks: 2, agents: 1 });
        assert!(store.get_task(&TaskId::new("t1")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let store = MemoryStore::new();
        let result = load_seed(Path::new("/nonexistent/taskdeck-seed.json"), &store).await;
        assert!(matches!(result, Err(SeedError::Io(_))));
    }
}
