//! In-process table of runs the reconciler has seen start.

use std::collections::HashMap;

use tokio::sync::RwLock;

use taskdeck_core::{RunId, RunPhase, TaskId};

/// One run being tracked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRecord {
    pub run_id: RunId,
    pub session_key: Option<String>,
    pub task_id: TaskId,
    pub phase: RunPhase,
    pub tokens: u64,
}

/// Runs keyed by id. Entries live from lifecycle start to end/error.
#[derive(Debug, Default)]
pub struct RunTable {
    runs: RwLock<HashMap<RunId, RunRecord>>,
}

impl RunTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a started run. An existing entry is left untouched.
    pub async fn start(&self, run_id: &RunId, session_key: Option<String>, task_id: &TaskId) {
        self.runs
            .write()
            .await
            .entry(run_id.clone())
            .or_insert_with(|| RunRecord {
                run_id: run_id.clone(),
                session_key,
                task_id: task_id.clone(),
                phase: RunPhase::Started,
                tokens: 0,
            });
    }

    pub async fn get(&self, run_id: &RunId) -> Option<RunRecord> {
        self.runs.read().await.get(run_id).cloned()
    }

    /// Retire a run, returning its final record.
    pub async fn finish(&self, run_id: &RunId, phase: RunPhase, tokens: u64) -> Option<RunRecord> {
        let mut record = self.runs.write().await.remove(run_id)?;
        record.phase = phase;
        record.tokens = tokens;
        Some(record)
    }

    /// Drop a run that will never report a terminal event.
    pub async fn forget(&self, run_id: &RunId) -> Option<RunRecord> {
        self.runs.write().await.remove(run_id)
    }

    pub async fn len(&self) -> usize {
        self.runs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.runs.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_start_then_finish_retires_run() {
        let table = RunTable::new();
        let run = RunId::new("r1");
        table
            .start(&run, Some("task:t1".to_string()), &TaskId::new("t1"))
            .await;
        // Replayed start keeps the first record.
        table.start(&run, None, &TaskId::new("other")).await;

        let record = table.get(&run).await.unwrap();
        assert_eq!(record.task_id, TaskId::new("t1"));
        assert_eq!(record.phase, RunPhase::Started);

        let finished = table.finish(&run, RunPhase::Ended, 42).await.unwrap();
        assert_eq!(finished.phase, RunPhase::Ended);
        assert_eq!(finished.tokens, 42);
        assert!(table.is_empty().await);
        assert!(table.finish(&run, RunPhase::Ended, 0).await.is_none());
    }

    #[tokio::test]
    async fn test_forget_drops_abandoned_run() {
        let table = RunTable::new();
        let run = RunId::new("r1");
        table.start(&run, None, &TaskId::new("t1")).await;

        let forgotten = table.forget(&run).await.unwrap();
        assert_eq!(forgotten.phase, RunPhase::Started);
        assert!(table.is_empty().await);
        assert!(table.forget(&run).await.is_none());
    }
}
