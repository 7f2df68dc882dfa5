//! Pure task and agent transitions for run lifecycle events.
//!
//! Each function takes the current projection and returns the next one, or
//! the reason the event must not change anything. Nothing here touches the
//! store; the reconciler persists whatever comes back.

use chrono::{DateTime, Utc};

use taskdeck_core::{Agent, AgentStatus, RunId, Task, TaskOutcome, TaskStatus};

/// Why a lifecycle event leaves the task unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Skip {
    /// The task already reflects this event.
    Duplicate,
    /// The event belongs to a run the task is no longer bound to.
    Stale,
}

/// True if the task is bound to a run other than `run_id`.
fn bound_elsewhere(task: &Task, run_id: &RunId) -> bool {
    task.active_run_id.as_ref().is_some_and(|r| r != run_id)
}

/// Lifecycle start: the task moves to `in_progress` on this run.
pub fn start(task: &Task, run_id: &RunId, at: DateTime<Utc>) -> Result<Task, Skip> {
    if task.is_terminal() {
        return Err(Skip::Duplicate);
    }
    if task.is_bound_to(run_id) && matches!(task.status, TaskStatus::InProgress | TaskStatus::Blocked) {
        return Err(Skip::Duplicate);
    }
    if task.status == TaskStatus::InProgress && bound_elsewhere(task, run_id) {
        return Err(Skip::Stale);
    }

    let mut next = task.clone();
    next.status = TaskStatus::InProgress;
    next.active_run_id = Some(run_id.clone());
    next.outcome = None;
    next.started_at = Some(at);
    next.completed_at = None;
    next.updated_at = at;
    Ok(next)
}

/// Lifecycle end: the task is `done` with the run's output.
pub fn end(
    task: &Task,
    run_id: &RunId,
    output: String,
    tokens: u64,
    at: DateTime<Utc>,
) -> Result<Task, Skip> {
    if task.is_terminal() || (task.status == TaskStatus::Blocked && task.is_bound_to(run_id)) {
        return Err(Skip::Duplicate);
    }
    if bound_elsewhere(task, run_id) {
        return Err(Skip::Stale);
    }

    let mut next = task.clone();
    next.status = TaskStatus::Done;
    next.outcome = Some(TaskOutcome::Success);
    next.active_run_id = Some(run_id.clone());
    next.output = Some(output);
    next.tokens_used = tokens;
    next.started_at.get_or_insert(at);
    next.completed_at = Some(at);
    next.updated_at = at;
    Ok(next)
}

/// Lifecycle error: the task is `blocked` carrying the upstream error.
pub fn fail(task: &Task, run_id: &RunId, error: &str, at: DateTime<Utc>) -> Result<Task, Skip> {
    if task.is_terminal() || (task.status == TaskStatus::Blocked && task.is_bound_to(run_id)) {
        return Err(Skip::Duplicate);
    }
    if bound_elsewhere(task, run_id) {
        return Err(Skip::Stale);
    }

    let mut next = task.clone();
    next.status = TaskStatus::Blocked;
    next.outcome = Some(TaskOutcome::Failed);
    next.active_run_id = Some(run_id.clone());
    next.output = Some(error.to_string());
    next.updated_at = at;
    Ok(next)
}

/// Whether a mid-run event (tool call, output) for `run_id` may touch the task.
pub fn mid_run(task: &Task, run_id: &RunId) -> Result<(), Skip> {
    if task.is_terminal() || (task.status == TaskStatus::Blocked && task.is_bound_to(run_id)) {
        return Err(Skip::Duplicate);
    }
    if bound_elsewhere(task, run_id) {
        return Err(Skip::Stale);
    }
    Ok(())
}

/// Agent picked up a run for `task`.
pub fn agent_started(agent: &Agent, task: &Task, at: DateTime<Utc>) -> Agent {
    let mut next = agent.clone();
    next.status = AgentStatus::Working;
    next.current_task_id = Some(task.id.clone());
    next.updated_at = at;
    next
}

/// Agent finished a run successfully.
pub fn agent_completed(agent: &Agent, tokens: u64, at: DateTime<Utc>) -> Agent {
    let mut next = agent.clone();
    next.status = AgentStatus::Idle;
    next.current_task_id = None;
    next.completed_tasks += 1;
    next.total_tokens += tokens;
    next.updated_at = at;
    next
}

/// Agent's run failed.
pub fn agent_failed(agent: &Agent, at: DateTime<Utc>) -> Agent {
    let mut next = agent.clone();
    next.status = AgentStatus::Idle;
    next.current_task_id = None;
    next.updated_at = at;
    next
}
