//! Task-state reconciliation.
//!
//! Applies one [`NormalizedEvent`] at a time to the task and agent rows it
//! belongs to, and returns the observer messages the change produced.
//! Orphans and duplicates are outcomes, not errors; only store failures
//! surface as [`ReconcileError`].

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use taskdeck_core::{
    Activity, ActivityKind, Agent, DeltaSource, EventKind, NormalizedEvent, RunId, RunPhase, Task,
};

use crate::accumulator::{AppendOutcome, OutputAccumulator};
use crate::hub::{BroadcastMessage, Envelope};
use crate::runs::RunTable;
use crate::store::{Store, StoreError};
use crate::transitions::{self, Skip};

/// Reconciliation errors.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// What happened to an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// State changed or an audit record was written.
    Applied,
    /// The event kind carries nothing to reconcile.
    Ignored,
    /// No task owns the run.
    Orphan,
    /// Already reflected in the task; absorbed.
    Duplicate,
    /// The task has moved on to another run.
    Stale,
}

/// Result of reconciling one event.
#[derive(Debug)]
pub struct Reconciled {
    pub outcome: Outcome,
    pub envelopes: Vec<Envelope>,
}

impl Reconciled {
    fn applied(envelopes: Vec<Envelope>) -> Self {
        Self {
            outcome: Outcome::Applied,
            envelopes,
        }
    }

    fn nothing(outcome: Outcome) -> Self {
        Self {
            outcome,
            envelopes: Vec::new(),
        }
    }
}

/// Applies run events to task and agent state.
pub struct Reconciler {
    store: Arc<dyn Store>,
    accumulator: Arc<OutputAccumulator>,
    runs: Arc<RunTable>,
    persist_interval: Duration,
}

impl Reconciler {
    /// Create a reconciler over a store and a shared accumulator.
    pub fn new(
        store: Arc<dyn Store>,
        accumulator: Arc<OutputAccumulator>,
        persist_interval: Duration,
    ) -> Self {
        Self {
            store,
            accumulator,
            runs: Arc::new(RunTable::new()),
            persist_interval,
        }
    }

    /// Runs currently tracked. Shared with the dispatcher.
    pub fn runs(&self) -> &Arc<RunTable> {
        &self.runs
    }

    /// Reconcile one event. Must be awaited before the next event is applied.
    pub async fn apply(&self, event: &NormalizedEvent) -> Result<Reconciled, ReconcileError> {
        let run_id = &event.run_id;

        // Final text is captured through the accumulated deltas at lifecycle end.
        if let EventKind::AssistantFinal { .. } = event.kind {
            debug!(run_id = %run_id, "Ignoring assistant final");
            return Ok(Reconciled::nothing(Outcome::Ignored));
        }

        // Terminal events release the run's buffer once they have been
        // handled, whatever the task says. A failed write keeps it for
        // redelivery.
        let terminal = matches!(
            event.kind,
            EventKind::LifecycleEnd { .. } | EventKind::LifecycleError { .. }
        );
        let buffered = if terminal {
            self.accumulator.peek(run_id).await
        } else {
            String::new()
        };

        let result = self.reconcile(event, buffered).await;
        if terminal && result.is_ok() {
            self.accumulator.flush_and_clear(run_id).await;
        }
        result
    }

    async fn reconcile(
        &self,
        event: &NormalizedEvent,
        buffered: String,
    ) -> Result<Reconciled, ReconcileError> {
        let run_id = &event.run_id;
        let Some(task) = self.resolve(event).await? else {
            warn!(run_id = %run_id, event = event.name(), "Orphan event, no task owns run");
            return Ok(Reconciled::nothing(Outcome::Orphan));
        };

        match &event.kind {
            EventKind::LifecycleStart => self.on_start(task, event).await,
            EventKind::LifecycleEnd { tokens } => {
                self.on_end(task, event, buffered, tokens.unwrap_or(0)).await
            }
            EventKind::LifecycleError { error } => {
                self.on_error(task, event, buffered, error).await
            }
            EventKind::ToolCall { name, phase, args } => {
                self.on_tool_call(task, event, name, phase.as_deref(), args.as_ref())
                    .await
            }
            EventKind::AssistantDelta { text, source } => {
                self.on_delta(task, event, *source, text).await
            }
            EventKind::AssistantFinal { .. } => Ok(Reconciled::nothing(Outcome::Ignored)),
        }
    }

    /// Current task counts as a `stats_update` envelope.
    pub async fn stats(&self) -> Result<Envelope, StoreError> {
        let counts = self.store.task_counts().await?;
        Ok(Envelope::all(BroadcastMessage::stats_update(&counts)))
    }

    /// Find the task that owns the event's run: run table, then the task's
    /// bound run, then the dispatch session.
    async fn resolve(&self, event: &NormalizedEvent) -> Result<Option<Task>, StoreError> {
        if let Some(record) = self.runs.get(&event.run_id).await {
            if let Some(task) = self.store.get_task(&record.task_id).await? {
                return Ok(Some(task));
            }
        }
        if let Some(task) = self.store.find_task_by_run(&event.run_id).await? {
            return Ok(Some(task));
        }
        match &event.session_key {
            Some(session_key) => self.store.find_task_by_session(session_key).await,
            None => Ok(None),
        }
    }

    async fn on_start(
        &self,
        task: Task,
        event: &NormalizedEvent,
    ) -> Result<Reconciled, ReconcileError> {
        let at = event.occurred_at();
        let next = match transitions::start(&task, &event.run_id, at) {
            Ok(next) => next,
            Err(skip) => return Ok(skipped(skip, &task, event)),
        };

        self.store.update_task(&next).await?;
        self.runs
            .start(&event.run_id, event.session_key.clone(), &next.id)
            .await;
        info!(task_id = %next.id, run_id = %event.run_id, "Run started, task in progress");

        let mut envelopes = vec![Envelope::task(
            next.id.clone(),
            BroadcastMessage::task_update(&next),
        )];
        if let Some(agent) = self
            .update_agent(&next, |a| transitions::agent_started(a, &next, at))
            .await?
        {
            envelopes.push(Envelope::all(BroadcastMessage::agent_update(&agent)));
        }
        let activity = Activity::new(
            next.id.clone(),
            next.assigned_agent_id.clone(),
            event.run_id.clone(),
            ActivityKind::RunStarted,
            "Run started",
        )
        .at(at);
        envelopes.push(self.record(activity).await?);
        envelopes.push(self.stats().await?);

        Ok(Reconciled::applied(envelopes))
    }

    async fn on_end(
        &self,
        task: Task,
        event: &NormalizedEvent,
        output: String,
        tokens: u64,
    ) -> Result<Reconciled, ReconcileError> {
        let at = event.occurred_at();
        let next = match transitions::end(&task, &event.run_id, output, tokens, at) {
            Ok(next) => next,
            Err(skip) => return Ok(skipped(skip, &task, event)),
        };

        self.store.update_task(&next).await?;
        let output = next.output.as_deref().unwrap_or_default();
        self.store
            .upsert_output(&next.id, &event.run_id, output)
            .await?;
        self.runs.finish(&event.run_id, RunPhase::Ended, tokens).await;
        info!(
            task_id = %next.id,
            run_id = %event.run_id,
            tokens,
            output_len = output.len(),
            "Run completed, task done"
        );

        let mut envelopes = vec![Envelope::task(
            next.id.clone(),
            BroadcastMessage::task_update(&next),
        )];
        if let Some(agent) = self
            .update_agent(&next, |a| transitions::agent_completed(a, tokens, at))
            .await?
        {
            envelopes.push(Envelope::all(BroadcastMessage::agent_update(&agent)));
        }
        let activity = Activity::new(
            next.id.clone(),
            next.assigned_agent_id.clone(),
            event.run_id.clone(),
            ActivityKind::RunCompleted,
            "Run completed",
        )
        .with_metadata("tokens", tokens.to_string())
        .at(at);
        envelopes.push(self.record(activity).await?);
        envelopes.push(self.stats().await?);

        Ok(Reconciled::applied(envelopes))
    }

    async fn on_error(
        &self,
        task: Task,
        event: &NormalizedEvent,
        partial: String,
        error: &str,
    ) -> Result<Reconciled, ReconcileError> {
        let at = event.occurred_at();
        let next = match transitions::fail(&task, &event.run_id, error, at) {
            Ok(next) => next,
            Err(skip) => return Ok(skipped(skip, &task, event)),
        };

        self.store.update_task(&next).await?;
        self.store
            .upsert_output(&next.id, &event.run_id, &partial)
            .await?;
        self.runs.finish(&event.run_id, RunPhase::Errored, 0).await;
        warn!(task_id = %next.id, run_id = %event.run_id, error, "Run failed, task blocked");

        let mut envelopes = vec![Envelope::task(
            next.id.clone(),
            BroadcastMessage::task_update(&next),
        )];
        if let Some(agent) = self
            .update_agent(&next, |a| transitions::agent_failed(a, at))
            .await?
        {
            envelopes.push(Envelope::all(BroadcastMessage::agent_update(&agent)));
        }
        let activity = Activity::new(
            next.id.clone(),
            next.assigned_agent_id.clone(),
            event.run_id.clone(),
            ActivityKind::RunFailed,
            format!("Run failed: {}", error),
        )
        .with_metadata("error", error)
        .at(at);
        envelopes.push(self.record(activity).await?);
        envelopes.push(Envelope::all(BroadcastMessage::block_request(&next, error)));
        envelopes.push(self.stats().await?);

        Ok(Reconciled::applied(envelopes))
    }

    async fn on_tool_call(
        &self,
        task: Task,
        event: &NormalizedEvent,
        name: &str,
        phase: Option<&str>,
        args: Option<&Value>,
    ) -> Result<Reconciled, ReconcileError> {
        if let Err(skip) = transitions::mid_run(&task, &event.run_id) {
            return Ok(skipped(skip, &task, event));
        }
        let task = self.bind(task, &event.run_id).await?;

        let mut activity = Activity::new(
            task.id.clone(),
            task.assigned_agent_id.clone(),
            event.run_id.clone(),
            ActivityKind::ToolCalled,
            format!("Called tool {}", name),
        )
        .with_metadata("tool", name)
        .at(event.occurred_at());
        if let Some(phase) = phase {
            activity = activity.with_metadata("phase", phase);
        }
        if let Some(args) = args {
            activity = activity.with_metadata("args", args.to_string());
        }
        debug!(task_id = %task.id, run_id = %event.run_id, tool = name, "Tool call recorded");

        Ok(Reconciled::applied(vec![self.record(activity).await?]))
    }

    async fn on_delta(
        &self,
        task: Task,
        event: &NormalizedEvent,
        source: DeltaSource,
        text: &str,
    ) -> Result<Reconciled, ReconcileError> {
        if let Err(skip) = transitions::mid_run(&task, &event.run_id) {
            return Ok(skipped(skip, &task, event));
        }
        let task = self.bind(task, &event.run_id).await?;

        let length = match self
            .accumulator
            .append_delta(&event.run_id, source, event.seq, text)
            .await
        {
            AppendOutcome::Appended { length } => length,
            AppendOutcome::Fenced { .. } | AppendOutcome::Replay { .. } => {
                return Ok(Reconciled::nothing(Outcome::Duplicate));
            }
        };
        debug!(task_id = %task.id, run_id = %event.run_id, seq = event.seq, length, "Output delta");

        if let Some(snapshot) = self
            .accumulator
            .snapshot_if_due(&event.run_id, self.persist_interval)
            .await
        {
            self.store
                .upsert_output(&task.id, &event.run_id, &snapshot)
                .await?;
        }

        Ok(Reconciled::applied(vec![Envelope::task(
            task.id.clone(),
            BroadcastMessage::output_delta(&task.id, &event.run_id, text, length),
        )]))
    }

    /// Bind the run to a task that was found through its dispatch session.
    async fn bind(&self, task: Task, run_id: &RunId) -> Result<Task, StoreError> {
        if task.active_run_id.is_some() {
            return Ok(task);
        }
        let mut bound = task;
        bound.active_run_id = Some(run_id.clone());
        bound.updated_at = Utc::now();
        self.store.update_task(&bound).await?;
        info!(task_id = %bound.id, run_id = %run_id, "Bound run to task by session");
        Ok(bound)
    }

    async fn update_agent(
        &self,
        task: &Task,
        apply: impl FnOnce(&Agent) -> Agent,
    ) -> Result<Option<Agent>, StoreError> {
        let Some(agent_id) = &task.assigned_agent_id else {
            return Ok(None);
        };
        let Some(agent) = self.store.get_agent(agent_id).await? else {
            warn!(task_id = %task.id, agent_id = %agent_id, "Assigned agent not found");
            return Ok(None);
        };
        let next = apply(&agent);
        self.store.upsert_agent(&next).await?;
        Ok(Some(next))
    }

    async fn record(&self, activity: Activity) -> Result<Envelope, StoreError> {
        self.store.insert_activity(&activity).await?;
        Ok(Envelope::task(
            activity.task_id.clone(),
            BroadcastMessage::activity(&activity),
        ))
    }
}

fn skipped(skip: Skip, task: &Task, event: &NormalizedEvent) -> Reconciled {
    match skip {
        Skip::Duplicate => {
            debug!(
                task_id = %task.id,
                run_id = %event.run_id,
                event = event.name(),
                status = %task.status,
                "Event already applied"
            );
            Reconciled::nothing(Outcome::Duplicate)
        }
        Skip::Stale => {
            debug!(
                task_id = %task.id,
                run_id = %event.run_id,
                event = event.name(),
                "Event from a run the task is no longer bound to"
            );
            Reconciled::nothing(Outcome::Stale)
        }
    }
}
