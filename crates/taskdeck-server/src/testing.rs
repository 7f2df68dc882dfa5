//! Shared fixtures for handler, dispatcher and reconciler tests.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use taskdeck_core::{Activity, Agent, AgentId, AgentStatus, RunId, Task, TaskId, TaskStatus};
use taskdeck_gateway::{AgentRunAccepted, AgentRunRequest, ConnectionState, GatewayError};

use crate::accumulator::OutputAccumulator;
use crate::dispatcher::{AgentRunner, Dispatcher};
use crate::hub::{BroadcastHub, HubConfig};
use crate::state::{AppState, GatewayStatus};
use crate::store::{MemoryStore, Store, StoreError, StoredOutput};

pub struct FixedGateway {
    pub state: ConnectionState,
    pub last_heartbeat: Option<DateTime<Utc>>,
}

impl FixedGateway {
    pub fn new(state: ConnectionState) -> Self {
        Self {
            state,
            last_heartbeat: None,
        }
    }
}

impl GatewayStatus for FixedGateway {
    fn state(&self) -> ConnectionState {
        self.state
    }

    fn last_heartbeat(&self) -> Option<DateTime<Utc>> {
        self.last_heartbeat
    }
}

/// Accepts every run as `run-1` while connected, refuses otherwise.
pub struct StubRunner(pub ConnectionState);

#[async_trait]
impl AgentRunner for StubRunner {
    async fn run_agent(&self, _request: &AgentRunRequest) -> Result<AgentRunAccepted, GatewayError> {
        if self.0 != ConnectionState::Connected {
            return Err(GatewayError::NotConnected);
        }
        Ok(AgentRunAccepted {
            run_id: RunId::new("run-1"),
            status: None,
        })
    }
}

pub async fn test_state(gateway: ConnectionState) -> (Arc<AppState>, Arc<MemoryStore>) {
    test_state_with(FixedGateway::new(gateway)).await
}

pub async fn test_state_with(gateway: FixedGateway) -> (Arc<AppState>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let hub = Arc::new(BroadcastHub::new(HubConfig {
        buffer: 16,
        heartbeat_interval: Duration::from_secs(30),
        max_missed_pongs: 2,
    }));
    let dispatcher = Arc::new(Dispatcher::new(
        store.clone(),
        Arc::new(StubRunner(gateway.state)),
        hub.clone(),
    ));
    let state = AppState::new(
        store.clone(),
        Arc::new(OutputAccumulator::new()),
        hub,
        dispatcher,
        Arc::new(gateway),
    );
    (state, store)
}

/// A [`MemoryStore`] with scripted interference: a task write that fails
/// once, or work that runs just before the next run binding.
pub struct ScriptedStore {
    inner: Arc<MemoryStore>,
    fail_next_update: AtomicBool,
    before_bind: Mutex<Option<BoxFuture<'static, ()>>>,
}

impl ScriptedStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            fail_next_update: AtomicBool::new(false),
            before_bind: Mutex::new(None),
        }
    }

    /// Make the next `update_task` fail with a backend error.
    pub fn fail_next_update(&self) {
        self.fail_next_update.store(true, Ordering::SeqCst);
    }

    /// Run `work` to completion right before the next `bind_run_if_unbound`.
    pub fn before_next_bind(&self, work: impl Future<Output = ()> + Send + 'static) {
        *self.before_bind.lock().unwrap() = Some(work.boxed());
    }
}

#[async_trait]
impl Store for ScriptedStore {
    async fn get_task(&self, id: &TaskId) -> Result<Option<Task>, StoreError> {
        self.inner.get_task(id).await
    }

    async fn find_task_by_run(&self, run_id: &RunId) -> Result<Option<Task>, StoreError> {
        self.inner.find_task_by_run(run_id).await
    }

    async fn find_task_by_session(&self, session_key: &str) -> Result<Option<Task>, StoreError> {
        self.inner.find_task_by_session(session_key).await
    }

    async fn insert_task(&self, task: Task) -> Result<(), StoreError> {
        self.inner.insert_task(task).await
    }

    async fn update_task(&self, task: &Task) -> Result<(), StoreError> {
        if self.fail_next_update.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Backend("transient".to_string()));
        }
        self.inner.update_task(task).await
    }

    async fn bind_run_if_unbound(
        &self,
        task_id: &TaskId,
        run_id: &RunId,
    ) -> Result<Option<Task>, StoreError> {
        let work = self.before_bind.lock().unwrap().take();
        if let Some(work) = work {
            work.await;
        }
        self.inner.bind_run_if_unbound(task_id, run_id).await
    }

    async fn get_agent(&self, id: &AgentId) -> Result<Option<Agent>, StoreError> {
        self.inner.get_agent(id).await
    }

    async fn upsert_agent(&self, agent: &Agent) -> Result<(), StoreError> {
        self.inner.upsert_agent(agent).await
    }

    async fn insert_activity(&self, activity: &Activity) -> Result<(), StoreError> {
        self.inner.insert_activity(activity).await
    }

    async fn list_activities(&self, task_id: &TaskId) -> Result<Vec<Activity>, StoreError> {
        self.inner.list_activities(task_id).await
    }

    async fn upsert_output(
        &self,
        task_id: &TaskId,
        run_id: &RunId,
        text: &str,
    ) -> Result<(), StoreError> {
        self.inner.upsert_output(task_id, run_id, text).await
    }

    async fn get_output(&self, task_id: &TaskId) -> Result<Option<StoredOutput>, StoreError> {
        self.inner.get_output(task_id).await
    }

    async fn task_counts(&self) -> Result<BTreeMap<TaskStatus, u64>, StoreError> {
        self.inner.task_counts().await
    }

    async fn agent_counts(&self) -> Result<HashMap<AgentStatus, u64>, StoreError> {
        self.inner.agent_counts().await
    }
}
