//! Observer hub: live dashboard connections and their task subscriptions.
//!
//! Every registered observer sees every message. An observer that has
//! subscribed to one or more tasks is narrowed: it still receives hub-wide
//! messages, but task-scoped messages only for the tasks it asked for.
//! Delivery is a `try_send` into a bounded per-observer queue, so a slow
//! observer loses messages instead of stalling the event pipeline.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use taskdeck_core::{Activity, Agent, RunId, Task, TaskId, TaskStatus};

/// Identifier of one observer connection.
pub type ObserverId = u64;

/// Hub settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubConfig {
    /// Per-observer queue capacity.
    pub buffer: usize,
    /// Interval between liveness pings.
    pub heartbeat_interval: Duration,
    /// Unanswered pings before an observer is evicted.
    pub max_missed_pongs: u32,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            buffer: 256,
            heartbeat_interval: Duration::from_secs(30),
            max_missed_pongs: 2,
        }
    }
}

/// Message types pushed to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    TaskUpdate,
    AgentUpdate,
    Activity,
    OutputDelta,
    BlockRequest,
    StatsUpdate,
}

/// A `{type, data, timestamp}` frame for observers.
#[derive(Debug, Clone, Serialize)]
pub struct BroadcastMessage {
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

impl BroadcastMessage {
    fn new(kind: MessageType, data: Value) -> Self {
        Self {
            kind,
            data,
            timestamp: Utc::now(),
        }
    }

    pub fn task_update(task: &Task) -> Self {
        Self::new(MessageType::TaskUpdate, json!(task))
    }

    pub fn agent_update(agent: &Agent) -> Self {
        Self::new(MessageType::AgentUpdate, json!(agent))
    }

    pub fn activity(activity: &Activity) -> Self {
        Self::new(MessageType::Activity, json!(activity))
    }

    pub fn output_delta(task_id: &TaskId, run_id: &RunId, delta: &str, length: usize) -> Self {
        Self::new(
            MessageType::OutputDelta,
            json!({
                "taskId": task_id,
                "runId": run_id,
                "delta": delta,
                "length": length,
            }),
        )
    }

    /// A task needs a human: its run failed and it is now blocked.
    pub fn block_request(task: &Task, reason: &str) -> Self {
        Self::new(
            MessageType::BlockRequest,
            json!({
                "taskId": task.id,
                "agentId": task.assigned_agent_id,
                "reason": reason,
            }),
        )
    }

    pub fn stats_update(counts: &BTreeMap<TaskStatus, u64>) -> Self {
        let by_status: serde_json::Map<String, Value> = counts
            .iter()
            .map(|(status, n)| (status.as_str().to_string(), json!(n)))
            .collect();
        let total: u64 = counts.values().sum();
        Self::new(
            MessageType::StatsUpdate,
            json!({ "total": total, "byStatus": by_status }),
        )
    }
}

/// Who a message is for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Audience {
    /// Every observer.
    All,
    /// Unfiltered observers plus those subscribed to the task.
    Task(TaskId),
}

/// A message with its audience.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub audience: Audience,
    pub message: BroadcastMessage,
}

impl Envelope {
    pub fn all(message: BroadcastMessage) -> Self {
        Self {
            audience: Audience::All,
            message,
        }
    }

    pub fn task(task_id: TaskId, message: BroadcastMessage) -> Self {
        Self {
            audience: Audience::Task(task_id),
            message,
        }
    }
}

/// What the connection writer receives from the hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubFrame {
    /// Serialized message text.
    Text(Arc<str>),
    /// Send a liveness ping.
    Ping,
}

struct Observer {
    tx: mpsc::Sender<HubFrame>,
    subscriptions: HashSet<TaskId>,
    missed_pongs: u32,
}

impl Observer {
    fn wants(&self, task_id: Option<&TaskId>) -> bool {
        match task_id {
            None => true,
            Some(id) => self.subscriptions.is_empty() || self.subscriptions.contains(id),
        }
    }
}

/// Registry of observers and their subscriptions.
pub struct BroadcastHub {
    config: HubConfig,
    observers: RwLock<HashMap<ObserverId, Observer>>,
    next_id: AtomicU64,
    dropped: AtomicU64,
}

impl BroadcastHub {
    /// Create an empty hub.
    pub fn new(config: HubConfig) -> Self {
        Self {
            config,
            observers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            dropped: AtomicU64::new(0),
        }
    }

    /// Hub settings.
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Register an observer. Returns its id and the queue to drain.
    pub async fn register(&self) -> (ObserverId, mpsc::Receiver<HubFrame>) {
        let (tx, rx) = mpsc::channel(self.config.buffer.max(1));
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.observers.write().await.insert(
            id,
            Observer {
                tx,
                subscriptions: HashSet::new(),
                missed_pongs: 0,
            },
        );
        info!(observer_id = id, "Observer registered");
        (id, rx)
    }

    /// Remove an observer and all of its subscriptions.
    pub async fn unregister(&self, id: ObserverId) -> bool {
        let removed = self.observers.write().await.remove(&id).is_some();
        if removed {
            info!(observer_id = id, "Observer unregistered");
        }
        removed
    }

    /// Narrow an observer to a task. Returns false for unknown observers.
    pub async fn subscribe(&self, id: ObserverId, task_id: TaskId) -> bool {
        let mut observers = self.observers.write().await;
        let Some(observer) = observers.get_mut(&id) else {
            return false;
        };
        debug!(observer_id = id, task_id = %task_id, "Observer subscribed to task");
        observer.subscriptions.insert(task_id);
        true
    }

    /// Drop a task subscription. Returns false if it did not exist.
    pub async fn unsubscribe(&self, id: ObserverId, task_id: &TaskId) -> bool {
        let mut observers = self.observers.write().await;
        let removed = observers
            .get_mut(&id)
            .is_some_and(|o| o.subscriptions.remove(task_id));
        if removed {
            debug!(observer_id = id, task_id = %task_id, "Observer unsubscribed from task");
        }
        removed
    }

    /// Send to every observer. Returns the number of observers it was queued for.
    pub async fn broadcast_all(&self, message: &BroadcastMessage) -> usize {
        self.fan_out(None, message).await
    }

    /// Send a task-scoped message. Returns the number of observers it was queued for.
    pub async fn broadcast_to_task(&self, task_id: &TaskId, message: &BroadcastMessage) -> usize {
        self.fan_out(Some(task_id), message).await
    }

    /// Deliver an envelope to its audience.
    pub async fn deliver(&self, envelope: &Envelope) -> usize {
        match &envelope.audience {
            Audience::All => self.broadcast_all(&envelope.message).await,
            Audience::Task(task_id) => self.broadcast_to_task(task_id, &envelope.message).await,
        }
    }

    async fn fan_out(&self, task_id: Option<&TaskId>, message: &BroadcastMessage) -> usize {
        let text: Arc<str> = match serde_json::to_string(message) {
            Ok(text) => text.into(),
            Err(e) => {
                warn!(error = %e, "Failed to serialize broadcast message");
                return 0;
            }
        };

        let observers = self.observers.read().await;
        let mut delivered = 0;
        for (id, observer) in observers.iter() {
            if !observer.wants(task_id) {
                continue;
            }
            match observer.tx.try_send(HubFrame::Text(text.clone())) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    debug!(observer_id = id, "Observer queue full, message dropped");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(observer_id = id, "Observer queue closed");
                }
            }
        }
        delivered
    }

    /// Queue a frame for one observer. Returns false if it could not be queued.
    pub async fn send_to(&self, id: ObserverId, frame: HubFrame) -> bool {
        let observers = self.observers.read().await;
        let Some(observer) = observers.get(&id) else {
            return false;
        };
        match observer.tx.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Mark an observer alive.
    pub async fn record_pong(&self, id: ObserverId) {
        if let Some(observer) = self.observers.write().await.get_mut(&id) {
            observer.missed_pongs = 0;
        }
    }

    /// One liveness round: evict observers that ignored too many pings and
    /// ping the rest. Returns the evicted ids.
    pub async fn sweep(&self) -> Vec<ObserverId> {
        let mut observers = self.observers.write().await;
        let max_missed = self.config.max_missed_pongs;

        let mut evicted = Vec::new();
        observers.retain(|id, observer| {
            if observer.missed_pongs >= max_missed || observer.tx.is_closed() {
                evicted.push(*id);
                return false;
            }
            // A ping that never reached the queue cannot be missed.
            match observer.tx.try_send(HubFrame::Ping) {
                Ok(()) => observer.missed_pongs += 1,
                Err(_) => debug!(observer_id = id, "Observer queue full, ping skipped"),
            }
            true
        });

        for id in &evicted {
            warn!(observer_id = id, max_missed, "Evicting unresponsive observer");
        }
        evicted
    }

    /// Run [`sweep`](Self::sweep) on the heartbeat interval until cancelled.
    pub fn spawn_liveness(self: Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.config.heartbeat_interval);
            // The first tick completes immediately; skip it.
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        self.sweep().await;
                    }
                }
            }
        })
    }

    /// Number of registered observers.
    pub async fn observer_count(&self) -> usize {
        self.observers.read().await.len()
    }

    /// Total task subscriptions across observers.
    pub async fn subscription_count(&self) -> usize {
        self.observers
            .read()
            .await
            .values()
            .map(|o| o.subscriptions.len())
            .sum()
    }

    /// Messages dropped because an observer queue was full.
    pub fn dropped_messages(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hub() -> BroadcastHub {
        BroadcastHub::new(HubConfig {
            buffer: 8,
            heartbeat_interval: Duration::from_secs(30),
            max_missed_pongs: 2,
        })
    }

    fn message() -> BroadcastMessage {
        BroadcastMessage::output_delta(&TaskId::new("t"), &RunId::new("r"), "x", 1)
    }

    fn drain(rx: &mut mpsc::Receiver<HubFrame>) -> Vec<HubFrame> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        frames
    }

    #[tokio::test]
    async fn test_task_scoped_delivery() {
        let hub = hub();
        let (global, mut global_rx) = hub.register().await;
        let (t1_only, mut t1_rx) = hub.register().await;
        hub.subscribe(t1_only, TaskId::new("T1")).await;

        hub.broadcast_to_task(&TaskId::new("T2"), &message()).await;
        assert!(drain(&mut t1_rx).is_empty());
        assert_eq!(drain(&mut global_rx).len(), 1);

        hub.broadcast_to_task(&TaskId::new("T1"), &message()).await;
        assert_eq!(drain(&mut t1_rx).len(), 1);
        assert_eq!(drain(&mut global_rx).len(), 1);

        assert!(hub.unregister(global).await);
    }

    #[tokio::test]
    async fn test_broadcast_all_delivers_exactly_once() {
        let hub = hub();
        let (id, mut rx) = hub.register().await;
        hub.subscribe(id, TaskId::new("T1")).await;
        hub.subscribe(id, TaskId::new("T2")).await;

        let queued = hub.broadcast_all(&message()).await;
        assert_eq!(queued, 1);
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[tokio::test]
    async fn test_frames_are_type_data_timestamp() {
        let hub = hub();
        let (_, mut rx) = hub.register().await;
        hub.broadcast_all(&message()).await;

        let Some(HubFrame::Text(text)) = rx.recv().await else {
            panic!("expected a text frame");
        };
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "output_delta");
        assert_eq!(value["data"]["taskId"], "t");
        assert_eq!(value["data"]["length"], 1);
        assert!(value["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_unsubscribe_widens_back_to_everything() {
        let hub = hub();
        let (id, mut rx) = hub.register().await;
        hub.subscribe(id, TaskId::new("T1")).await;
        assert!(hub.unsubscribe(id, &TaskId::new("T1")).await);
        assert!(!hub.unsubscribe(id, &TaskId::new("T1")).await);

        hub.broadcast_to_task(&TaskId::new("T9"), &message()).await;
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[tokio::test]
    async fn test_full_queue_drops_and_counts() {
        let hub = BroadcastHub::new(HubConfig {
            buffer: 2,
            ..HubConfig::default()
        });
        let (_, mut rx) = hub.register().await;

        for _ in 0..5 {
            hub.broadcast_all(&message()).await;
        }
        assert_eq!(hub.dropped_messages(), 3);
        assert_eq!(drain(&mut rx).len(), 2);
    }

    #[tokio::test]
    async fn test_two_missed_pongs_evicts_and_clears_subscriptions() {
        let hub = hub();
        let (silent, mut silent_rx) = hub.register().await;
        let (alive, mut alive_rx) = hub.register().await;
        hub.subscribe(silent, TaskId::new("T1")).await;
        hub.subscribe(alive, TaskId::new("T2")).await;

        // Two pings go unanswered by `silent`.
        assert!(hub.sweep().await.is_empty());
        hub.record_pong(alive).await;
        assert!(hub.sweep().await.is_empty());
        hub.record_pong(alive).await;

        let evicted = hub.sweep().await;
        assert_eq!(evicted, vec![silent]);
        assert_eq!(hub.observer_count().await, 1);
        assert_eq!(hub.subscription_count().await, 1);

        assert_eq!(drain(&mut silent_rx), vec![HubFrame::Ping, HubFrame::Ping]);
        // Dropping the sender ends the evicted observer's queue.
        assert!(silent_rx.recv().await.is_none());
        assert_eq!(drain(&mut alive_rx).len(), 3);
    }

    #[tokio::test]
    async fn test_slow_observer_is_not_charged_for_unqueued_pings() {
        let hub = BroadcastHub::new(HubConfig {
            buffer: 1,
            ..HubConfig::default()
        });
        let (slow, mut rx) = hub.register().await;
        hub.broadcast_all(&message()).await;

        // The queue is full, so none of these pings reach the observer.
        for _ in 0..3 {
            assert!(hub.sweep().await.is_empty());
        }
        assert_eq!(hub.observer_count().await, 1);

        // Once it catches up, pings count again.
        assert!(matches!(rx.recv().await, Some(HubFrame::Text(_))));
        assert!(hub.sweep().await.is_empty());
        assert_eq!(rx.recv().await, Some(HubFrame::Ping));
        assert!(hub.sweep().await.is_empty());
        assert_eq!(rx.recv().await, Some(HubFrame::Ping));
        assert_eq!(hub.sweep().await, vec![slow]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_liveness_task_sweeps_on_interval() {
        let hub = Arc::new(hub());
        let (_, mut rx) = hub.register().await;
        let token = CancellationToken::new();
        let handle = hub.clone().spawn_liveness(token.clone());

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(rx.recv().await, Some(HubFrame::Ping));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(hub.observer_count().await, 0);

        token.cancel();
        handle.await.unwrap();
    }

    #[test]
    fn test_stats_update_shape() {
        let counts: BTreeMap<TaskStatus, u64> =
            TaskStatus::ALL.iter().map(|s| (*s, 1)).collect();
        let message = BroadcastMessage::stats_update(&counts);
        assert_eq!(message.kind, MessageType::StatsUpdate);
        assert_eq!(message.data["total"], 7);
        assert_eq!(message.data["byStatus"]["in_progress"], 1);
    }
}
