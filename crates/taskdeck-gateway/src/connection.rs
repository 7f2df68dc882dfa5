//! Connection management for the gateway.
//!
//! One [`ConnectionManager`] owns one duplex WebSocket to the gateway. A
//! background driver task runs the connect / read / reconnect cycle; the
//! manager handle is cheap to clone and is what RPC callers and the owning
//! process hold on to.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::backoff::{ReconnectDecision, ReconnectPolicy, ReconnectState};
use crate::error::GatewayError;
use crate::protocol::{decode_frame, preview, PendingRequests};
use crate::types::{AgentRunAccepted, AgentRunRequest, GatewayEvent, InboundFrame, RpcRequest};

/// Capacity of the connection event broadcast channel.
const CONNECTION_EVENT_BUFFER: usize = 64;

/// Capacity of the outbound frame queue.
const OUTBOUND_BUFFER: usize = 64;

/// Event classes requested in the subscription handshake.
const SUBSCRIBED_EVENTS: [&str; 4] = ["lifecycle", "tool", "chat", "heartbeat"];

/// Gateway client configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// WebSocket URL of the gateway.
    pub url: String,

    /// Reconnection backoff.
    pub reconnect: ReconnectPolicy,

    /// Default timeout for the typed RPC helpers.
    pub request_timeout: Duration,

    /// Capacity of the raw event queue handed to the pipeline.
    pub event_buffer: usize,
}

impl GatewayConfig {
    /// Create a config with defaults for everything but the URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:18789".to_string(),
            reconnect: ReconnectPolicy::default(),
            request_timeout: Duration::from_secs(30),
            event_buffer: 1024,
        }
    }
}

/// Connection state. There is exactly one authoritative copy, held in a
/// `watch` channel by the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected; a reconnection may be scheduled.
    Disconnected,
    /// Opening the socket.
    Connecting,
    /// Socket open and handshake sent.
    Connected,
    /// Driver stopped: ceiling reached or owner disconnected.
    Closed,
}

impl ConnectionState {
    /// Wire name of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Closed => "closed",
        }
    }
}

/// Notifications about the connection, for the owning process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Socket open and subscription handshake sent.
    Connected,
    /// Socket closed.
    Disconnected { reason: String },
    /// Connect or transport failure.
    Error { message: String },
    /// Reconnect ceiling reached; no further attempts will be made.
    Fatal { attempts: u32 },
}

struct Shared {
    config: GatewayConfig,
    state: watch::Sender<ConnectionState>,
    reconnect: Mutex<ReconnectState>,
    outbound: Mutex<Option<mpsc::Sender<Message>>>,
    pending: PendingRequests,
    events_tx: broadcast::Sender<ConnectionEvent>,
    raw_tx: mpsc::Sender<GatewayEvent>,
    shutdown: Mutex<CancellationToken>,
    driver: Mutex<Option<JoinHandle<()>>>,
    last_heartbeat_ms: AtomicI64,
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    fn emit(&self, event: ConnectionEvent) {
        // No subscribers is fine.
        self.events_tx.send(event).ok();
    }
}

/// Manages the connection to the gateway.
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl ConnectionManager {
    /// Create a manager and the receiver raw events will be delivered on.
    ///
    /// Events are delivered in arrival order. The reader waits for queue
    /// capacity rather than dropping, so a slow consumer back-pressures the
    /// socket.
    pub fn new(config: GatewayConfig) -> (Self, mpsc::Receiver<GatewayEvent>) {
        let (raw_tx, raw_rx) = mpsc::channel(config.event_buffer.max(1));
        let (events_tx, _) = broadcast::channel(CONNECTION_EVENT_BUFFER);
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let reconnect = ReconnectState::new(config.reconnect);

        let shared = Arc::new(Shared {
            config,
            state,
            reconnect: Mutex::new(reconnect),
            outbound: Mutex::new(None),
            pending: PendingRequests::new(),
            events_tx,
            raw_tx,
            shutdown: Mutex::new(CancellationToken::new()),
            driver: Mutex::new(None),
            last_heartbeat_ms: AtomicI64::new(0),
        });

        (Self { shared }, raw_rx)
    }

    /// Start connecting. No-op while a driver is already connecting,
    /// connected, or waiting to reconnect.
    pub async fn connect(&self) {
        let mut driver = self.shared.driver.lock().await;
        if driver.as_ref().is_some_and(|h| !h.is_finished()) {
            debug!("connect() ignored, connection already active");
            return;
        }

        self.shared.reconnect.lock().await.reset();
        let token = CancellationToken::new();
        *self.shared.shutdown.lock().await = token.clone();
        self.shared.set_state(ConnectionState::Connecting);

        let shared = self.shared.clone();
        *driver = Some(tokio::spawn(async move {
            drive(shared, token).await;
        }));
    }

    /// Close the connection and suppress any further reconnection.
    ///
    /// Waits for the driver to stop, so a following `connect()` starts clean.
    pub async fn disconnect(&self) {
        info!(url = %self.shared.config.url, "Disconnecting from gateway");
        self.shared.reconnect.lock().await.suppress();
        self.shared.shutdown.lock().await.cancel();

        let handle = self.shared.driver.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Gateway driver task ended abnormally");
            }
        }
        self.shared.set_state(ConnectionState::Closed);
    }

    /// Returns true while the socket is open.
    pub fn is_connected(&self) -> bool {
        *self.shared.state.borrow() == ConnectionState::Connected
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Watch connection state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Subscribe to connection events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.shared.events_tx.subscribe()
    }

    /// When the gateway last sent a heartbeat frame.
    pub fn last_heartbeat(&self) -> Option<DateTime<Utc>> {
        match self.shared.last_heartbeat_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => Utc.timestamp_millis_opt(ms).single(),
        }
    }

    /// Issue one RPC call and wait for its response.
    ///
    /// Never retried here: a timeout or non-OK response is returned to the
    /// caller as a [`GatewayError`].
    pub async fn request(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, GatewayError> {
        let sender = self
            .shared
            .outbound
            .lock()
            .await
            .clone()
            .ok_or(GatewayError::NotConnected)?;

        let request = RpcRequest::new(method, params);
        let text = serde_json::to_string(&request)?;
        let rx = self.shared.pending.register(request.id.clone()).await;

        debug!(id = %request.id, method, "Sending gateway request");
        if sender.send(Message::Text(text)).await.is_err() {
            self.shared.pending.remove(&request.id).await;
            return Err(GatewayError::NotConnected);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => response.into_result(),
            Ok(Err(_)) => Err(GatewayError::ConnectionClosed),
            Err(_) => {
                self.shared.pending.remove(&request.id).await;
                warn!(id = %request.id, method, timeout_ms = timeout.as_millis() as u64, "Gateway request timed out");
                Err(GatewayError::Timeout {
                    method: method.to_string(),
                })
            }
        }
    }

    /// Start an agent run (`agent` method).
    pub async fn run_agent(
        &self,
        request: &AgentRunRequest,
    ) -> Result<AgentRunAccepted, GatewayError> {
        let params = serde_json::to_value(request)?;
        let data = self
            .request("agent", params, self.shared.config.request_timeout)
            .await?;
        Ok(serde_json::from_value(data)?)
    }

    /// Gateway health (`health` method).
    pub async fn health(&self) -> Result<Value, GatewayError> {
        self.request("health", json!({}), self.shared.config.request_timeout)
            .await
    }

    /// List gateway sessions (`sessions.list` method).
    pub async fn list_sessions(&self) -> Result<Value, GatewayError> {
        self.request("sessions.list", json!({}), self.shared.config.request_timeout)
            .await
    }
}

/// Connect / read / reconnect until the ceiling or an owner disconnect.
async fn drive(shared: Arc<Shared>, token: CancellationToken) {
    loop {
        shared.set_state(ConnectionState::Connecting);
        info!(url = %shared.config.url, "Connecting to gateway");

        let reason = match run_session(&shared, &token).await {
            Ok(reason) => reason,
            Err(e) => {
                warn!(error = %e, "Gateway connection failed");
                shared.emit(ConnectionEvent::Error {
                    message: e.to_string(),
                });
                e.to_string()
            }
        };

        *shared.outbound.lock().await = None;
        shared.pending.fail_all().await;
        shared.set_state(ConnectionState::Disconnected);
        shared.emit(ConnectionEvent::Disconnected {
            reason: reason.clone(),
        });

        let decision = shared.reconnect.lock().await.next();
        match decision {
            ReconnectDecision::Retry { attempt, delay } => {
                info!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    reason = %reason,
                    "Reconnecting to gateway"
                );
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            ReconnectDecision::GiveUp { attempts } => {
                error!(attempts, "Gateway reconnect ceiling reached, giving up");
                shared.emit(ConnectionEvent::Fatal { attempts });
                break;
            }
            ReconnectDecision::Suppressed => {
                debug!("Reconnection suppressed");
                break;
            }
        }
    }

    shared.set_state(ConnectionState::Closed);
    info!("Gateway connection driver stopped");
}

/// One connection: open, handshake, read until closed.
///
/// Returns the close reason; transport errors are reported to subscribers
/// before returning.
async fn run_session(shared: &Shared, token: &CancellationToken) -> Result<String, GatewayError> {
    let (socket, _) = tokio::select! {
        _ = token.cancelled() => return Ok("disconnect requested".to_string()),
        result = connect_async(shared.config.url.as_str()) => result?,
    };
    let (mut sink, mut stream) = socket.split();

    let handshake = RpcRequest::new("subscribe", json!({ "events": SUBSCRIBED_EVENTS }));
    sink.send(Message::Text(serde_json::to_string(&handshake)?))
        .await?;

    let (out_tx, mut out_rx) = mpsc::channel::<Message>(OUTBOUND_BUFFER);
    let writer = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            if let Err(e) = sink.send(msg).await {
                warn!(error = %e, "Gateway write failed");
                break;
            }
        }
        sink.close().await.ok();
    });

    *shared.outbound.lock().await = Some(out_tx);
    shared.reconnect.lock().await.on_connected();
    shared.set_state(ConnectionState::Connected);
    info!(url = %shared.config.url, "Connected to gateway");
    shared.emit(ConnectionEvent::Connected);

    let reason = loop {
        let next = tokio::select! {
            _ = token.cancelled() => break "disconnect requested".to_string(),
            next = stream.next() => next,
        };

        match next {
            Some(Ok(Message::Text(text))) => {
                let Some(event) = handle_text(shared, &text).await else {
                    continue;
                };
                tokio::select! {
                    _ = token.cancelled() => break "disconnect requested".to_string(),
                    sent = shared.raw_tx.send(event) => {
                        if sent.is_err() {
                            break "event consumer dropped".to_string();
                        }
                    }
                }
            }
            Some(Ok(Message::Close(frame))) => {
                break frame
                    .map(|f| f.reason.to_string())
                    .filter(|r| !r.is_empty())
                    .unwrap_or_else(|| "closed by gateway".to_string());
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                warn!(error = %e, "Gateway stream error");
                shared.emit(ConnectionEvent::Error {
                    message: e.to_string(),
                });
                break e.to_string();
            }
            None => break "stream ended".to_string(),
        }
    };

    // Dropping the last sender ends the writer, which closes the socket.
    *shared.outbound.lock().await = None;
    if token.is_cancelled() {
        writer.await.ok();
    }

    Ok(reason)
}

/// Route one text frame. Returns the event to forward, if any.
async fn handle_text(shared: &Shared, text: &str) -> Option<GatewayEvent> {
    trace!(frame = %preview(text, 200), "Gateway frame");
    match decode_frame(text) {
        Ok(InboundFrame::Res(response)) => {
            shared.pending.resolve(response).await;
            None
        }
        Ok(InboundFrame::Heartbeat { ts }) => {
            let ms = ts.unwrap_or_else(|| Utc::now().timestamp_millis());
            shared.last_heartbeat_ms.store(ms, Ordering::Relaxed);
            None
        }
        Ok(frame) => frame.into_event(),
        Err(e) => {
            warn!(
                error = %e,
                preview = %preview(text, 200),
                "Dropping malformed gateway frame"
            );
            None
        }
    }
}
