//! Wire types for the gateway protocol.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use taskdeck_core::RunId;

/// Top-level frame received from the gateway.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InboundFrame {
    /// Agent run stream event.
    Agent {
        #[serde(default)]
        payload: Value,
        #[serde(default)]
        seq: Option<u64>,
        #[serde(default)]
        ts: Option<i64>,
    },

    /// Chat stream event.
    Chat {
        #[serde(default)]
        payload: Value,
        #[serde(default)]
        seq: Option<u64>,
        #[serde(default)]
        ts: Option<i64>,
    },

    /// Session bookkeeping event.
    Session {
        #[serde(default)]
        payload: Value,
        #[serde(default)]
        seq: Option<u64>,
        #[serde(default)]
        ts: Option<i64>,
    },

    /// Gateway keepalive.
    Heartbeat {
        #[serde(default)]
        ts: Option<i64>,
    },

    /// Response to an outbound request.
    Res(RpcResponse),

    /// Unknown frame type (forward compatibility).
    #[serde(other)]
    Unknown,
}

impl InboundFrame {
    /// Convert an event frame into a raw event for the pipeline.
    ///
    /// Returns `None` for responses, heartbeats, and unknown frames.
    pub fn into_event(self) -> Option<GatewayEvent> {
        let (class, payload, seq, ts) = match self {
            Self::Agent { payload, seq, ts } => (EventClass::Agent, payload, seq, ts),
            Self::Chat { payload, seq, ts } => (EventClass::Chat, payload, seq, ts),
            Self::Session { payload, seq, ts } => (EventClass::Session, payload, seq, ts),
            Self::Heartbeat { .. } | Self::Res(_) | Self::Unknown => return None,
        };
        Some(GatewayEvent {
            class,
            payload,
            seq,
            ts,
        })
    }
}

/// Declared class of a raw event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventClass {
    Agent,
    Chat,
    Session,
}

/// A raw event as delivered by the gateway, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayEvent {
    /// Declared event class.
    pub class: EventClass,
    /// Class-specific payload.
    pub payload: Value,
    /// Frame-level sequence number, if any.
    pub seq: Option<u64>,
    /// Frame-level timestamp (ms), if any.
    pub ts: Option<i64>,
}

impl GatewayEvent {
    /// Create a raw event.
    pub fn new(class: EventClass, payload: Value) -> Self {
        Self {
            class,
            payload,
            seq: None,
            ts: None,
        }
    }
}

/// Payload of an `agent` event.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentPayload {
    pub run_id: String,
    #[serde(default)]
    pub session_key: Option<String>,
    pub stream: String,
    #[serde(default)]
    pub seq: Option<u64>,
    #[serde(default)]
    pub ts: Option<i64>,
    #[serde(default)]
    pub data: Value,
}

/// Payload of a `chat` event.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPayload {
    pub run_id: String,
    #[serde(default)]
    pub session_key: Option<String>,
    #[serde(default)]
    pub seq: Option<u64>,
    pub state: String,
    #[serde(default)]
    pub message: Option<ChatMessage>,
}

/// Chat message carried by a `chat` event.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: ChatContent,
}

impl ChatMessage {
    /// Text of the first content block.
    pub fn first_text(&self) -> Option<&str> {
        match &self.content {
            ChatContent::Text(text) => Some(text.as_str()),
            ChatContent::Blocks(blocks) => blocks.first().and_then(|b| b.text.as_deref()),
        }
    }
}

/// Chat content: either a bare string or a list of blocks.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ChatContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl Default for ChatContent {
    fn default() -> Self {
        Self::Blocks(Vec::new())
    }
}

/// One block of chat content.
#[derive(Debug, Clone, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type", default)]
    pub block_type: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

/// Outbound request frame.
#[derive(Debug, Clone, Serialize)]
pub struct RpcRequest {
    #[serde(rename = "type")]
    pub frame_type: &'static str,
    pub id: String,
    pub method: String,
    pub params: Value,
}

impl RpcRequest {
    /// Create a request with a fresh id.
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            frame_type: "req",
            id: Uuid::new_v4().to_string(),
            method: method.into(),
            params,
        }
    }
}

/// Response frame to an outbound request.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcResponse {
    pub id: String,
    pub ok: bool,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcErrorBody>,
}

/// Error body of a non-OK response.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcErrorBody {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

/// Parameters of the `agent` method.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRunRequest {
    pub agent_id: String,
    pub session_key: String,
    pub message: String,
    pub idempotency_key: String,
}

/// Result of the `agent` method.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRunAccepted {
    pub run_id: RunId,
    #[serde(default)]
    pub status: Option<String>,
}
