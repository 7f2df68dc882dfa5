//! Normalized run events.
//!
//! The gateway reports runs through several overlapping streams. Each raw
//! frame is decoded into exactly one [`NormalizedEvent`] (or discarded), and
//! everything downstream dispatches on [`EventKind`].

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::RunId;

/// A typed event about one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedEvent {
    /// Run the event belongs to.
    pub run_id: RunId,
    /// Gateway session the run executes in.
    pub session_key: Option<String>,
    /// Sequence number reported by the emitting stream.
    pub seq: u64,
    /// Unix timestamp (milliseconds) when the event occurred.
    pub timestamp_ms: i64,
    /// Variant-specific payload.
    pub kind: EventKind,
}

impl NormalizedEvent {
    /// Create a new event.
    pub fn new(run_id: RunId, seq: u64, timestamp_ms: i64, kind: EventKind) -> Self {
        Self {
            run_id,
            session_key: None,
            seq,
            timestamp_ms,
            kind,
        }
    }

    /// Builder method to set the session key.
    pub fn with_session(mut self, session_key: impl Into<String>) -> Self {
        self.session_key = Some(session_key.into());
        self
    }

    /// Event time, falling back to now for out-of-range timestamps.
    pub fn occurred_at(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.timestamp_ms)
            .single()
            .unwrap_or_else(Utc::now)
    }

    /// Short name of the variant, for logs.
    pub fn name(&self) -> &'static str {
        self.kind.name()
    }
}

/// Closed set of event variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    /// The run began executing.
    LifecycleStart,
    /// The run finished successfully.
    LifecycleEnd {
        /// Tokens consumed by the run, when reported.
        tokens: Option<u64>,
    },
    /// The run failed.
    LifecycleError {
        /// Upstream error text.
        error: String,
    },
    /// The agent invoked a tool.
    ToolCall {
        /// Tool name.
        name: String,
        /// Tool phase as reported (start, update, result), if any.
        phase: Option<String>,
        /// Tool arguments, if reported.
        args: Option<Value>,
    },
    /// A chunk of assistant text.
    AssistantDelta {
        /// The chunk itself.
        text: String,
        /// Which stream produced it.
        source: DeltaSource,
    },
    /// The final assistant message of a chat turn.
    AssistantFinal {
        /// Full text of the message.
        text: String,
    },
}

impl EventKind {
    /// Short name of the variant, for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::LifecycleStart => "lifecycle_start",
            Self::LifecycleEnd { .. } => "lifecycle_end",
            Self::LifecycleError { .. } => "lifecycle_error",
            Self::ToolCall { .. } => "tool_call",
            Self::AssistantDelta { .. } => "assistant_delta",
            Self::AssistantFinal { .. } => "assistant_final",
        }
    }
}

/// Stream an assistant delta arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaSource {
    /// `agent` frames with `stream = "assistant"`.
    Agent,
    /// `chat` frames with `state = "delta"`.
    Chat,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_builder() {
        let event = NormalizedEvent::new(RunId::new("r1"), 3, 1_700_000_000_000, EventKind::LifecycleStart)
            .with_session("task:t1");

        assert_eq!(event.session_key.as_deref(), Some("task:t1"));
        assert_eq!(event.name(), "lifecycle_start");
        assert_eq!(event.occurred_at().timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn test_kind_serialization_is_tagged() {
        let kind = EventKind::LifecycleEnd { tokens: Some(42) };
        let value = serde_json::to_value(&kind).unwrap();
        assert_eq!(value["kind"], "lifecycle_end");
        assert_eq!(value["tokens"], 42);
    }
}
