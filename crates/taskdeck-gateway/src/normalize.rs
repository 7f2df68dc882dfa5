//! Raw gateway event -> [`NormalizedEvent`].
//!
//! Classification is by declared class plus the nested discriminator:
//!
//! | class | discriminator | result |
//! |---|---|---|
//! | agent | stream=lifecycle, phase=start/end/error | LifecycleStart/End/Error |
//! | agent | stream=tool | ToolCall |
//! | agent | stream=assistant | AssistantDelta |
//! | chat | state=delta | AssistantDelta |
//! | chat | state=final | AssistantFinal |
//!
//! Anything else is discarded.

use serde_json::Value;
use tracing::{debug, trace};

use taskdeck_core::{DeltaSource, EventKind, NormalizedEvent, RunId};

use crate::types::{AgentPayload, ChatPayload, EventClass, GatewayEvent};

/// Normalize one raw event. Unrecognized combinations yield `None`.
pub fn normalize(raw: &GatewayEvent) -> Option<NormalizedEvent> {
    match raw.class {
        EventClass::Agent => normalize_agent(raw),
        EventClass::Chat => normalize_chat(raw),
        EventClass::Session => {
            trace!("Ignoring session event");
            None
        }
    }
}

fn normalize_agent(raw: &GatewayEvent) -> Option<NormalizedEvent> {
    let payload: AgentPayload = match serde_json::from_value(raw.payload.clone()) {
        Ok(p) => p,
        Err(e) => {
            debug!(error = %e, "Undecodable agent payload");
            return None;
        }
    };

    let data = &payload.data;
    let kind = match payload.stream.as_str() {
        "lifecycle" => match str_field(data, &["phase"])? {
            "start" => EventKind::LifecycleStart,
            "end" => EventKind::LifecycleEnd {
                tokens: token_count(data),
            },
            "error" => EventKind::LifecycleError {
                error: error_text(data),
            },
            other => {
                trace!(phase = other, "Ignoring lifecycle phase");
                return None;
            }
        },
        "tool" => EventKind::ToolCall {
            name: str_field(data, &["name", "tool"])
                .unwrap_or("unknown")
                .to_string(),
            phase: str_field(data, &["phase"]).map(str::to_string),
            args: data.get("args").or_else(|| data.get("input")).cloned(),
        },
        "assistant" => {
            let text = str_field(data, &["delta", "text"])?;
            if text.is_empty() {
                return None;
            }
            EventKind::AssistantDelta {
                text: text.to_string(),
                source: DeltaSource::Agent,
            }
        }
        other => {
            trace!(stream = other, "Ignoring agent stream");
            return None;
        }
    };

    Some(NormalizedEvent {
        run_id: RunId::new(payload.run_id),
        session_key: payload.session_key,
        seq: payload.seq.or(raw.seq).unwrap_or(0),
        timestamp_ms: payload.ts.or(raw.ts).unwrap_or_else(now_ms),
        kind,
    })
}

fn normalize_chat(raw: &GatewayEvent) -> Option<NormalizedEvent> {
    let payload: ChatPayload = match serde_json::from_value(raw.payload.clone()) {
        Ok(p) => p,
        Err(e) => {
            debug!(error = %e, "Undecodable chat payload");
            return None;
        }
    };

    let text = payload
        .message
        .as_ref()
        .and_then(|m| m.first_text())
        .unwrap_or_default()
        .to_string();

    let kind = match payload.state.as_str() {
        "delta" if !text.is_empty() => EventKind::AssistantDelta {
            text,
            source: DeltaSource::Chat,
        },
        "final" => EventKind::AssistantFinal { text },
        other => {
            trace!(state = other, "Ignoring chat state");
            return None;
        }
    };

    Some(NormalizedEvent {
        run_id: RunId::new(payload.run_id),
        session_key: payload.session_key,
        seq: payload.seq.or(raw.seq).unwrap_or(0),
        timestamp_ms: raw.ts.unwrap_or_else(now_ms),
        kind,
    })
}

/// First string field present under any of `keys`.
fn str_field<'a>(data: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|k| data.get(*k).and_then(Value::as_str))
}

fn token_count(data: &Value) -> Option<u64> {
    data.get("tokens")
        .or_else(|| data.get("tokensUsed"))
        .and_then(Value::as_u64)
        .or_else(|| {
            let usage = data.get("usage")?;
            usage
                .get("totalTokens")
                .or_else(|| usage.get("total_tokens"))
                .and_then(Value::as_u64)
        })
}

fn error_text(data: &Value) -> String {
    match data.get("error") {
        Some(Value::String(s)) => s.clone(),
        Some(obj @ Value::Object(_)) => str_field(obj, &["message"])
            .unwrap_or("Unknown error")
            .to_string(),
        _ => str_field(data, &["message"])
            .unwrap_or("Unknown error")
            .to_string(),
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn agent(stream: &str, data: Value) -> GatewayEvent {
        GatewayEvent::new(
            EventClass::Agent,
            json!({
                "runId": "r1",
                "sessionKey": "task:t1",
                "stream": stream,
                "seq": 4,
                "ts": 1_700_000_000_000i64,
                "data": data
            }),
        )
    }

    fn chat(state: &str, message: Value) -> GatewayEvent {
        GatewayEvent::new(
            EventClass::Chat,
            json!({ "runId": "r1", "sessionKey": "task:t1", "seq": 2, "state": state, "message": message }),
        )
    }

    #[test]
    fn test_lifecycle_phases() {
        let start = normalize(&agent("lifecycle", json!({ "phase": "start" }))).unwrap();
        assert_eq!(start.kind, EventKind::LifecycleStart);
        assert_eq!(start.run_id, RunId::new("r1"));
        assert_eq!(start.session_key.as_deref(), Some("task:t1"));
        assert_eq!(start.seq, 4);
        assert_eq!(start.timestamp_ms, 1_700_000_000_000);

        let end = normalize(&agent("lifecycle", json!({ "phase": "end", "tokens": 42 }))).unwrap();
        assert_eq!(end.kind, EventKind::LifecycleEnd { tokens: Some(42) });

        let error = normalize(&agent(
            "lifecycle",
            json!({ "phase": "error", "error": "rate limited" }),
        ))
        .unwrap();
        assert_eq!(
            error.kind,
            EventKind::LifecycleError {
                error: "rate limited".to_string()
            }
        );
    }

    #[test]
    fn test_token_count_from_usage_block() {
        let end = normalize(&agent(
            "lifecycle",
            json!({ "phase": "end", "usage": { "totalTokens": 1200 } }),
        ))
        .unwrap();
        assert_eq!(end.kind, EventKind::LifecycleEnd { tokens: Some(1200) });
    }

    #[test]
    fn test_error_object_message() {
        let error = normalize(&agent(
            "lifecycle",
            json!({ "phase": "error", "error": { "message": "boom" } }),
        ))
        .unwrap();
        assert_eq!(
            error.kind,
            EventKind::LifecycleError {
                error: "boom".to_string()
            }
        );
    }

    #[test]
    fn test_tool_call() {
        let event = normalize(&agent(
            "tool",
            json!({ "name": "read", "phase": "start", "args": { "path": "a.rs" } }),
        ))
        .unwrap();

        match event.kind {
            EventKind::ToolCall { name, phase, args } => {
                assert_eq!(name, "read");
                assert_eq!(phase.as_deref(), Some("start"));
                assert_eq!(args.unwrap()["path"], "a.rs");
            }
            other => panic!("Expected ToolCall, got {:?}", other),
        }
    }

    #[test]
    fn test_assistant_stream_prefers_delta() {
        let event = normalize(&agent("assistant", json!({ "text": "Hello", "delta": "lo" }))).unwrap();
        assert_eq!(
            event.kind,
            EventKind::AssistantDelta {
                text: "lo".to_string(),
                source: DeltaSource::Agent
            }
        );
    }

    #[test]
    fn test_chat_delta_uses_first_block() {
        let event = normalize(&chat(
            "delta",
            json!({ "role": "assistant", "content": [{ "type": "text", "text": "Hel" }] }),
        ))
        .unwrap();
        assert_eq!(
            event.kind,
            EventKind::AssistantDelta {
                text: "Hel".to_string(),
                source: DeltaSource::Chat
            }
        );
        assert_eq!(event.seq, 2);
    }

    #[test]
    fn test_chat_final() {
        let event = normalize(&chat(
            "final",
            json!({ "role": "assistant", "content": [{ "type": "text", "text": "Hello world" }] }),
        ))
        .unwrap();
        assert_eq!(
            event.kind,
            EventKind::AssistantFinal {
                text: "Hello world".to_string()
            }
        );
    }

    #[test]
    fn test_unrecognized_combinations_are_discarded() {
        assert!(normalize(&agent("lifecycle", json!({ "phase": "paused" }))).is_none());
        assert!(normalize(&agent("compaction", json!({}))).is_none());
        assert!(normalize(&chat("aborted", json!({ "content": "x" }))).is_none());
        assert!(normalize(&GatewayEvent::new(EventClass::Session, json!({ "sessionKey": "s" }))).is_none());
        assert!(normalize(&GatewayEvent::new(EventClass::Agent, json!({ "bogus": true }))).is_none());
    }

    #[test]
    fn test_both_delta_paths_normalize_independently() {
        let from_agent = normalize(&agent("assistant", json!({ "delta": "Hi" }))).unwrap();
        let from_chat = normalize(&chat("delta", json!({ "content": "Hi" }))).unwrap();
        assert!(matches!(from_agent.kind, EventKind::AssistantDelta { source: DeltaSource::Agent, .. }));
        assert!(matches!(from_chat.kind, EventKind::AssistantDelta { source: DeltaSource::Chat, .. }));
    }
}
