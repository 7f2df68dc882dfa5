//! Frame decoding and request/response correlation.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, warn};

use crate::error::GatewayError;
use crate::types::{InboundFrame, RpcResponse};

/// Decode one text frame from the gateway.
pub fn decode_frame(text: &str) -> Result<InboundFrame, serde_json::Error> {
    serde_json::from_str(text)
}

/// First `max` characters of a frame, for logging.
pub fn preview(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

impl RpcResponse {
    /// Turn the response into the call's result.
    pub fn into_result(self) -> Result<Value, GatewayError> {
        if self.ok {
            return Ok(self.data.unwrap_or(Value::Null));
        }
        let (code, message) = match self.error {
            Some(body) => (body.code, body.message),
            None => ("UNKNOWN".to_string(), "request failed".to_string()),
        };
        Err(GatewayError::Rpc { code, message })
    }
}

/// Outstanding requests waiting for a response, keyed by request id.
#[derive(Default)]
pub struct PendingRequests {
    inner: Mutex<HashMap<String, oneshot::Sender<RpcResponse>>>,
}

impl PendingRequests {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request and get the receiver its response will arrive on.
    pub async fn register(&self, id: String) -> oneshot::Receiver<RpcResponse> {
        let (tx, rx) = oneshot::channel();
        self.inner.lock().await.insert(id, tx);
        rx
    }

    /// Forget a request (timed out or never sent).
    pub async fn remove(&self, id: &str) {
        self.inner.lock().await.remove(id);
    }

    /// Deliver a response to its waiting caller.
    ///
    /// Returns false if nobody was waiting for this id.
    pub async fn resolve(&self, response: RpcResponse) -> bool {
        let waiter = self.inner.lock().await.remove(&response.id);
        match waiter {
            Some(tx) => {
                // The caller may have given up already; that's fine.
                tx.send(response).ok();
                true
            }
            None => {
                warn!(id = %response.id, "Response for unknown request");
                false
            }
        }
    }

    /// Drop every waiter; their callers observe `ConnectionClosed`.
    pub async fn fail_all(&self) {
        let mut inner = self.inner.lock().await;
        if !inner.is_empty() {
            debug!(count = inner.len(), "Failing pending requests");
        }
        inner.clear();
    }

    /// Number of requests in flight.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }
}
