//! Gateway client for TaskDeck
//!
//! This crate talks to the external agent-execution gateway over a single
//! long-lived WebSocket: it keeps the connection alive with exponential
//! backoff, correlates request/response RPC calls, and turns the raw event
//! stream into typed [`taskdeck_core::NormalizedEvent`]s.
//!
//! # Example
//!
//! ```rust,no_run
//! use taskdeck_gateway::{normalize, ConnectionManager, GatewayConfig};
//!
//! async fn run() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = GatewayConfig::new("ws://127.0.0.1:18789");
//!     let (gateway, mut events) = ConnectionManager::new(config);
//!     gateway.connect().await;
//!
//!     while let Some(raw) = events.recv().await {
//!         if let Some(event) = normalize(&raw) {
//!             println!("{} {}", event.run_id, event.name());
//!         }
//!     }
//!     Ok(())
//! }
//! ```

mod backoff;
mod connection;
mod error;
mod normalize;
mod protocol;
mod types;

// Re-export main types
pub use backoff::{ReconnectDecision, ReconnectPolicy, ReconnectState};
pub use connection::{ConnectionEvent, ConnectionManager, ConnectionState, GatewayConfig};
pub use error::GatewayError;
pub use normalize::normalize;
pub use types::{
    AgentPayload, AgentRunAccepted, AgentRunRequest, ChatContent, ChatMessage, ChatPayload,
    ContentBlock, EventClass, GatewayEvent, InboundFrame, RpcErrorBody, RpcRequest, RpcResponse,
};
