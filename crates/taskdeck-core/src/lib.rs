//! TaskDeck Core Domain Types
//!
//! This crate contains pure domain types with no dependencies on:
//! - Network/WebSocket
//! - Persistence
//! - Runtime specifics
//!
//! All types here represent the core business domain of TaskDeck: tasks
//! handed to agents, the runs that execute them, and the normalized
//! events the gateway reports about those runs.

pub mod activity;
pub mod agent;
pub mod error;
pub mod event;
pub mod ids;
pub mod status;
pub mod task;

// Re-export commonly used types
pub use activity::{Activity, ActivityKind};
pub use agent::Agent;
pub use error::CoreError;
pub use event::{DeltaSource, EventKind, NormalizedEvent};
pub use ids::{ActivityId, AgentId, RunId, TaskId};
pub use status::{AgentStatus, RunPhase, TaskOutcome, TaskStatus};
pub use task::Task;
