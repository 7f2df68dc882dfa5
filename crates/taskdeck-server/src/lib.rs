//! TaskDeck Coordinator Library
//!
//! This crate bridges the agent gateway's run events into task state:
//! output accumulation, lifecycle reconciliation, observer fan-out, and the
//! HTTP surfaces that expose them.

pub mod accumulator;
pub mod bridge;
pub mod config;
pub mod dispatcher;
pub mod http;
pub mod hub;
pub mod metrics;
pub mod reconciler;
pub mod runs;
pub mod seed;
pub mod state;
pub mod store;
pub mod transitions;

#[cfg(test)]
mod testing;

pub use accumulator::{AppendOutcome, OutputAccumulator};
pub use bridge::Bridge;
pub use config::{Args, Config};
pub use dispatcher::{AgentRunner, DispatchError, Dispatcher};
pub use hub::{BroadcastHub, BroadcastMessage, HubConfig};
pub use reconciler::{Outcome, ReconcileError, Reconciler};
pub use seed::{load_seed, Seed, SeedError};
pub use state::AppState;
pub use store::{MemoryStore, Store, StoreError};
