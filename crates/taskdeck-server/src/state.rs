//! Shared application state.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use taskdeck_gateway::{ConnectionManager, ConnectionState};

use crate::accumulator::OutputAccumulator;
use crate::dispatcher::Dispatcher;
use crate::hub::BroadcastHub;
use crate::store::Store;

/// Gateway status as seen by the HTTP surfaces.
pub trait GatewayStatus: Send + Sync {
    fn state(&self) -> ConnectionState;

    /// When the gateway last sent a heartbeat.
    fn last_heartbeat(&self) -> Option<DateTime<Utc>>;
}

impl GatewayStatus for ConnectionManager {
    fn state(&self) -> ConnectionState {
        ConnectionManager::state(self)
    }

    fn last_heartbeat(&self) -> Option<DateTime<Utc>> {
        ConnectionManager::last_heartbeat(self)
    }
}

/// Shared application state.
pub struct AppState {
    /// Task, agent, activity and output persistence.
    pub store: Arc<dyn Store>,

    /// Live output buffers of in-flight runs.
    pub accumulator: Arc<OutputAccumulator>,

    /// Observer connections.
    pub hub: Arc<BroadcastHub>,

    /// Starts agent runs for tasks.
    pub dispatcher: Arc<Dispatcher>,

    /// Gateway connection state.
    pub gateway: Arc<dyn GatewayStatus>,
}

impl AppState {
    /// Create a new AppState wrapped in Arc.
    pub fn new(
        store: Arc<dyn Store>,
        accumulator: Arc<OutputAccumulator>,
        hub: Arc<BroadcastHub>,
        dispatcher: Arc<Dispatcher>,
        gateway: Arc<dyn GatewayStatus>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            accumulator,
            hub,
            dispatcher,
            gateway,
        })
    }
}
