//! The event bridge: gateway events in, task state and observer messages out.
//!
//! Events are handled strictly one at a time in arrival order. Each event is
//! normalized, reconciled (including its store writes) and fanned out before
//! the next one is read.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, trace, warn};

use taskdeck_gateway::{normalize, GatewayEvent};

use crate::hub::BroadcastHub;
use crate::reconciler::{Outcome, ReconcileError, Reconciler};

/// Sequential gateway-to-observer pipeline.
pub struct Bridge {
    reconciler: Arc<Reconciler>,
    hub: Arc<BroadcastHub>,
}

impl Bridge {
    pub fn new(reconciler: Arc<Reconciler>, hub: Arc<BroadcastHub>) -> Self {
        Self { reconciler, hub }
    }

    /// Handle one raw gateway event.
    pub async fn handle(&self, raw: &GatewayEvent) -> Result<Outcome, ReconcileError> {
        let Some(event) = normalize(raw) else {
            trace!(class = ?raw.class, "Event not relevant to task state");
            return Ok(Outcome::Ignored);
        };

        let reconciled = self.reconciler.apply(&event).await?;
        for envelope in &reconciled.envelopes {
            self.hub.deliver(envelope).await;
        }
        Ok(reconciled.outcome)
    }

    /// Drain the event stream until it ends.
    pub async fn run<S>(&self, events: S)
    where
        S: Stream<Item = GatewayEvent>,
    {
        tokio::pin!(events);
        while let Some(raw) = events.next().await {
            if let Err(e) = self.handle(&raw).await {
                error!(error = %e, "Failed to reconcile gateway event");
            }
        }
        info!("Gateway event stream ended");
    }

    /// Push `stats_update` to every observer on a fixed interval.
    pub fn spawn_stats(&self, interval: Duration, token: CancellationToken) -> JoinHandle<()> {
        let reconciler = self.reconciler.clone();
        let hub = self.hub.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        match reconciler.stats().await {
                            Ok(envelope) => {
                                hub.deliver(&envelope).await;
                            }
                            Err(e) => warn!(error = %e, "Failed to compute task stats"),
                        }
                    }
                }
            }
        })
    }
}
