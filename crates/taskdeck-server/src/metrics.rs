//! Prometheus metrics collection and formatting.
//!
//! This module provides metrics in Prometheus text exposition format.

use std::fmt::Write;
use std::sync::Arc;

use taskdeck_core::{AgentStatus, TaskStatus};
use taskdeck_gateway::ConnectionState;

use crate::state::AppState;
use crate::store::StoreError;

/// Collect all metrics from AppState and format as Prometheus text.
pub async fn collect_metrics(state: &Arc<AppState>) -> Result<String, StoreError> {
    let mut output = String::new();

    collect_task_metrics(state, &mut output).await?;
    collect_agent_metrics(state, &mut output).await?;
    collect_bridge_metrics(state, &mut output).await;

    Ok(output)
}

/// Collect task metrics by status.
async fn collect_task_metrics(state: &Arc<AppState>, output: &mut String) -> Result<(), StoreError> {
    let counts = state.store.task_counts().await?;

    writeln!(output, "# HELP taskdeck_tasks_total Number of tasks by status").ok();
    writeln!(output, "# TYPE taskdeck_tasks_total gauge").ok();
    for status in TaskStatus::ALL {
        let n = counts.get(&status).copied().unwrap_or(0);
        writeln!(output, "taskdeck_tasks_total{{status=\"{status}\"}} {n}").ok();
    }
    Ok(())
}

/// Collect agent metrics by status.
async fn collect_agent_metrics(state: &Arc<AppState>, output: &mut String) -> Result<(), StoreError> {
    let counts = state.store.agent_counts().await?;

    writeln!(output).ok();
    writeln!(output, "# HELP taskdeck_agents Number of agents by status").ok();
    writeln!(output, "# TYPE taskdeck_agents gauge").ok();
    for status in [AgentStatus::Idle, AgentStatus::Working, AgentStatus::Offline] {
        let n = counts.get(&status).copied().unwrap_or(0);
        writeln!(output, "taskdeck_agents{{status=\"{}\"}} {n}", status.as_str()).ok();
    }
    Ok(())
}

/// Collect gateway and observer metrics.
async fn collect_bridge_metrics(state: &Arc<AppState>, output: &mut String) {
    let connected = u8::from(state.gateway.state() == ConnectionState::Connected);
    let observers = state.hub.observer_count().await;
    let subscriptions = state.hub.subscription_count().await;
    let dropped = state.hub.dropped_messages();
    let buffers = state.accumulator.len().await;

    writeln!(output).ok();
    writeln!(output, "# HELP taskdeck_gateway_connected Whether the gateway connection is up").ok();
    writeln!(output, "# TYPE taskdeck_gateway_connected gauge").ok();
    writeln!(output, "taskdeck_gateway_connected {connected}").ok();

    writeln!(output).ok();
    writeln!(output, "# HELP taskdeck_observers_connected Number of observer connections").ok();
    writeln!(output, "# TYPE taskdeck_observers_connected gauge").ok();
    writeln!(output, "taskdeck_observers_connected {observers}").ok();

    writeln!(output).ok();
    writeln!(output, "# HELP taskdeck_observer_subscriptions Task subscriptions across observers").ok();
    writeln!(output, "# TYPE taskdeck_observer_subscriptions gauge").ok();
    writeln!(output, "taskdeck_observer_subscriptions {subscriptions}").ok();

    writeln!(output).ok();
    writeln!(
        output,
        "# HELP taskdeck_observer_dropped_messages_total Messages dropped on full observer queues"
    )
    .ok();
    writeln!(output, "# TYPE taskdeck_observer_dropped_messages_total counter").ok();
    writeln!(output, "taskdeck_observer_dropped_messages_total {dropped}").ok();

    writeln!(output).ok();
    writeln!(output, "# HELP taskdeck_output_buffers Runs currently accumulating output").ok();
    writeln!(output, "# TYPE taskdeck_output_buffers gauge").ok();
    writeln!(output, "taskdeck_output_buffers {buffers}").ok();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_state;

    #[tokio::test]
    async fn test_collect_metrics_empty_state() {
        let (state, _) = test_state(ConnectionState::Connected).await;
        let output = collect_metrics(&state).await.unwrap();

        // Task metrics
        assert!(output.contains("taskdeck_tasks_total{status=\"inbox\"} 0"));
        assert!(output.contains("taskdeck_tasks_total{status=\"in_progress\"} 0"));

        // Agent metrics
        assert!(output.contains("taskdeck_agents{status=\"idle\"} 0"));

        // Bridge metrics
        assert!(output.contains("taskdeck_gateway_connected 1"));
        assert!(output.contains("taskdeck_observers_connected 0"));
        assert!(output.contains("taskdeck_observer_dropped_messages_total 0"));
    }

    #[tokio::test]
    async fn test_collect_metrics_counts_observers() {
        let (state, _) = test_state(ConnectionState::Disconnected).await;
        let _observer = state.hub.register().await;
        let output = collect_metrics(&state).await.unwrap();

        assert!(output.contains("taskdeck_gateway_connected 0"));
        assert!(output.contains("taskdeck_observers_connected 1"));
    }
}
