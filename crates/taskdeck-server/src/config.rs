//! Server configuration.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use taskdeck_gateway::{GatewayConfig, ReconnectPolicy};

use crate::hub::HubConfig;

/// Command-line arguments for the server binary.
#[derive(Debug, Parser)]
#[command(name = "taskdeck-server")]
#[command(about = "TaskDeck coordinator: bridges gateway run events into task state")]
#[command(version)]
pub struct Args {
    /// HTTP bind address (observer WebSocket, health, metrics, task reads)
    #[arg(long, default_value = "127.0.0.1:8787")]
    pub http_addr: String,

    /// Gateway WebSocket URL
    #[arg(long, default_value = "ws://127.0.0.1:18789")]
    pub gateway_url: String,

    /// Base delay for gateway reconnection backoff (milliseconds)
    #[arg(long, default_value = "1000")]
    pub reconnect_base_ms: u64,

    /// Reconnection attempts before giving up
    #[arg(long, default_value = "10")]
    pub max_reconnect_attempts: u32,

    /// Timeout for gateway RPC calls (seconds)
    #[arg(long, default_value = "30")]
    pub rpc_timeout_secs: u64,

    /// Observer ping interval (seconds)
    #[arg(long, default_value = "30")]
    pub heartbeat_interval_secs: u64,

    /// Missed pongs before an observer is evicted
    #[arg(long, default_value = "2")]
    pub max_missed_pongs: u32,

    /// Per-observer outbound message buffer
    #[arg(long, default_value = "256")]
    pub observer_buffer: usize,

    /// Minimum interval between output snapshots of a running task (milliseconds)
    #[arg(long, default_value = "500")]
    pub output_persist_interval_ms: u64,

    /// Interval between periodic stats broadcasts (seconds)
    #[arg(long, default_value = "10")]
    pub stats_interval_secs: u64,

    /// JSON file of tasks and agents to load into the store at startup
    #[arg(long)]
    pub seed: Option<PathBuf>,
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server bind address.
    pub http_addr: String,

    /// Gateway client settings.
    pub gateway: GatewayConfig,

    /// Observer hub settings.
    pub hub: HubConfig,

    /// Minimum interval between output snapshots while a run streams.
    pub output_persist_interval: Duration,

    /// Interval between periodic stats broadcasts.
    pub stats_interval: Duration,

    /// Optional startup fixtures for the store.
    pub seed: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_addr: "127.0.0.1:8787".to_string(),
            gateway: GatewayConfig::default(),
            hub: HubConfig::default(),
            output_persist_interval: Duration::from_millis(500),
            stats_interval: Duration::from_secs(10),
            seed: None,
        }
    }
}

impl From<Args> for Config {
    fn from(args: Args) -> Self {
        let gateway = GatewayConfig {
            url: args.gateway_url,
            reconnect: ReconnectPolicy::new(
                Duration::from_millis(args.reconnect_base_ms),
                args.max_reconnect_attempts,
            ),
            request_timeout: Duration::from_secs(args.rpc_timeout_secs),
            ..GatewayConfig::default()
        };

        Self {
            http_addr: args.http_addr,
            gateway,
            hub: HubConfig {
                buffer: args.observer_buffer,
                heartbeat_interval: Duration::from_secs(args.heartbeat_interval_secs),
                max_missed_pongs: args.max_missed_pongs,
            },
            output_persist_interval: Duration::from_millis(args.output_persist_interval_ms),
            stats_interval: Duration::from_secs(args.stats_interval_secs),
            seed: args.seed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_defaults_match_config_defaults() {
        let args = Args::parse_from(["taskdeck-server"]);
        let config = Config::from(args);
        let defaults = Config::default();

        assert_eq!(config.http_addr, defaults.http_addr);
        assert_eq!(config.gateway.url, defaults.gateway.url);
        assert_eq!(config.gateway.reconnect, defaults.gateway.reconnect);
        assert_eq!(config.gateway.request_timeout, defaults.gateway.request_timeout);
        assert_eq!(config.hub, defaults.hub);
        assert_eq!(config.output_persist_interval, defaults.output_persist_interval);
        assert_eq!(config.stats_interval, defaults.stats_interval);
        assert_eq!(config.seed, defaults.seed);
    }

    #[test]
    fn test_args_override() {
        let args = Args::parse_from([
            "taskdeck-server",
            "--gateway-url",
            "ws://gw:9000",
            "--reconnect-base-ms",
            "250",
            "--max-reconnect-attempts",
            "3",
            "--max-missed-pongs",
            "4",
            "--seed",
            "fixtures/board.json",
        ]);
        let config = Config::from(args);

        assert_eq!(config.gateway.url, "ws://gw:9000");
        assert_eq!(config.gateway.reconnect.base_delay, Duration::from_millis(250));
        assert_eq!(config.gateway.reconnect.max_attempts, 3);
        assert_eq!(config.hub.max_missed_pongs, 4);
        assert_eq!(config.seed, Some(PathBuf::from("fixtures/board.json")));
    }
}
