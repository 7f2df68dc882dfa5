//! TaskDeck Coordinator Server

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use taskdeck_gateway::{ConnectionEvent, ConnectionManager};
use taskdeck_server::{
    http, load_seed, AppState, Args, Bridge, BroadcastHub, Config, Dispatcher, MemoryStore,
    OutputAccumulator, Reconciler, Store,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("taskdeck_server=info".parse()?)
                .add_directive("taskdeck_gateway=info".parse()?),
        )
        .with_target(true)
        .init();

    let config = Config::from(Args::parse());
    let http_addr: SocketAddr = config.http_addr.parse()?;

    let shutdown = CancellationToken::new();

    // Core components
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    if let Some(path) = &config.seed {
        let loaded = load_seed(path, store.as_ref()).await?;
        info!(
            path = %path.display(),
            tasks = loaded.tasks,
            agents = loaded.agents,
            "Loaded seed data"
        );
    }
    let accumulator = Arc::new(OutputAccumulator::new());
    let hub = Arc::new(BroadcastHub::new(config.hub.clone()));
    let liveness = hub.clone().spawn_liveness(shutdown.child_token());

    // Gateway connection
    let (gateway, raw_events) = ConnectionManager::new(config.gateway.clone());
    let gateway = Arc::new(gateway);
    let mut connection_events = gateway.subscribe();

    // Event bridge: one event at a time, in arrival order
    let reconciler = Arc::new(Reconciler::new(
        store.clone(),
        accumulator.clone(),
        config.output_persist_interval,
    ));
    let runs = reconciler.runs().clone();
    let bridge = Arc::new(Bridge::new(reconciler, hub.clone()));
    let stats = bridge.spawn_stats(config.stats_interval, shutdown.child_token());
    let bridge_task = {
        let bridge = bridge.clone();
        tokio::spawn(async move { bridge.run(ReceiverStream::new(raw_events)).await })
    };

    let dispatcher = Arc::new(
        Dispatcher::new(store.clone(), gateway.clone(), hub.clone()).with_run_table(runs),
    );
    let state = AppState::new(store, accumulator, hub, dispatcher, gateway.clone());

    info!(
        http_addr = %http_addr,
        gateway_url = %config.gateway.url,
        "Starting TaskDeck coordinator"
    );
    gateway.connect().await;

    // Start HTTP server
    let http_listener = TcpListener::bind(http_addr).await?;
    let http_server = axum::serve(http_listener, http::create_router(state));
    info!("HTTP server listening on {}", http_addr);

    let mut exit_code = 0;
    tokio::select! {
        result = http_server => {
            if let Err(e) = result {
                error!(error = %e, "HTTP server error");
                exit_code = 1;
            }
        }
        attempts = wait_for_fatal(&mut connection_events) => {
            error!(attempts, "Gateway unreachable, giving up");
            exit_code = 1;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    shutdown.cancel();
    gateway.disconnect().await;
    liveness.await.ok();
    stats.await.ok();
    bridge_task.abort();

    info!("TaskDeck coordinator stopped");
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}

/// Resolve once the gateway connection gives up reconnecting.
async fn wait_for_fatal(events: &mut broadcast::Receiver<ConnectionEvent>) -> u32 {
    loop {
        match events.recv().await {
            Ok(ConnectionEvent::Fatal { attempts }) => return attempts,
            Ok(ConnectionEvent::Connected) => info!("Gateway connected"),
            Ok(ConnectionEvent::Disconnected { reason }) => {
                warn!(reason = %reason, "Gateway disconnected")
            }
            Ok(ConnectionEvent::Error { message }) => warn!(error = %message, "Gateway error"),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Missed gateway connection events")
            }
            Err(broadcast::error::RecvError::Closed) => std::future::pending::<()>().await,
        }
    }
}
