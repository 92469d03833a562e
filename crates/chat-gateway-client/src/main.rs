//! Gateway client entry point
//!
//! Run with:
//! ```bash
//! GATEWAY_TOKEN=... cargo run -p chat-gateway-client
//! ```
//!
//! Connects one client per shard and logs every dispatch until Ctrl-C.

use anyhow::Context;
use chat_common::{try_init_tracing_with_config, AppConfig, TracingConfig};
use chat_gateway_client::{EventReceiver, GatewayClient, IdentifyCoordinator};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!(error = %e, "Gateway client failed");
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("failed to load configuration")?;

    if let Err(e) = try_init_tracing_with_config(TracingConfig::for_environment(config.app.env)) {
        eprintln!("Warning: Failed to initialize tracing: {e}");
    }

    info!(
        env = ?config.app.env,
        url = %config.gateway.url,
        shards = config.gateway.shard_count,
        "Configuration loaded"
    );

    let shutdown = CancellationToken::new();
    let (identify_queue, coordinator) =
        IdentifyCoordinator::new(Duration::from_millis(config.gateway.identify_interval_ms));
    let coordinator = tokio::spawn(coordinator.run(shutdown.clone()));

    let shard_count = config.gateway.shard_count;
    let mut clients = Vec::with_capacity(shard_count as usize);
    let mut consumers = Vec::with_capacity(shard_count as usize);
    for shard_id in 0..shard_count {
        let (client, events) = GatewayClient::builder(config.gateway.clone())
            .shard(shard_id, shard_count)
            .identify_queue(identify_queue.clone())
            .shutdown_signal(shutdown.clone())
            .build()
            .with_context(|| format!("failed to build client for shard {shard_id}"))?;
        client
            .connect()
            .await
            .with_context(|| format!("shard {shard_id} failed to connect"))?;
        consumers.push(tokio::spawn(log_events(shard_id, events)));
        clients.push(client);
    }
    drop(identify_queue);

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("Shutdown signal received");

    shutdown.cancel();
    for client in &clients {
        client.shutdown().await;
    }
    for consumer in consumers {
        let _ = consumer.await;
    }
    let _ = coordinator.await;

    info!("Gateway client stopped");
    Ok(())
}

async fn log_events(shard_id: u32, mut events: EventReceiver) {
    while let Some(event) = events.recv().await {
        info!(
            shard = shard_id,
            event = %event.name,
            sequence = ?event.sequence,
            "Dispatch"
        );
    }
}
