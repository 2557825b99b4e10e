use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::info;

use crate::config::RuntimeConfig;
use crate::context::CallContext;
use crate::ping::{register_ping_service, PingClient, PingRequest, PingServer};
use crate::service::Orchestrator;
use crate::transport::AmqpBroker;

/// Serve the Ping service until Ctrl-C.
pub async fn handle_serve(config: RuntimeConfig) -> Result<()> {
    let broker = Arc::new(AmqpBroker::new(config.binding.url.clone()));
    let queue = config.binding.queue.clone();
    let orchestrator = Orchestrator::new(config);

    register_ping_service(&orchestrator, Arc::new(PingServer)).context("Failed to register ping service")?;
    orchestrator
        .bind(broker)
        .await
        .with_context(|| format!("Failed to bind queue {}", queue))?;
    let workers = orchestrator.start();
    info!(queue = %queue, workers, "serving; press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    orchestrator.shutdown().await;
    Ok(())
}

/// Call a Ping service once and print the round trip.
///
/// Replies come back on a private queue derived from the target, so the
/// ping never competes with the server for its own queue. The broker
/// deletes that queue once this process stops consuming it.
pub async fn handle_ping(mut config: RuntimeConfig, target: Option<String>, timeout: Duration) -> Result<()> {
    let target = target.unwrap_or_else(|| config.binding.queue.clone());
    config.binding.queue = format!("{}.ping.{}", target, std::process::id());
    config.binding.private_queue = true;

    let broker = Arc::new(AmqpBroker::new(config.binding.url.clone()));
    let orchestrator = Orchestrator::new(config);
    orchestrator.bind(broker).await.context("Failed to bind reply queue")?;
    orchestrator.start();

    let client = PingClient::with_queue(orchestrator.clone(), target.clone());
    let ctx = CallContext::with_timeout(timeout);
    let started = Instant::now();
    let result = client.ping(&ctx, &PingRequest {}).await;
    let elapsed = started.elapsed();
    orchestrator.shutdown().await;

    let response = result.with_context(|| format!("Ping to {} failed", target))?;
    match response.time() {
        Some(time) => println!("pong from {} at {} in {:?}", target, time.to_rfc3339(), elapsed),
        None => println!("pong from {} in {:?}", target, elapsed),
    }
    Ok(())
}
