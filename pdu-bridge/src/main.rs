/**
 * PDU BRIDGE - entry point
 *
 * Wires the context once: config -> fleet registry -> MQTT client -> bridge,
 * then runs the poll scheduler, the publish loop and the command dispatcher
 * until SIGINT/SIGTERM.
 *
 * Teardown order: stop tasks, drain commands (every device call runs to its
 * own timeout), bridge offline + disconnect, registry releases its adapters.
 */

use anyhow::{Context, Result};
use pdu_bridge::config::{load_config, CONFIG_ENV, DEFAULT_CONFIG_PATH};
use pdu_bridge::health::HealthTracker;
use pdu_bridge::mqtt::{create_mqtt_client, spawn_event_loop};
use pdu_bridge::{bridge, fleet, shutdown, Bridge, FleetRegistry};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pdu_bridge=info")))
        .init();

    info!("PDU bridge v{} starting", env!("CARGO_PKG_VERSION"));

    let cfg = load_config().await.context("failed to load configuration")?;
    if cfg.pdus.is_empty() {
        anyhow::bail!(
            "no PDUs configured: add a `pdus` list to {} (or point {} at a config file)",
            DEFAULT_CONFIG_PATH,
            CONFIG_ENV
        );
    }

    let health = HealthTracker::new();

    // registry first, so the first snapshot already has real data
    let registry = Arc::new(FleetRegistry::initialize(cfg.pdus.clone()).await);
    if registry.active_devices().is_empty() {
        warn!("no PDU answered the connection test, commands will be rejected");
    }
    registry.poll_all().await;

    let (client, eventloop) = create_mqtt_client(&cfg.mqtt);
    let bridge = Arc::new(Bridge::new(Arc::new(client), registry.clone(), &cfg, health.clone()));

    let (stop, signal) = shutdown::channel();
    let (events_tx, events_rx) = mpsc::channel(256);

    let bus_task = spawn_event_loop(eventloop, events_tx, health.clone());
    let dispatcher = bridge::spawn_dispatcher(
        bridge.clone(),
        events_rx,
        signal.clone(),
        Duration::from_secs(cfg.bridge.shutdown_grace_secs.max(1)),
    );
    let poller = fleet::spawn_poll_scheduler(registry.clone(), cfg.scheduler_tick(), signal.clone());
    let publisher = bridge::spawn_publish_loop(
        bridge.clone(),
        Duration::from_secs(cfg.bridge.publish_interval_secs.max(1)),
        signal,
    );

    wait_for_signal().await;
    info!("shutdown requested");
    let _ = stop.send(true);

    let (poller, publisher, dispatcher) = tokio::join!(poller, publisher, dispatcher);
    for (name, res) in [("poller", poller), ("publisher", publisher), ("dispatcher", dispatcher)] {
        if let Err(e) = res {
            warn!("{} task ended abnormally: {}", name, e);
        }
    }

    if let Err(e) = bridge.go_offline().await {
        warn!("failed to go offline cleanly: {}", e);
    }
    if tokio::time::timeout(Duration::from_secs(5), bus_task).await.is_err() {
        warn!("MQTT event loop did not stop in time");
    }

    registry.shutdown();
    info!("PDU bridge stopped");
    Ok(())
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
                return;
            }
            Err(e) => warn!("cannot listen for SIGTERM: {}", e),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("cannot listen for ctrl-c: {}", e);
    }
}
