//! Room gateway binary.
//!
//! Wires the socket server, bus driver, dispatcher, heartbeat monitor,
//! booking controller and emergency coordinator into one process with a
//! shared shutdown signal.

mod config;
mod router;

use anyhow::Context;
use clap::Parser;
use roomgate_booking::{EmergencyCoordinator, MemoryBookingStore, RoomController};
use roomgate_core::BusAddress;
use roomgate_dispatch::{
    BusDriver, BusHandle, CommandDispatcher, FramedBus, LoopbackBus, LoopbackHandle,
};
use roomgate_network::{SocketServer, SocketServerConfig};
use roomgate_protocol::Frame;
use roomgate_session::{HeartbeatMonitor, SessionRegistry};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::GatewayConfig;
use crate::router::EventRouter;

#[derive(Parser, Debug)]
#[command(name = "roomgate")]
#[command(version, about = "Meeting-room device gateway")]
struct Args {
    /// Address the socket server listens on.
    #[arg(long, default_value = "0.0.0.0:7700")]
    bind: SocketAddr,

    /// Deployment configuration (bus wiring, room plans).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Serial bus device path. Omit to run with an in-process loopback
    /// bus.
    #[arg(long)]
    bus_device: Option<PathBuf>,

    /// This gateway's own bus address.
    #[arg(long, default_value = "G")]
    bus_address: BusAddress,

    /// Maximum simultaneous socket connections.
    #[arg(long, default_value_t = 128)]
    max_connections: usize,

    /// Ack timeout for bus deliveries, in milliseconds.
    #[arg(long, default_value_t = 1000)]
    ack_timeout_ms: u64,

    /// Retries after an ack timeout.
    #[arg(long, default_value_t = 1)]
    delivery_retries: u32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => GatewayConfig::load(path).context("loading configuration")?,
        None => {
            warn!("no configuration file, starting with empty wiring");
            GatewayConfig::default()
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let registry = Arc::new(SessionRegistry::new());

    // The loopback handle, when present, must outlive the process or
    // the driver would read EOF.
    let (bus_handle, bus_events, _loopback) = start_bus(&args)?;
    tokio::spawn(log_bus_events(bus_events));

    let dispatcher = Arc::new(
        CommandDispatcher::new(registry.clone(), bus_handle, config.address_book()).with_timing(
            Duration::from_millis(args.ack_timeout_ms),
            args.delivery_retries,
        ),
    );
    tokio::spawn(dispatcher.clone().run_flusher(shutdown_rx.clone()));

    let monitor = HeartbeatMonitor::new(registry.clone());
    tokio::spawn(monitor.run(shutdown_rx.clone()));

    let store = Arc::new(MemoryBookingStore::new());
    let rooms = config.room_directory();
    let controller = Arc::new(RoomController::new(
        store.clone(),
        dispatcher.clone(),
        rooms.clone(),
    ));
    tokio::spawn(controller.clone().run_sweeper(shutdown_rx.clone()));

    let emergency = Arc::new(EmergencyCoordinator::new(
        store,
        dispatcher.clone(),
        registry.clone(),
        rooms,
    ));

    let server_config = SocketServerConfig {
        bind_addr: args.bind,
        max_connections: args.max_connections,
    };
    let (server, gateway_events) = SocketServer::bind(server_config, registry.clone())
        .await
        .context("binding socket server")?;
    tokio::spawn(server.run(shutdown_rx.clone()));

    tokio::spawn(router::run_notifier(registry.clone(), shutdown_rx.clone()));

    let event_router = EventRouter {
        registry,
        dispatcher,
        controller,
        emergency,
    };
    let router_task = tokio::spawn(event_router.run(gateway_events, shutdown_rx));

    info!(bind = %args.bind, bus = %args.bus_address, "roomgate running");
    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutting down");
    let _ = shutdown_tx.send(true);
    let _ = router_task.await;
    Ok(())
}

/// Start the bus driver over the configured transport.
fn start_bus(
    args: &Args,
) -> anyhow::Result<(BusHandle, mpsc::Receiver<Frame>, Option<LoopbackHandle>)> {
    match &args.bus_device {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .read(true)
                .write(true)
                .open(path)
                .with_context(|| format!("opening bus device {}", path.display()))?;
            let transport = FramedBus::new(tokio::fs::File::from_std(file));
            let (driver, handle, events) = BusDriver::new(transport, args.bus_address);
            tokio::spawn(driver.run());
            info!(device = %path.display(), "bus driver started");
            Ok((handle, events, None))
        }
        None => {
            let (bus, loopback) = LoopbackBus::new();
            let (driver, handle, events) = BusDriver::new(bus, args.bus_address);
            tokio::spawn(driver.run());
            info!("bus driver started on in-process loopback");
            Ok((handle, events, Some(loopback)))
        }
    }
}

/// Drain unsolicited inbound bus frames.
///
/// Bus peripherals mostly answer with acks, which the driver consumes;
/// anything else is telemetry worth a log line.
async fn log_bus_events(mut events: mpsc::Receiver<Frame>) {
    while let Some(frame) = events.recv().await {
        debug!(frame = %frame, "inbound bus frame");
    }
}
