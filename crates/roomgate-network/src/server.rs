//! TCP socket server for device and control-plane connections.
//!
//! Each accepted connection runs on its own task with a
//! [`GatewaySocketCodec`]-framed stream. The first message must be
//! `register`; everything after that is typed message passing. Inbound
//! events become [`GatewayEvent`]s on one channel for the gateway's
//! routing loop, outbound [`ServerMessage`]s arrive through the
//! session's connection handle and are pumped onto the socket here.
//!
//! A decode error on an established connection is logged and the
//! connection continues; peers recover at the next well-formed line.
//! EOF or an IO error removes the session.

use chrono::Utc;
use futures::{SinkExt, StreamExt};
use roomgate_core::{DeviceId, Error, Result, RoomId};
use roomgate_protocol::{
    ClientMessage, CommandKind, DeviceEvent, GatewaySocketCodec, ServerMessage,
};
use roomgate_session::{Epoch, SessionRegistry};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

/// Capacity of a connection's outbound message channel.
const OUTBOUND_CAPACITY: usize = 32;

/// Capacity of the gateway event channel.
const EVENT_CAPACITY: usize = 256;

/// Configuration for the socket server.
#[derive(Debug, Clone)]
pub struct SocketServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum number of simultaneous connections.
    pub max_connections: usize,
}

impl Default for SocketServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:7700".parse().unwrap_or_else(|_| {
                SocketAddr::from(([0, 0, 0, 0], 7700))
            }),
            max_connections: 128,
        }
    }
}

/// One typed inbound event, routed to the gateway's logic loop.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayEvent {
    /// The registered device the event arrived from.
    pub device_id: DeviceId,
    /// The device's room at the time of the event, if assigned.
    pub room_id: Option<RoomId>,
    pub kind: GatewayEventKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEventKind {
    /// A field event from a peripheral.
    Device(DeviceEvent),
    /// A command request from the control plane.
    CommandRequest {
        target: DeviceId,
        command: CommandKind,
    },
}

/// TCP listener accepting device and control-plane connections.
#[derive(Debug)]
pub struct SocketServer {
    listener: TcpListener,
    registry: Arc<SessionRegistry>,
    events: mpsc::Sender<GatewayEvent>,
    max_connections: usize,
}

impl SocketServer {
    /// Bind the listener.
    ///
    /// Returns the server and the receiving end of the gateway event
    /// channel.
    ///
    /// # Errors
    /// Returns `Error::Io` when binding fails.
    pub async fn bind(
        config: SocketServerConfig,
        registry: Arc<SessionRegistry>,
    ) -> Result<(Self, mpsc::Receiver<GatewayEvent>)> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        info!(addr = %config.bind_addr, "socket server listening");
        let (events, event_rx) = mpsc::channel(EVENT_CAPACITY);
        Ok((
            Self {
                listener,
                registry,
                events,
                max_connections: config.max_connections,
            },
            event_rx,
        ))
    }

    /// The actual bound address, useful with port 0.
    ///
    /// # Errors
    /// Returns `Error::Io` when the socket refuses to report it.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `shutdown` flips to `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let open = Arc::new(AtomicUsize::new(0));
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, addr) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    if open.load(Ordering::Relaxed) >= self.max_connections {
                        warn!(addr = %addr, max = self.max_connections,
                              "connection limit reached, rejecting");
                        drop(stream);
                        continue;
                    }
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(addr = %addr, error = %e, "could not set TCP_NODELAY");
                    }

                    open.fetch_add(1, Ordering::Relaxed);
                    let registry = self.registry.clone();
                    let events = self.events.clone();
                    let open = open.clone();
                    tokio::spawn(async move {
                        handle_connection(stream, addr, registry, events).await;
                        open.fetch_sub(1, Ordering::Relaxed);
                    });
                }
                result = shutdown.changed() => {
                    if result.is_err() || *shutdown.borrow() {
                        info!("socket server stopping");
                        return;
                    }
                }
            }
        }
    }
}

/// Per-connection task: handshake, then the message loop.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    registry: Arc<SessionRegistry>,
    events: mpsc::Sender<GatewayEvent>,
) {
    debug!(addr = %addr, "connection accepted");
    let mut framed = Framed::new(stream, GatewaySocketCodec::new());

    // First message must be register.
    let (device_id, role, room_id) = match framed.next().await {
        Some(Ok(ClientMessage::Register {
            device_id,
            role,
            room_id,
        })) => (device_id, role, room_id),
        Some(Ok(other)) => {
            warn!(addr = %addr, message = ?other, "first message was not register");
            let _ = framed
                .send(ServerMessage::RegistrationError {
                    message: "first message must be register".to_string(),
                })
                .await;
            return;
        }
        Some(Err(e)) => {
            warn!(addr = %addr, error = %e, "handshake read failed");
            return;
        }
        None => return,
    };

    let (out_tx, mut out_rx) = mpsc::channel(OUTBOUND_CAPACITY);
    let epoch = registry
        .register(device_id.clone(), role, room_id, out_tx)
        .await;

    if framed
        .send(ServerMessage::RegistrationSuccess {
            device_id: device_id.clone(),
            timestamp: Utc::now(),
        })
        .await
        .is_err()
    {
        registry.remove(&device_id, epoch).await;
        return;
    }
    info!(device_id = %device_id, addr = %addr, "device registered");

    loop {
        tokio::select! {
            outbound = out_rx.recv() => {
                let Some(message) = outbound else {
                    // The registry dropped our handle: replaced by a new
                    // connection. No removal, the session is not ours
                    // anymore.
                    debug!(device_id = %device_id, "connection superseded");
                    return;
                };
                if let Err(e) = framed.send(message).await {
                    warn!(device_id = %device_id, error = %e, "outbound send failed");
                    break;
                }
            }
            inbound = framed.next() => {
                match inbound {
                    Some(Ok(message)) => {
                        if let Err(e) =
                            handle_message(&mut framed, &registry, &events, &device_id, epoch, message)
                                .await
                        {
                            warn!(device_id = %device_id, error = %e, "connection error");
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        // Malformed lines are skipped inside the codec;
                        // an error here is the socket itself failing.
                        warn!(device_id = %device_id, error = %e, "socket transport error");
                        break;
                    }
                    None => {
                        debug!(device_id = %device_id, "connection closed by peer");
                        break;
                    }
                }
            }
        }
    }

    registry.remove(&device_id, epoch).await;
}

async fn handle_message(
    framed: &mut Framed<TcpStream, GatewaySocketCodec>,
    registry: &SessionRegistry,
    events: &mpsc::Sender<GatewayEvent>,
    device_id: &DeviceId,
    epoch: Epoch,
    message: ClientMessage,
) -> Result<()> {
    // Any traffic proves liveness.
    registry.touch(device_id, epoch).await;

    match message {
        ClientMessage::Heartbeat => Ok(()),
        ClientMessage::Register { .. } => {
            framed
                .send(ServerMessage::RegistrationError {
                    message: "already registered on this connection".to_string(),
                })
                .await
        }
        ClientMessage::Event { event } => {
            let room_id = registry
                .lookup(device_id)
                .await
                .and_then(|s| s.room_id);
            forward(
                events,
                GatewayEvent {
                    device_id: device_id.clone(),
                    room_id,
                    kind: GatewayEventKind::Device(event),
                },
            )
        }
        ClientMessage::Command {
            target_device_id,
            command,
        } => {
            let room_id = registry
                .lookup(device_id)
                .await
                .and_then(|s| s.room_id);
            let reply = match forward(
                events,
                GatewayEvent {
                    device_id: device_id.clone(),
                    room_id,
                    kind: GatewayEventKind::CommandRequest {
                        target: target_device_id,
                        command,
                    },
                },
            ) {
                Ok(()) => ServerMessage::CommandSent,
                Err(e) => ServerMessage::CommandError {
                    message: e.to_string(),
                },
            };
            framed.send(reply).await
        }
    }
}

fn forward(events: &mpsc::Sender<GatewayEvent>, event: GatewayEvent) -> Result<()> {
    events.try_send(event).map_err(|e| Error::InvalidMessage {
        message: format!("gateway event channel unavailable: {e}"),
    })
}
