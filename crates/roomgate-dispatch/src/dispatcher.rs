//! Command dispatcher.
//!
//! Routes [`Command`]s to their peripheral: connected devices get a bus
//! write with a bounded ack wait and retry, offline devices get their
//! command parked in the registry's outbound queue for delivery on
//! reconnect. Successful action acks reconcile a per-room actuator cache
//! that higher layers may consult; the cache is derived state, never
//! authoritative.

use roomgate_core::constants::{ACK_TIMEOUT, MAX_DELIVERY_RETRIES};
use roomgate_core::{BusAddress, DeviceId, Error, Result, RoomId};
use roomgate_protocol::{Command, CommandKind, Frame, GatewayNotification};
use roomgate_session::SessionRegistry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, broadcast, watch};
use tracing::{debug, info, warn};

use crate::driver::{AckResult, BusHandle};

/// Static mapping from logical device ids to bus node addresses.
///
/// The bus address is deployment wiring, not something a device
/// announces; it comes from configuration.
#[derive(Debug, Clone, Default)]
pub struct AddressBook {
    entries: HashMap<DeviceId, BusAddress>,
}

impl AddressBook {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, device_id: DeviceId, address: BusAddress) {
        self.entries.insert(device_id, address);
    }

    #[must_use]
    pub fn resolve(&self, device_id: &DeviceId) -> Option<BusAddress> {
        self.entries.get(device_id).copied()
    }

    /// Whether the device is expected on the bus at all.
    #[must_use]
    pub fn knows(&self, device_id: &DeviceId) -> bool {
        self.entries.contains_key(device_id)
    }
}

impl FromIterator<(DeviceId, BusAddress)> for AddressBook {
    fn from_iter<I: IntoIterator<Item = (DeviceId, BusAddress)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Successful dispatch outcome.
///
/// Queueing is a normal result of the offline-delivery design, not an
/// error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Written to the bus and acknowledged (or fired without ack wait on
    /// the urgent path).
    Delivered,
    /// Parked in the device's outbound queue; `depth` is the queue
    /// length after insertion.
    Queued { depth: usize },
}

/// Last acknowledged actuator positions for one room.
///
/// `None` means no acknowledged command has touched that actuator yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoomActuatorState {
    pub door_locked: Option<bool>,
    pub lights_on: Option<bool>,
    pub ac_on: Option<bool>,
    pub outlets_on: Option<bool>,
}

impl RoomActuatorState {
    fn apply(&mut self, kind: &CommandKind) {
        match kind {
            CommandKind::DoorUnlock => self.door_locked = Some(false),
            CommandKind::DoorLock => self.door_locked = Some(true),
            CommandKind::LightsOn => self.lights_on = Some(true),
            CommandKind::LightsOff => self.lights_on = Some(false),
            CommandKind::AcOn => self.ac_on = Some(true),
            CommandKind::AcOff => self.ac_on = Some(false),
            CommandKind::OutletsOn => self.outlets_on = Some(true),
            CommandKind::OutletsOff => self.outlets_on = Some(false),
            CommandKind::Buzzer { .. } | CommandKind::DisplayText { .. } => {}
        }
    }
}

/// Routes commands between the session registry and the bus driver.
#[derive(Debug)]
pub struct CommandDispatcher {
    registry: Arc<SessionRegistry>,
    bus: BusHandle,
    addresses: AddressBook,
    ack_timeout: Duration,
    max_retries: u32,
    actuators: RwLock<HashMap<RoomId, RoomActuatorState>>,
}

impl CommandDispatcher {
    /// Dispatcher with the default ack timeout and retry bound.
    #[must_use]
    pub fn new(registry: Arc<SessionRegistry>, bus: BusHandle, addresses: AddressBook) -> Self {
        Self {
            registry,
            bus,
            addresses,
            ack_timeout: ACK_TIMEOUT,
            max_retries: MAX_DELIVERY_RETRIES,
            actuators: RwLock::new(HashMap::new()),
        }
    }

    /// Override delivery timing, mainly for tests.
    #[must_use]
    pub fn with_timing(mut self, ack_timeout: Duration, max_retries: u32) -> Self {
        self.ack_timeout = ack_timeout;
        self.max_retries = max_retries;
        self
    }

    /// Dispatch a command to its device.
    ///
    /// A connected session gets direct bus delivery; a session in
    /// timeout gets the command queued. Delivery failure is reported,
    /// not silently queued ([`submit_or_queue`](Self::submit_or_queue)
    /// opts in to that).
    ///
    /// # Errors
    /// `Error::UnknownDevice` when no session exists for the target,
    /// `Error::DeliveryFailed` when the retry bound is exhausted.
    pub async fn submit(&self, command: Command) -> Result<DispatchOutcome> {
        match self.registry.lookup(&command.target).await {
            Some(session) if session.is_connected() => {
                self.deliver(command).await?;
                Ok(DispatchOutcome::Delivered)
            }
            Some(_) => {
                let depth = self.registry.queue_command(command, false).await;
                Ok(DispatchOutcome::Queued { depth })
            }
            None => Err(Error::UnknownDevice {
                device_id: command.target.to_string(),
            }),
        }
    }

    /// Dispatch a command, falling back to the queue on failure.
    ///
    /// Also accepts devices with no session at all, provided the address
    /// book expects them on the bus; their commands park until the
    /// device first registers.
    ///
    /// # Errors
    /// `Error::UnknownDevice` when the device has no session and is not
    /// in the address book.
    pub async fn submit_or_queue(&self, command: Command) -> Result<DispatchOutcome> {
        match self.registry.lookup(&command.target).await {
            Some(session) if session.is_connected() => match self.deliver(command.clone()).await {
                Ok(()) => Ok(DispatchOutcome::Delivered),
                Err(Error::DeliveryFailed { .. }) => {
                    debug!(device_id = %command.target, command = %command.kind,
                           "delivery failed, parking in queue");
                    let depth = self.registry.queue_command(command, false).await;
                    Ok(DispatchOutcome::Queued { depth })
                }
                Err(e) => Err(e),
            },
            Some(_) => {
                let depth = self.registry.queue_command(command, false).await;
                Ok(DispatchOutcome::Queued { depth })
            }
            None if self.addresses.knows(&command.target) => {
                let depth = self.registry.queue_command(command, false).await;
                Ok(DispatchOutcome::Queued { depth })
            }
            None => Err(Error::UnknownDevice {
                device_id: command.target.to_string(),
            }),
        }
    }

    /// Fire a command without blocking on acknowledgment.
    ///
    /// The emergency path: connected devices get an immediate bus write
    /// with no ack wait, offline devices get the command at the head of
    /// their queue. Never refuses a device outright.
    ///
    /// # Errors
    /// Only fails when the command cannot be encoded or the bus driver
    /// has stopped.
    pub async fn submit_urgent(&self, command: Command) -> Result<DispatchOutcome> {
        let connected = self
            .registry
            .lookup(&command.target)
            .await
            .is_some_and(|s| s.is_connected());

        if connected {
            if let Some(address) = self.addresses.resolve(&command.target) {
                let frame = Frame::new(address, command.kind.frame_kind(), command.wire_payload()?)?;
                self.bus.write(frame).await?;
                return Ok(DispatchOutcome::Delivered);
            }
            warn!(device_id = %command.target, "connected device has no bus address, queueing urgent command");
        }

        let depth = self.registry.queue_command(command, true).await;
        Ok(DispatchOutcome::Queued { depth })
    }

    /// Deliver every queued command for a device, in order.
    ///
    /// On the first failure the failed command and the remainder go back
    /// into the queue in their original order. Returns the number
    /// delivered.
    pub async fn flush_device(&self, device_id: &DeviceId) -> usize {
        let commands = self.registry.drain_queue(device_id).await;
        if commands.is_empty() {
            return 0;
        }
        info!(device_id = %device_id, count = commands.len(), "flushing outbound queue");

        let mut delivered = 0;
        let mut pending = commands.into_iter();
        for command in pending.by_ref() {
            match self.deliver(command.clone()).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(device_id = %device_id, command = %command.kind, error = %e,
                          "queued delivery failed, re-parking remainder");
                    self.registry.queue_command(command, false).await;
                    break;
                }
            }
        }
        for command in pending {
            self.registry.queue_command(command, false).await;
        }
        delivered
    }

    /// React to connection notifications by flushing queues.
    ///
    /// Runs until `shutdown` flips to `true` or the registry is dropped.
    pub async fn run_flusher(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut events = self.registry.subscribe();
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(GatewayNotification::DeviceConnected { device_id })
                    | Ok(GatewayNotification::DeviceReconnected { device_id }) => {
                        self.flush_device(&device_id).await;
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "flusher lagged behind notifications");
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                },
                result = shutdown.changed() => {
                    if result.is_err() || *shutdown.borrow() {
                        debug!("queue flusher stopping");
                        return;
                    }
                }
            }
        }
    }

    /// Acknowledged actuator positions for a room.
    pub async fn actuator_state(&self, room_id: &RoomId) -> RoomActuatorState {
        self.actuators
            .read()
            .await
            .get(room_id)
            .copied()
            .unwrap_or_default()
    }

    /// One bus write with ack wait, retried up to the bound.
    async fn deliver(&self, mut command: Command) -> Result<()> {
        let address =
            self.addresses
                .resolve(&command.target)
                .ok_or_else(|| Error::UnknownDevice {
                    device_id: command.target.to_string(),
                })?;
        let frame = Frame::new(address, command.kind.frame_kind(), command.wire_payload()?)?;

        let max_attempts = 1 + self.max_retries;
        while command.attempts < max_attempts {
            command.record_attempt();
            let result = self
                .bus
                .write_and_wait_ack(
                    frame.clone(),
                    command.target.clone(),
                    command.kind.clone(),
                    self.ack_timeout,
                )
                .await?;
            match result {
                AckResult::Acked { ok: true } => {
                    debug!(device_id = %command.target, command = %command.kind,
                           attempts = command.attempts, "command acknowledged");
                    self.reconcile(&command).await;
                    return Ok(());
                }
                AckResult::Acked { ok: false } => {
                    // The peripheral refused; retrying the same command
                    // will not change its mind.
                    warn!(device_id = %command.target, command = %command.kind,
                          "command refused by device");
                    break;
                }
                AckResult::TimedOut => {
                    debug!(device_id = %command.target, command = %command.kind,
                           attempt = command.attempts, "ack timeout");
                }
            }
        }

        Err(Error::DeliveryFailed {
            device_id: command.target.to_string(),
            attempts: command.attempts,
        })
    }

    async fn reconcile(&self, command: &Command) {
        let Some(session) = self.registry.lookup(&command.target).await else {
            return;
        };
        let Some(room_id) = session.room_id else {
            return;
        };
        let mut actuators = self.actuators.write().await;
        actuators.entry(room_id).or_default().apply(&command.kind);
    }
}
