//! Device session registry.
//!
//! The registry is the single bookkeeping authority for every connected
//! peripheral: identity, role, owning room, liveness, connection handle
//! and per-device outbound queue. It replaces the ambient "global map of
//! sockets" pattern with an explicit object whose mutations are
//! linearized behind one lock, so lifecycle and locking discipline are
//! visible at the call site.
//!
//! # Connection epochs
//!
//! Every registration is assigned a monotonically increasing epoch.
//! Operations arriving from a connection carry its epoch and are ignored
//! when the session has since been replaced: a heartbeat from a stale
//! socket can never revive or tear down the session of its successor,
//! and queued commands are delivered at most once per epoch.
//!
//! # Notifications
//!
//! Lifecycle changes are emitted on a broadcast channel as
//! [`GatewayNotification`] values: `device_connected`,
//! `device_reconnected`, `device_disconnected`, `device_timeout`. The
//! emergency coordinator shares the same channel for its broadcasts.

use chrono::{DateTime, Duration, Utc};
use roomgate_core::{DeviceId, DeviceRole, Error, Result, RoomId, SessionState};
use roomgate_protocol::{Command, GatewayNotification, ServerMessage};
use std::collections::HashMap;
use tokio::sync::{RwLock, broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::queue::OutboundQueue;

/// Connection epoch, unique per registration.
pub type Epoch = u64;

/// Capacity of the notification broadcast channel.
const NOTIFICATION_CAPACITY: usize = 64;

/// Outbound half of one socket connection.
///
/// Owned exclusively by the registry; dropping it closes the
/// connection's outbound pump.
#[derive(Debug)]
pub struct ConnectionHandle {
    sender: mpsc::Sender<ServerMessage>,
    epoch: Epoch,
}

impl ConnectionHandle {
    /// The epoch this handle belongs to.
    #[must_use]
    pub fn epoch(&self) -> Epoch {
        self.epoch
    }
}

/// One tracked session (registry-internal representation).
#[derive(Debug)]
struct DeviceSession {
    role: DeviceRole,
    room_id: Option<RoomId>,
    handle: ConnectionHandle,
    last_heartbeat: DateTime<Utc>,
    state: SessionState,
    queue: OutboundQueue,
}

/// Read-only view of a session, served from a consistent snapshot.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub device_id: DeviceId,
    pub role: DeviceRole,
    pub room_id: Option<RoomId>,
    pub state: SessionState,
    pub epoch: Epoch,
    pub last_heartbeat: DateTime<Utc>,
    pub queued: usize,
}

impl SessionSnapshot {
    /// Whether commands can currently be written to the bus for this
    /// device.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }
}

#[derive(Debug, Default)]
struct Inner {
    sessions: HashMap<DeviceId, DeviceSession>,
    /// Queues for devices that currently have no session. Merged back
    /// into the session on registration.
    parked: HashMap<DeviceId, OutboundQueue>,
    next_epoch: Epoch,
}

/// Registry of all connected device sessions.
///
/// All mutations go through the write lock (single-writer semantics);
/// reads are served from snapshots under a brief shared lock.
#[derive(Debug)]
pub struct SessionRegistry {
    inner: RwLock<Inner>,
    notifications: broadcast::Sender<GatewayNotification>,
}

impl SessionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Self {
            inner: RwLock::new(Inner::default()),
            notifications,
        }
    }

    /// Subscribe to lifecycle and emergency notifications.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayNotification> {
        self.notifications.subscribe()
    }

    /// Broadcast a notification to all observers.
    ///
    /// Lagging or absent observers are not an error.
    pub fn broadcast(&self, notification: GatewayNotification) {
        let _ = self.notifications.send(notification);
    }

    /// Register a device, replacing any existing session for the same id.
    ///
    /// The prior connection handle, if live, is closed by dropping it;
    /// its undelivered queue survives into the new session. Emits
    /// `device_reconnected` when a prior session existed, otherwise
    /// `device_connected`.
    ///
    /// Returns the new connection epoch.
    pub async fn register(
        &self,
        device_id: DeviceId,
        role: DeviceRole,
        room_id: Option<RoomId>,
        sender: mpsc::Sender<ServerMessage>,
    ) -> Epoch {
        let mut inner = self.inner.write().await;
        inner.next_epoch += 1;
        let epoch = inner.next_epoch;

        let prior = inner.sessions.remove(&device_id);
        let reconnect = prior.is_some();

        // Undelivered commands carry over: from the replaced session if
        // one existed, otherwise from the parked queue of an offline
        // device.
        let queue = match prior {
            Some(old) => {
                debug!(device_id = %device_id, old_epoch = old.handle.epoch, "closing prior connection handle");
                old.queue
            }
            None => inner.parked.remove(&device_id).unwrap_or_default(),
        };

        inner.sessions.insert(
            device_id.clone(),
            DeviceSession {
                role,
                room_id,
                handle: ConnectionHandle { sender, epoch },
                last_heartbeat: Utc::now(),
                state: SessionState::Connected,
                queue,
            },
        );
        drop(inner);

        if reconnect {
            info!(device_id = %device_id, epoch, "device reconnected");
            self.broadcast(GatewayNotification::DeviceReconnected {
                device_id: device_id.clone(),
            });
        } else {
            info!(device_id = %device_id, epoch, "device connected");
            self.broadcast(GatewayNotification::DeviceConnected {
                device_id: device_id.clone(),
            });
        }

        epoch
    }

    /// Record liveness for a device: a heartbeat or any inbound frame.
    ///
    /// Updates `last_heartbeat` and revives a timed-out session, provided
    /// the epoch still matches the current connection. Returns `false`
    /// for unknown devices or stale epochs.
    pub async fn touch(&self, device_id: &DeviceId, epoch: Epoch) -> bool {
        let mut inner = self.inner.write().await;
        let Some(session) = inner.sessions.get_mut(device_id) else {
            return false;
        };
        if session.handle.epoch != epoch {
            debug!(device_id = %device_id, epoch, current = session.handle.epoch, "ignoring touch from stale connection");
            return false;
        }

        session.last_heartbeat = Utc::now();
        if session.state == SessionState::Timeout {
            info!(device_id = %device_id, "session revived by heartbeat");
            session.state = SessionState::Connected;
            // Observers (the queue flusher in particular) treat a revive
            // like any other return to connectivity.
            self.broadcast(GatewayNotification::DeviceReconnected {
                device_id: device_id.clone(),
            });
        }
        true
    }

    /// Look up a session snapshot.
    pub async fn lookup(&self, device_id: &DeviceId) -> Option<SessionSnapshot> {
        let inner = self.inner.read().await;
        inner
            .sessions
            .get(device_id)
            .map(|s| snapshot(device_id, s))
    }

    /// All sessions belonging to a room.
    pub async fn list_by_room(&self, room_id: &RoomId) -> Vec<SessionSnapshot> {
        let inner = self.inner.read().await;
        inner
            .sessions
            .iter()
            .filter(|(_, s)| s.room_id.as_ref() == Some(room_id))
            .map(|(id, s)| snapshot(id, s))
            .collect()
    }

    /// Snapshots of every tracked session.
    pub async fn list_all(&self) -> Vec<SessionSnapshot> {
        let inner = self.inner.read().await;
        inner
            .sessions
            .iter()
            .map(|(id, s)| snapshot(id, s))
            .collect()
    }

    /// Assign the owning room for a device.
    ///
    /// A session's room is set at most once per connection lifetime and
    /// immutable thereafter; re-announcing the same room is a no-op.
    ///
    /// # Errors
    /// Returns `Error::SessionNotFound` for unknown devices and
    /// `Error::RoomAlreadyAssigned` when a different room is already set.
    pub async fn set_room(&self, device_id: &DeviceId, room_id: RoomId) -> Result<()> {
        let mut inner = self.inner.write().await;
        let session = inner
            .sessions
            .get_mut(device_id)
            .ok_or_else(|| Error::SessionNotFound {
                device_id: device_id.to_string(),
            })?;

        match &session.room_id {
            None => {
                session.room_id = Some(room_id);
                Ok(())
            }
            Some(existing) if *existing == room_id => Ok(()),
            Some(_) => Err(Error::RoomAlreadyAssigned {
                device_id: device_id.to_string(),
            }),
        }
    }

    /// Remove a session on disconnect, emitting `device_disconnected`.
    ///
    /// Only removes when the epoch matches the current connection, so a
    /// replaced connection's teardown cannot destroy its successor.
    /// Undelivered commands are parked for the next registration.
    pub async fn remove(&self, device_id: &DeviceId, epoch: Epoch) -> bool {
        let mut inner = self.inner.write().await;
        match inner.sessions.get(device_id) {
            Some(session) if session.handle.epoch == epoch => {}
            Some(_) => {
                debug!(device_id = %device_id, epoch, "ignoring removal from stale connection");
                return false;
            }
            None => return false,
        }

        let Some(session) = inner.sessions.remove(device_id) else {
            return false;
        };
        if !session.queue.is_empty() {
            inner.parked.insert(device_id.clone(), session.queue);
        }
        drop(inner);

        info!(device_id = %device_id, "device disconnected");
        self.broadcast(GatewayNotification::DeviceDisconnected {
            device_id: device_id.clone(),
        });
        true
    }

    /// Reclassify connected sessions whose heartbeat is older than
    /// `timeout` and emit `device_timeout` for each.
    ///
    /// Never closes connections: timeout is a liveness signal, not a
    /// termination decision.
    pub async fn sweep_timeouts(&self, timeout: Duration) -> Vec<DeviceId> {
        let now = Utc::now();
        let mut timed_out = Vec::new();

        {
            let mut inner = self.inner.write().await;
            for (id, session) in &mut inner.sessions {
                if session.state == SessionState::Connected
                    && now - session.last_heartbeat > timeout
                {
                    session.state = SessionState::Timeout;
                    timed_out.push(id.clone());
                }
            }
        }

        for device_id in &timed_out {
            warn!(device_id = %device_id, "session timed out");
            self.broadcast(GatewayNotification::DeviceTimeout {
                device_id: device_id.clone(),
            });
        }
        timed_out
    }

    /// Park a command in the device's outbound queue.
    ///
    /// Works for sessions in any state and for devices with no session
    /// at all. Returns the queue length after insertion.
    pub async fn queue_command(&self, command: Command, priority: bool) -> usize {
        let mut inner = self.inner.write().await;
        let device_id = command.target.clone();
        let queue = match inner.sessions.get_mut(&device_id) {
            Some(session) => &mut session.queue,
            None => inner.parked.entry(device_id).or_default(),
        };
        if priority {
            queue.push_front(command);
        } else {
            queue.push_back(command);
        }
        queue.len()
    }

    /// Drain the device's queue in FIFO order for delivery.
    ///
    /// Called on (re)connect; the caller owns delivery of the returned
    /// commands, guaranteeing at-most-once per connection epoch.
    pub async fn drain_queue(&self, device_id: &DeviceId) -> Vec<Command> {
        let mut inner = self.inner.write().await;
        if let Some(session) = inner.sessions.get_mut(device_id) {
            session.queue.drain()
        } else if let Some(mut queue) = inner.parked.remove(device_id) {
            queue.drain()
        } else {
            Vec::new()
        }
    }

    /// Send a message over a session's socket.
    ///
    /// # Errors
    /// Returns `Error::SessionNotFound` when the device is unknown or
    /// its outbound channel has closed.
    pub async fn send_to(&self, device_id: &DeviceId, message: ServerMessage) -> Result<()> {
        let sender = {
            let inner = self.inner.read().await;
            inner
                .sessions
                .get(device_id)
                .map(|s| s.handle.sender.clone())
                .ok_or_else(|| Error::SessionNotFound {
                    device_id: device_id.to_string(),
                })?
        };
        sender
            .send(message)
            .await
            .map_err(|_| Error::SessionNotFound {
                device_id: device_id.to_string(),
            })
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn snapshot(device_id: &DeviceId, session: &DeviceSession) -> SessionSnapshot {
    SessionSnapshot {
        device_id: device_id.clone(),
        role: session.role,
        room_id: session.room_id.clone(),
        state: session.state,
        epoch: session.handle.epoch,
        last_heartbeat: session.last_heartbeat,
        queued: session.queue.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roomgate_protocol::CommandKind;

    fn device(id: &str) -> DeviceId {
        DeviceId::new(id).unwrap()
    }

    fn room(id: &str) -> RoomId {
        RoomId::new(id).unwrap()
    }

    fn outbound() -> mpsc::Sender<ServerMessage> {
        mpsc::channel(8).0
    }

    #[tokio::test]
    async fn test_register_emits_connected_then_reconnected() {
        let registry = SessionRegistry::new();
        let mut events = registry.subscribe();

        let first = registry
            .register(device("rfid-1"), DeviceRole::SensorInput, None, outbound())
            .await;
        assert!(matches!(
            events.recv().await.unwrap(),
            GatewayNotification::DeviceConnected { .. }
        ));

        let second = registry
            .register(device("rfid-1"), DeviceRole::SensorInput, None, outbound())
            .await;
        assert!(second > first);
        assert!(matches!(
            events.recv().await.unwrap(),
            GatewayNotification::DeviceReconnected { .. }
        ));

        // Still exactly one session for the id.
        assert_eq!(registry.list_all().await.len(), 1);
        let snap = registry.lookup(&device("rfid-1")).await.unwrap();
        assert_eq!(snap.epoch, second);
    }

    #[tokio::test]
    async fn test_register_closes_prior_handle() {
        let registry = SessionRegistry::new();
        let (tx, mut rx) = mpsc::channel(8);

        registry
            .register(device("rfid-1"), DeviceRole::SensorInput, None, tx)
            .await;
        registry
            .register(device("rfid-1"), DeviceRole::SensorInput, None, outbound())
            .await;

        // The first connection's sender was dropped by the registry, so
        // its outbound pump observes channel closure.
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_touch_revives_timeout_same_epoch_only() {
        let registry = SessionRegistry::new();
        let epoch = registry
            .register(device("d"), DeviceRole::Display, None, outbound())
            .await;

        // Force timeout via a zero-tolerance sweep.
        let swept = registry.sweep_timeouts(Duration::seconds(-1)).await;
        assert_eq!(swept, vec![device("d")]);
        assert_eq!(
            registry.lookup(&device("d")).await.unwrap().state,
            SessionState::Timeout
        );

        // Stale epoch cannot revive.
        assert!(!registry.touch(&device("d"), epoch + 1).await);
        assert_eq!(
            registry.lookup(&device("d")).await.unwrap().state,
            SessionState::Timeout
        );

        // Current epoch revives.
        assert!(registry.touch(&device("d"), epoch).await);
        assert_eq!(
            registry.lookup(&device("d")).await.unwrap().state,
            SessionState::Connected
        );
    }

    #[tokio::test]
    async fn test_revive_broadcasts_reconnected() {
        let registry = SessionRegistry::new();
        let epoch = registry
            .register(device("d"), DeviceRole::Display, None, outbound())
            .await;
        registry.sweep_timeouts(Duration::seconds(-1)).await;

        let mut events = registry.subscribe();
        assert!(registry.touch(&device("d"), epoch).await);

        // The revive is announced so queue flushing can react to it.
        assert!(matches!(
            events.recv().await.unwrap(),
            GatewayNotification::DeviceReconnected { device_id } if device_id == device("d")
        ));
    }

    #[tokio::test]
    async fn test_sweep_ignores_fresh_sessions() {
        let registry = SessionRegistry::new();
        registry
            .register(device("d"), DeviceRole::Display, None, outbound())
            .await;
        let swept = registry.sweep_timeouts(Duration::seconds(60)).await;
        assert!(swept.is_empty());
    }

    #[tokio::test]
    async fn test_room_set_once() {
        let registry = SessionRegistry::new();
        registry
            .register(device("d"), DeviceRole::SensorInput, None, outbound())
            .await;

        registry.set_room(&device("d"), room("atlantis")).await.unwrap();
        // Idempotent re-announce is fine.
        registry.set_room(&device("d"), room("atlantis")).await.unwrap();
        // A different room is not.
        let result = registry.set_room(&device("d"), room("nautilus")).await;
        assert!(matches!(result, Err(Error::RoomAlreadyAssigned { .. })));
    }

    #[tokio::test]
    async fn test_list_by_room() {
        let registry = SessionRegistry::new();
        registry
            .register(
                device("rfid-1"),
                DeviceRole::SensorInput,
                Some(room("atlantis")),
                outbound(),
            )
            .await;
        registry
            .register(
                device("display-1"),
                DeviceRole::Display,
                Some(room("atlantis")),
                outbound(),
            )
            .await;
        registry
            .register(
                device("rfid-2"),
                DeviceRole::SensorInput,
                Some(room("nautilus")),
                outbound(),
            )
            .await;

        let sessions = registry.list_by_room(&room("atlantis")).await;
        assert_eq!(sessions.len(), 2);
    }

    #[tokio::test]
    async fn test_remove_requires_matching_epoch() {
        let registry = SessionRegistry::new();
        let old_epoch = registry
            .register(device("d"), DeviceRole::Display, None, outbound())
            .await;
        let new_epoch = registry
            .register(device("d"), DeviceRole::Display, None, outbound())
            .await;

        // The replaced connection's teardown must not remove the new session.
        assert!(!registry.remove(&device("d"), old_epoch).await);
        assert!(registry.lookup(&device("d")).await.is_some());

        assert!(registry.remove(&device("d"), new_epoch).await);
        assert!(registry.lookup(&device("d")).await.is_none());
    }

    #[tokio::test]
    async fn test_queue_survives_disconnect_and_reconnect() {
        let registry = SessionRegistry::new();
        let epoch = registry
            .register(device("door-1"), DeviceRole::SensorInput, None, outbound())
            .await;

        registry
            .queue_command(
                Command::new(device("door-1"), CommandKind::DoorUnlock),
                false,
            )
            .await;
        registry
            .queue_command(Command::new(device("door-1"), CommandKind::LightsOn), false)
            .await;

        registry.remove(&device("door-1"), epoch).await;

        // Queue persisted while offline; more commands park too.
        registry
            .queue_command(Command::new(device("door-1"), CommandKind::AcOn), false)
            .await;

        registry
            .register(device("door-1"), DeviceRole::SensorInput, None, outbound())
            .await;
        let drained = registry.drain_queue(&device("door-1")).await;
        let kinds: Vec<_> = drained.iter().map(|c| c.kind.name()).collect();
        assert_eq!(kinds, vec!["door_unlock", "lights_on", "ac_on"]);

        // Exactly once: a second drain yields nothing.
        assert!(registry.drain_queue(&device("door-1")).await.is_empty());
    }

    #[tokio::test]
    async fn test_priority_command_queued_at_head() {
        let registry = SessionRegistry::new();
        registry
            .queue_command(Command::new(device("door-1"), CommandKind::LightsOn), false)
            .await;
        registry
            .queue_command(
                Command::new(device("door-1"), CommandKind::DoorUnlock),
                true,
            )
            .await;

        let drained = registry.drain_queue(&device("door-1")).await;
        let kinds: Vec<_> = drained.iter().map(|c| c.kind.name()).collect();
        assert_eq!(kinds, vec!["door_unlock", "lights_on"]);
    }

    #[tokio::test]
    async fn test_send_to_unknown_device() {
        let registry = SessionRegistry::new();
        let result = registry
            .send_to(&device("ghost"), ServerMessage::CommandSent)
            .await;
        assert!(matches!(result, Err(Error::SessionNotFound { .. })));
    }
}
