//! Shared harness for the booking integration tests.
//!
//! Wires a loopback bus, driver, registry and dispatcher around a
//! memory store so tests exercise the controller exactly as the gateway
//! binary does, minus the sockets.

use chrono::{DateTime, Duration, Utc};
use roomgate_booking::{
    Booking, BookingStore, EmergencyCoordinator, MemoryBookingStore, RoomController,
    RoomDirectory, RoomPlan,
};
use roomgate_core::{BusAddress, DeviceId, DeviceRole, QrSecret, RoomId};
use roomgate_dispatch::{AddressBook, BusDriver, CommandDispatcher, LoopbackBus, LoopbackHandle};
use roomgate_session::SessionRegistry;
use std::sync::Arc;
use tokio::sync::mpsc;

pub const ROOM: &str = "atlantis";
pub const SECRET: &str = "s3cret";

pub fn device(id: &str) -> DeviceId {
    DeviceId::new(id).unwrap()
}

pub fn room(id: &str) -> RoomId {
    RoomId::new(id).unwrap()
}

/// The six peripherals of the test room, with their bus addresses.
fn wiring() -> [(&'static str, char); 6] {
    [
        ("door-1", 'D'),
        ("lights-1", 'L'),
        ("ac-1", 'A'),
        ("outlets-1", 'O'),
        ("display-1", 'S'),
        ("buzzer-1", 'B'),
    ]
}

fn directory() -> RoomDirectory {
    [RoomPlan {
        room_id: room(ROOM),
        door: device("door-1"),
        lights: device("lights-1"),
        ac: device("ac-1"),
        outlets: device("outlets-1"),
        display: device("display-1"),
        buzzer: device("buzzer-1"),
    }]
    .into_iter()
    .collect()
}

pub struct Harness {
    pub registry: Arc<SessionRegistry>,
    pub store: Arc<MemoryBookingStore>,
    pub controller: RoomController<MemoryBookingStore>,
    pub emergency: EmergencyCoordinator<MemoryBookingStore>,
    pub loopback: LoopbackHandle,
}

pub fn harness() -> Harness {
    let (bus, loopback) = LoopbackBus::new();
    let (driver, handle, _events) = BusDriver::new(bus, BusAddress::new('G').unwrap());
    tokio::spawn(driver.run());

    let addresses: AddressBook = wiring()
        .into_iter()
        .map(|(id, c)| (device(id), BusAddress::new(c).unwrap()))
        .collect();

    let registry = Arc::new(SessionRegistry::new());
    let dispatcher = Arc::new(
        CommandDispatcher::new(registry.clone(), handle, addresses)
            .with_timing(std::time::Duration::from_millis(50), 1),
    );
    let store = Arc::new(MemoryBookingStore::new());

    Harness {
        registry: registry.clone(),
        store: store.clone(),
        controller: RoomController::new(store.clone(), dispatcher.clone(), directory()),
        emergency: EmergencyCoordinator::new(store, dispatcher, registry, directory()),
        loopback,
    }
}

impl Harness {
    /// Register a peripheral so the dispatcher sees it as connected.
    /// Returns the receiver so the caller controls the channel lifetime.
    pub async fn connect(&self, id: &str) -> mpsc::Receiver<roomgate_protocol::ServerMessage> {
        let (tx, rx) = mpsc::channel(8);
        self.registry
            .register(device(id), DeviceRole::SensorInput, Some(room(ROOM)), tx)
            .await;
        rx
    }

    /// Command names currently parked for a device, draining the queue.
    pub async fn parked(&self, id: &str) -> Vec<&'static str> {
        self.registry
            .drain_queue(&device(id))
            .await
            .iter()
            .map(|c| c.kind.name())
            .collect()
    }

    /// Create a booking and return the scannable credential for it.
    pub async fn seed_booking(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        status: roomgate_booking::BookingStatus,
    ) -> (Booking, String) {
        let mut booking = Booking::new(room(ROOM), start, end, QrSecret::new(SECRET)).unwrap();
        if status != roomgate_booking::BookingStatus::Pending {
            booking.transition(status).unwrap();
        }
        self.store.create(booking.clone()).await.unwrap();
        let credential = format!("{}:{SECRET}", booking.id);
        (booking, credential)
    }
}

/// Build the `COMMAND_ACK` frame a peripheral would write back.
pub fn ack(device_id: &str, command: &str, ok: bool) -> roomgate_protocol::Frame {
    let payload = roomgate_protocol::AckPayload {
        device_id: device(device_id),
        command: command.to_string(),
        ok,
    }
    .to_json()
    .unwrap();
    roomgate_protocol::Frame::new(
        BusAddress::new('G').unwrap(),
        roomgate_protocol::FrameKind::CommandAck,
        payload,
    )
    .unwrap()
}

/// A booking running from five minutes ago until an hour from now.
pub fn current_slot() -> (DateTime<Utc>, DateTime<Utc>) {
    let now = Utc::now();
    (now - Duration::minutes(5), now + Duration::minutes(55))
}
