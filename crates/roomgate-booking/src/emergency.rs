//! Emergency coordinator.
//!
//! The emergency path must make the room safe to leave no matter what
//! else is going on: door unlocked, airflow stopped, alarm sounding,
//! display shouting. Commands go out fire-and-forget through the urgent
//! dispatcher path and every failure is logged rather than propagated;
//! the coordinator's own bookkeeping always completes. Lights are
//! deliberately left as they are so the room stays lit during an
//! evacuation.

use roomgate_core::RoomId;
use roomgate_dispatch::CommandDispatcher;
use roomgate_protocol::{BuzzerPattern, Command, CommandKind, GatewayNotification};
use roomgate_session::SessionRegistry;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::booking::BookingStatus;
use crate::rooms::RoomDirectory;
use crate::store::BookingStore;

/// Display text during an emergency.
pub const DISPLAY_EMERGENCY: &str = "EMERGENCY";

#[derive(Debug)]
pub struct EmergencyCoordinator<S> {
    store: Arc<S>,
    dispatcher: Arc<CommandDispatcher>,
    registry: Arc<SessionRegistry>,
    rooms: RoomDirectory,
}

impl<S: BookingStore> EmergencyCoordinator<S> {
    #[must_use]
    pub fn new(
        store: Arc<S>,
        dispatcher: Arc<CommandDispatcher>,
        registry: Arc<SessionRegistry>,
        rooms: RoomDirectory,
    ) -> Self {
        Self {
            store,
            dispatcher,
            registry,
            rooms,
        }
    }

    /// Put a room into emergency state.
    ///
    /// Unconditional: runs regardless of booking state, device liveness
    /// or earlier failures, and never returns an error. Active bookings
    /// for the room are cancelled without the normal completion
    /// sequence, which would lock the door again.
    pub async fn trigger(&self, room_id: &RoomId, reason: &str) {
        error!(room_id = %room_id, reason, "EMERGENCY triggered");

        if let Some(plan) = self.rooms.get(room_id) {
            self.fire(&plan.door, CommandKind::DoorUnlock).await;
            self.fire(&plan.ac, CommandKind::AcOff).await;
            self.fire(
                &plan.buzzer,
                CommandKind::Buzzer {
                    pattern: BuzzerPattern::Emergency,
                },
            )
            .await;
            self.fire(
                &plan.display,
                CommandKind::DisplayText {
                    text: DISPLAY_EMERGENCY.to_string(),
                },
            )
            .await;
        } else {
            warn!(room_id = %room_id, "emergency in a room with no device plan");
        }

        self.cancel_active_bookings(room_id).await;

        self.registry
            .broadcast(GatewayNotification::EmergencyTriggered {
                room_id: room_id.clone(),
                reason: reason.to_string(),
            });
    }

    async fn cancel_active_bookings(&self, room_id: &RoomId) {
        let active = match self.store.by_room(room_id, BookingStatus::Active).await {
            Ok(active) => active,
            Err(e) => {
                warn!(error = %e, "could not query active bookings during emergency");
                return;
            }
        };

        for mut booking in active {
            if let Err(e) = booking.transition(BookingStatus::Cancelled) {
                warn!(booking_id = %booking.id, error = %e, "emergency cancel transition failed");
                continue;
            }
            match self.store.update(booking.clone()).await {
                Ok(()) => {
                    info!(booking_id = %booking.id, "booking cancelled by emergency");
                }
                Err(e) => {
                    warn!(booking_id = %booking.id, error = %e, "emergency cancel not persisted");
                }
            }
        }
    }

    async fn fire(&self, target: &roomgate_core::DeviceId, kind: CommandKind) {
        let command = Command::new(target.clone(), kind);
        if let Err(e) = self.dispatcher.submit_urgent(command).await {
            warn!(device_id = %target, error = %e, "emergency command not dispatched");
        }
    }
}
