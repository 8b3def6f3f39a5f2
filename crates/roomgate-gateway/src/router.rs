//! Event routing.
//!
//! The single place where socket traffic meets the booking machine, the
//! emergency coordinator and the dispatcher. Everything is explicit
//! message passing: connection tasks put typed [`GatewayEvent`]s on a
//! channel, this loop consumes them one at a time and calls into the
//! owning component.

use chrono::Utc;
use roomgate_booking::{BookingStore, EmergencyCoordinator, RoomController, ScanOutcome};
use roomgate_dispatch::CommandDispatcher;
use roomgate_network::{GatewayEvent, GatewayEventKind};
use roomgate_protocol::{
    ButtonKind, Command, DeviceEvent, GatewayNotification, ServerMessage,
};
use roomgate_session::SessionRegistry;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

pub struct EventRouter<S> {
    pub registry: Arc<SessionRegistry>,
    pub dispatcher: Arc<CommandDispatcher>,
    pub controller: Arc<RoomController<S>>,
    pub emergency: Arc<EmergencyCoordinator<S>>,
}

impl<S: BookingStore> EventRouter<S> {
    /// Consume gateway events until `shutdown` flips to `true`.
    pub async fn run(
        self,
        mut events: mpsc::Receiver<GatewayEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else {
                        debug!("event channel closed, router stopping");
                        return;
                    };
                    self.route(event).await;
                }
                result = shutdown.changed() => {
                    if result.is_err() || *shutdown.borrow() {
                        debug!("event router stopping");
                        return;
                    }
                }
            }
        }
    }

    async fn route(&self, event: GatewayEvent) {
        match event.kind {
            GatewayEventKind::Device(DeviceEvent::RfidScanned { credential }) => {
                let Some(room_id) = event.room_id else {
                    warn!(device_id = %event.device_id, "scan from a device with no room");
                    return;
                };
                match self
                    .controller
                    .handle_scan(&room_id, &credential, Utc::now())
                    .await
                {
                    Ok(ScanOutcome::Granted { booking_id }) => {
                        info!(room_id = %room_id, booking_id = %booking_id, "scan granted");
                    }
                    Ok(ScanOutcome::Denied { reason }) => {
                        info!(room_id = %room_id, reason = %reason, "scan denied");
                    }
                    Err(e) => warn!(room_id = %room_id, error = %e, "scan handling failed"),
                }
            }
            GatewayEventKind::Device(DeviceEvent::ButtonPressed { button }) => {
                let Some(room_id) = event.room_id else {
                    warn!(device_id = %event.device_id, "button press from a device with no room");
                    return;
                };
                let result = match button {
                    ButtonKind::StartMeeting => self.controller.start_meeting(&room_id).await,
                    ButtonKind::EndMeeting => self.controller.end_meeting(&room_id).await,
                };
                match result {
                    Ok(booking_id) => {
                        info!(room_id = %room_id, booking_id = %booking_id, button = ?button,
                              "button handled");
                    }
                    Err(e) => info!(room_id = %room_id, error = %e, "button press had no effect"),
                }
            }
            GatewayEventKind::Device(DeviceEvent::SensorData { sensor, value }) => {
                // Telemetry only; nothing downstream consumes it yet.
                debug!(device_id = %event.device_id, sensor, value, "sensor reading");
            }
            GatewayEventKind::Device(DeviceEvent::EmergencyButton) => {
                let Some(room_id) = event.room_id else {
                    warn!(device_id = %event.device_id,
                          "emergency button from a device with no room");
                    return;
                };
                self.emergency.trigger(&room_id, "emergency button").await;
            }
            GatewayEventKind::CommandRequest { target, command } => {
                let submission = Command::new(target.clone(), command);
                match self.dispatcher.submit_or_queue(submission).await {
                    Ok(outcome) => {
                        debug!(target = %target, ?outcome, "control-plane command dispatched");
                    }
                    Err(e) => {
                        warn!(target = %target, error = %e, "control-plane command failed");
                        let _ = self
                            .registry
                            .send_to(
                                &event.device_id,
                                ServerMessage::CommandError {
                                    message: e.to_string(),
                                },
                            )
                            .await;
                    }
                }
            }
        }
    }
}

/// Push broadcast notifications to gateway-role observers.
///
/// Lifecycle and emergency notifications fan out to every connected
/// session whose role is `gateway`.
pub async fn run_notifier(registry: Arc<SessionRegistry>, mut shutdown: watch::Receiver<bool>) {
    let mut notifications = registry.subscribe();
    loop {
        tokio::select! {
            notification = notifications.recv() => {
                match notification {
                    Ok(notification) => {
                        push_to_observers(&registry, notification).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "notifier lagged behind notifications");
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
            result = shutdown.changed() => {
                if result.is_err() || *shutdown.borrow() {
                    debug!("notifier stopping");
                    return;
                }
            }
        }
    }
}

async fn push_to_observers(registry: &SessionRegistry, notification: GatewayNotification) {
    for session in registry.list_all().await {
        if !session.role.is_gateway() || !session.is_connected() {
            continue;
        }
        let message = ServerMessage::Notification {
            notification: notification.clone(),
        };
        if let Err(e) = registry.send_to(&session.device_id, message).await {
            debug!(device_id = %session.device_id, error = %e, "observer push failed");
        }
    }
}
