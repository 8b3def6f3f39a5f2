//! Room controller: the booking-driven actuator state machine.
//!
//! Activation and completion are fixed command sequences issued through
//! the dispatcher with queue fallback, so an offline peripheral catches
//! up on reconnect instead of breaking the meeting flow. The booking's
//! status transition always commits before any actuator command goes
//! out; a half-delivered sequence leaves the room physically
//! inconsistent but never the bookkeeping.

use chrono::{DateTime, Utc};
use roomgate_core::constants::BOOKING_SWEEP_PERIOD;
use roomgate_core::{BookingId, Error, Result, RoomId};
use roomgate_dispatch::CommandDispatcher;
use roomgate_protocol::{BuzzerPattern, Command, CommandKind};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::booking::{Booking, BookingStatus};
use crate::credential::{self, CredentialToken, Validation, ValidationRejection};
use crate::rooms::{RoomDirectory, RoomPlan};
use crate::store::BookingStore;

/// Display text while a meeting is running.
pub const DISPLAY_MEETING_ACTIVE: &str = "meeting active";

/// Display text for a free room.
pub const DISPLAY_AVAILABLE: &str = "available";

/// Outcome of one credential scan.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanOutcome {
    /// Meeting started; the activation sequence was issued.
    Granted { booking_id: BookingId },
    /// Scan denied; no actuator command was issued.
    Denied { reason: ValidationRejection },
}

/// Drives room actuators from booking transitions.
#[derive(Debug)]
pub struct RoomController<S> {
    store: Arc<S>,
    dispatcher: Arc<CommandDispatcher>,
    rooms: RoomDirectory,
}

impl<S: BookingStore> RoomController<S> {
    #[must_use]
    pub fn new(store: Arc<S>, dispatcher: Arc<CommandDispatcher>, rooms: RoomDirectory) -> Self {
        Self {
            store,
            dispatcher,
            rooms,
        }
    }

    /// Handle a credential scanned at a room's reader.
    ///
    /// A denied scan issues no actuator commands at all. A malformed
    /// credential counts as an unknown one; the scanner sees the same
    /// denial either way.
    ///
    /// # Errors
    /// Returns an error when the room has no device plan or the store
    /// fails; validation outcomes are never errors.
    pub async fn handle_scan(
        &self,
        room_id: &RoomId,
        credential: &str,
        now: DateTime<Utc>,
    ) -> Result<ScanOutcome> {
        let token = match CredentialToken::parse(credential) {
            Ok(token) => token,
            Err(e) => {
                debug!(room_id = %room_id, error = %e, "malformed credential");
                return Ok(ScanOutcome::Denied {
                    reason: ValidationRejection::NotFound,
                });
            }
        };

        let booking = self.store.get(&token.booking_id).await?;

        // A credential for a different room does not exist as far as
        // this reader is concerned.
        let booking = booking.filter(|b| {
            if &b.room_id == room_id {
                true
            } else {
                warn!(booking_id = %b.id, scanned_at = %room_id, booked_room = %b.room_id,
                      "credential scanned at the wrong room");
                false
            }
        });

        match credential::validate(booking.as_ref(), &token, now) {
            Validation::Granted(booking) => {
                let booking_id = booking.id;
                self.activate(booking).await?;
                Ok(ScanOutcome::Granted { booking_id })
            }
            Validation::Rejected(reason) => {
                info!(room_id = %room_id, reason = %reason, "scan denied");
                Ok(ScanOutcome::Denied { reason })
            }
        }
    }

    /// Explicitly start the next startable booking for a room.
    ///
    /// Used by the start-meeting button, which carries operator intent
    /// rather than a credential; the access window is not re-checked.
    /// When several bookings qualify the earliest start time wins.
    ///
    /// # Errors
    /// Returns `Error::BookingNotFound` when the room has nothing to
    /// start.
    pub async fn start_meeting(&self, room_id: &RoomId) -> Result<BookingId> {
        let mut candidates = self
            .store
            .by_room(room_id, BookingStatus::Confirmed)
            .await?;
        candidates.extend(self.store.by_room(room_id, BookingStatus::Pending).await?);
        candidates.sort_by_key(|b| b.start_time);

        if candidates.len() > 1 {
            warn!(room_id = %room_id, count = candidates.len(),
                  "multiple startable bookings, starting the earliest");
        }
        let booking = candidates
            .into_iter()
            .next()
            .ok_or_else(|| Error::BookingNotFound {
                booking_id: format!("no startable booking for room '{room_id}'"),
            })?;

        let booking_id = booking.id;
        self.activate(booking).await?;
        Ok(booking_id)
    }

    /// End the active meeting in a room.
    ///
    /// # Errors
    /// Returns `Error::BookingNotFound` when no active booking exists.
    pub async fn end_meeting(&self, room_id: &RoomId) -> Result<BookingId> {
        let booking = self
            .store
            .by_room(room_id, BookingStatus::Active)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::BookingNotFound {
                booking_id: format!("no active booking for room '{room_id}'"),
            })?;
        let booking_id = booking.id;
        self.complete(booking).await?;
        Ok(booking_id)
    }

    /// Cancel a booking.
    ///
    /// The completion sequence runs only when the booking was active;
    /// cancelling a pending or confirmed booking touches no actuator.
    ///
    /// # Errors
    /// Returns `Error::BookingNotFound` or `Error::InvalidStateTransition`.
    pub async fn cancel(&self, booking_id: &BookingId) -> Result<()> {
        let mut booking =
            self.store
                .get(booking_id)
                .await?
                .ok_or_else(|| Error::BookingNotFound {
                    booking_id: booking_id.to_string(),
                })?;
        let was_active = booking.status == BookingStatus::Active;
        booking.transition(BookingStatus::Cancelled)?;
        self.store.update(booking.clone()).await?;
        info!(booking_id = %booking.id, room_id = %booking.room_id, "booking cancelled");

        if was_active {
            let plan = self.plan_for(&booking.room_id)?;
            self.completion_sequence(&plan).await;
        }
        Ok(())
    }

    /// Complete every active booking whose end time has passed.
    ///
    /// Returns the number of bookings completed.
    pub async fn sweep(&self, now: DateTime<Utc>) -> usize {
        let active = match self.store.active().await {
            Ok(active) => active,
            Err(e) => {
                warn!(error = %e, "booking sweep could not query the store");
                return 0;
            }
        };

        let mut completed = 0;
        for booking in active {
            if !booking.is_past_end(now) {
                continue;
            }
            debug!(booking_id = %booking.id, room_id = %booking.room_id,
                   "booking past end time, completing");
            match self.complete(booking).await {
                Ok(()) => completed += 1,
                Err(e) => warn!(error = %e, "sweep completion failed"),
            }
        }
        completed
    }

    /// Run the completion sweep until `shutdown` flips to `true`.
    pub async fn run_sweeper(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(BOOKING_SWEEP_PERIOD);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep(Utc::now()).await;
                }
                result = shutdown.changed() => {
                    if result.is_err() || *shutdown.borrow() {
                        debug!("booking sweeper stopping");
                        return;
                    }
                }
            }
        }
    }

    async fn activate(&self, mut booking: Booking) -> Result<()> {
        let plan = self.plan_for(&booking.room_id)?;
        booking.transition(BookingStatus::Active)?;
        self.store.update(booking.clone()).await?;
        info!(booking_id = %booking.id, room_id = %booking.room_id, "meeting started");

        self.issue(&plan.door, CommandKind::DoorUnlock).await;
        self.issue(&plan.lights, CommandKind::LightsOn).await;
        self.issue(&plan.outlets, CommandKind::OutletsOn).await;
        self.issue(
            &plan.display,
            CommandKind::DisplayText {
                text: DISPLAY_MEETING_ACTIVE.to_string(),
            },
        )
        .await;
        self.issue(
            &plan.buzzer,
            CommandKind::Buzzer {
                pattern: BuzzerPattern::Confirm,
            },
        )
        .await;
        Ok(())
    }

    async fn complete(&self, mut booking: Booking) -> Result<()> {
        let plan = self.plan_for(&booking.room_id)?;
        booking.transition(BookingStatus::Completed)?;
        self.store.update(booking.clone()).await?;
        info!(booking_id = %booking.id, room_id = %booking.room_id, "meeting ended");

        self.completion_sequence(&plan).await;
        Ok(())
    }

    async fn completion_sequence(&self, plan: &RoomPlan) {
        self.issue(&plan.door, CommandKind::DoorLock).await;
        self.issue(&plan.lights, CommandKind::LightsOff).await;
        self.issue(&plan.ac, CommandKind::AcOff).await;
        self.issue(&plan.outlets, CommandKind::OutletsOff).await;
        self.issue(
            &plan.display,
            CommandKind::DisplayText {
                text: DISPLAY_AVAILABLE.to_string(),
            },
        )
        .await;
        self.issue(
            &plan.buzzer,
            CommandKind::Buzzer {
                pattern: BuzzerPattern::Goodbye,
            },
        )
        .await;
    }

    /// One sequence step. Failures are logged, not fatal: the rest of
    /// the sequence still runs and queued delivery covers offline
    /// devices.
    async fn issue(&self, target: &roomgate_core::DeviceId, kind: CommandKind) {
        let command = Command::new(target.clone(), kind);
        if let Err(e) = self.dispatcher.submit_or_queue(command).await {
            warn!(device_id = %target, error = %e, "sequence command not dispatched");
        }
    }

    fn plan_for(&self, room_id: &RoomId) -> Result<RoomPlan> {
        self.rooms
            .get(room_id)
            .cloned()
            .ok_or_else(|| Error::Config(format!("room '{room_id}' has no device plan")))
    }
}
