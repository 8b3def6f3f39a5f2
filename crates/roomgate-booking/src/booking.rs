//! Booking model and its status transitions.

use chrono::{DateTime, Duration, Utc};
use roomgate_core::constants::EARLY_ACCESS_WINDOW;
use roomgate_core::{BookingId, Error, QrSecret, Result, RoomId};
use std::fmt;

/// Lifecycle of one booking.
///
/// `Completed` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Active,
    Completed,
    Cancelled,
}

impl BookingStatus {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, BookingStatus::Completed | BookingStatus::Cancelled)
    }

    /// Whether the state machine permits this transition.
    #[must_use]
    pub fn can_transition_to(&self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed | Active | Cancelled)
                | (Confirmed, Active | Cancelled)
                | (Active, Completed | Cancelled)
        )
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Active => "active",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
        };
        write!(f, "{name}")
    }
}

/// One scheduled meeting in one room.
#[derive(Debug, Clone, PartialEq)]
pub struct Booking {
    pub id: BookingId,
    pub room_id: RoomId,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: BookingStatus,
    pub qr_secret: QrSecret,
}

impl Booking {
    /// Create a pending booking with a fresh id.
    ///
    /// # Errors
    /// Returns `Error::InvalidMessage` when the end time is not after
    /// the start time.
    pub fn new(
        room_id: RoomId,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        qr_secret: QrSecret,
    ) -> Result<Self> {
        if end_time <= start_time {
            return Err(Error::InvalidMessage {
                message: format!("booking must end after it starts ({start_time} >= {end_time})"),
            });
        }
        Ok(Booking {
            id: BookingId::generate(),
            room_id,
            start_time,
            end_time,
            status: BookingStatus::Pending,
            qr_secret,
        })
    }

    /// Move the booking to `next`.
    ///
    /// # Errors
    /// Returns `Error::InvalidStateTransition` when the state machine
    /// does not permit the move.
    pub fn transition(&mut self, next: BookingStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::InvalidStateTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        Ok(())
    }

    /// Whether `now` falls inside the physical access window.
    ///
    /// Access opens a fixed margin before the scheduled start and closes
    /// exactly at the end time (half-open interval).
    #[must_use]
    pub fn access_window_contains(&self, now: DateTime<Utc>) -> bool {
        let early = Duration::from_std(EARLY_ACCESS_WINDOW).unwrap_or_else(|_| Duration::zero());
        now >= self.start_time - early && now < self.end_time
    }

    /// Whether the booking's scheduled time is over.
    #[must_use]
    pub fn is_past_end(&self, now: DateTime<Utc>) -> bool {
        now >= self.end_time
    }
}
