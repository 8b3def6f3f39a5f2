//! Booking storage behind a trait.
//!
//! The gateway is not the system of record for bookings; an upstream
//! scheduler owns them. [`BookingStore`] is the seam where that system
//! plugs in, and [`MemoryBookingStore`] is the default used by the
//! gateway binary and by tests.

#![allow(async_fn_in_trait)]

use roomgate_core::{BookingId, Error, Result, RoomId};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::booking::{Booking, BookingStatus};

/// Storage seam for bookings.
///
/// Not object-safe (`async fn` methods); consumers take a generic
/// parameter.
pub trait BookingStore: Send + Sync {
    /// Insert a new booking.
    ///
    /// # Errors
    /// Returns an error if a booking with the same id already exists or
    /// the backend fails.
    async fn create(&self, booking: Booking) -> Result<()>;

    /// Fetch a booking by id.
    ///
    /// # Errors
    /// Returns an error only on backend failure; a missing booking is
    /// `Ok(None)`.
    async fn get(&self, id: &BookingId) -> Result<Option<Booking>>;

    /// Persist a modified booking.
    ///
    /// # Errors
    /// Returns `Error::BookingNotFound` when the id is unknown.
    async fn update(&self, booking: Booking) -> Result<()>;

    /// All bookings for a room in the given status.
    ///
    /// # Errors
    /// Returns an error only on backend failure.
    async fn by_room(&self, room_id: &RoomId, status: BookingStatus) -> Result<Vec<Booking>>;

    /// Every active booking, for the completion sweep.
    ///
    /// # Errors
    /// Returns an error only on backend failure.
    async fn active(&self) -> Result<Vec<Booking>>;
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryBookingStore {
    bookings: RwLock<HashMap<BookingId, Booking>>,
}

impl MemoryBookingStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl BookingStore for MemoryBookingStore {
    async fn create(&self, booking: Booking) -> Result<()> {
        let mut bookings = self.bookings.write().await;
        if bookings.contains_key(&booking.id) {
            return Err(Error::InvalidMessage {
                message: format!("booking {} already exists", booking.id),
            });
        }
        bookings.insert(booking.id, booking);
        Ok(())
    }

    async fn get(&self, id: &BookingId) -> Result<Option<Booking>> {
        Ok(self.bookings.read().await.get(id).cloned())
    }

    async fn update(&self, booking: Booking) -> Result<()> {
        let mut bookings = self.bookings.write().await;
        if !bookings.contains_key(&booking.id) {
            return Err(Error::BookingNotFound {
                booking_id: booking.id.to_string(),
            });
        }
        bookings.insert(booking.id, booking);
        Ok(())
    }

    async fn by_room(&self, room_id: &RoomId, status: BookingStatus) -> Result<Vec<Booking>> {
        Ok(self
            .bookings
            .read()
            .await
            .values()
            .filter(|b| &b.room_id == room_id && b.status == status)
            .cloned()
            .collect())
    }

    async fn active(&self) -> Result<Vec<Booking>> {
        Ok(self
            .bookings
            .read()
            .await
            .values()
            .filter(|b| b.status == BookingStatus::Active)
            .cloned()
            .collect())
    }
}
