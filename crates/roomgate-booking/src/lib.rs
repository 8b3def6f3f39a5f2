//! Booking-driven room control.
//!
//! - [`booking`]: the booking model and its status state machine.
//! - [`store`]: the storage seam with an in-memory default.
//! - [`credential`]: scanned QR credential parsing and validation.
//! - [`rooms`]: per-room device plans from deployment configuration.
//! - [`machine`]: the room controller turning booking transitions into
//!   actuator command sequences.
//! - [`emergency`]: the unconditional emergency path.

pub mod booking;
pub mod credential;
pub mod emergency;
pub mod machine;
pub mod rooms;
pub mod store;

pub use booking::{Booking, BookingStatus};
pub use credential::{CredentialToken, Validation, ValidationRejection};
pub use emergency::EmergencyCoordinator;
pub use machine::{RoomController, ScanOutcome};
pub use rooms::{RoomDirectory, RoomPlan};
pub use store::{BookingStore, MemoryBookingStore};
