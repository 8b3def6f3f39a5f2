use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    // Protocol errors
    #[error("Malformed frame: {reason}")]
    MalformedFrame { reason: String },

    #[error("Frame too large: {size} bytes (max {max_size})")]
    FrameTooLarge { size: usize, max_size: usize },

    #[error("Invalid message: {message}")]
    InvalidMessage { message: String },

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Invalid bus address: {0}")]
    InvalidBusAddress(String),

    // Dispatch errors
    #[error("Unknown device: {device_id}")]
    UnknownDevice { device_id: String },

    #[error("Delivery failed to {device_id} after {attempts} attempt(s)")]
    DeliveryFailed { device_id: String, attempts: u32 },

    #[error("Bus unavailable: {0}")]
    BusUnavailable(String),

    // Session errors
    #[error("Room already assigned to device {device_id}")]
    RoomAlreadyAssigned { device_id: String },

    #[error("Session not found: {device_id}")]
    SessionNotFound { device_id: String },

    // Booking errors
    #[error("Booking not found: {booking_id}")]
    BookingNotFound { booking_id: String },

    #[error("Invalid booking transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
