use crate::{
    Result,
    constants::{MAX_ID_LENGTH, MIN_ID_LENGTH},
    error::Error,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use subtle::ConstantTimeEq;
use uuid::Uuid;

/// Device identifier (1-64 ASCII characters).
///
/// Identifies one peripheral or gateway node across the socket control
/// plane and the session registry. Normalized (trimmed) at construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceId(String);

impl DeviceId {
    /// Create a new device ID with validation.
    ///
    /// # Errors
    /// Returns `Error::InvalidIdentifier` if the trimmed id is empty,
    /// longer than 64 characters, or contains non-ASCII characters.
    pub fn new(id: &str) -> Result<Self> {
        let id = id.trim();
        validate_identifier(id, "device ID")?;
        Ok(DeviceId(id.to_string()))
    }

    /// Get the device ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for DeviceId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        DeviceId::new(s)
    }
}

impl TryFrom<String> for DeviceId {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        DeviceId::new(&s)
    }
}

impl From<DeviceId> for String {
    fn from(id: DeviceId) -> Self {
        id.0
    }
}

/// Room identifier (1-64 ASCII characters).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomId(String);

impl RoomId {
    /// Create a new room ID with validation.
    ///
    /// # Errors
    /// Returns `Error::InvalidIdentifier` if the trimmed id is empty,
    /// longer than 64 characters, or contains non-ASCII characters.
    pub fn new(id: &str) -> Result<Self> {
        let id = id.trim();
        validate_identifier(id, "room ID")?;
        Ok(RoomId(id.to_string()))
    }

    /// Get the room ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RoomId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        RoomId::new(s)
    }
}

impl TryFrom<String> for RoomId {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        RoomId::new(&s)
    }
}

impl From<RoomId> for String {
    fn from(id: RoomId) -> Self {
        id.0
    }
}

fn validate_identifier(id: &str, what: &str) -> Result<()> {
    let len = id.len();
    if !(MIN_ID_LENGTH..=MAX_ID_LENGTH).contains(&len) {
        return Err(Error::InvalidIdentifier(format!(
            "{what} must be {MIN_ID_LENGTH}-{MAX_ID_LENGTH} chars, got {len}"
        )));
    }
    if !id.is_ascii() {
        return Err(Error::InvalidIdentifier(format!("{what} must be ASCII")));
    }
    Ok(())
}

/// Single-letter bus node address.
///
/// The serial bus addresses each node with one uppercase ASCII letter;
/// lowercase input is normalized at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BusAddress(char);

impl BusAddress {
    /// Create a bus address from a character.
    ///
    /// # Errors
    /// Returns `Error::InvalidBusAddress` if the character is not an
    /// ASCII letter.
    pub fn new(c: char) -> Result<Self> {
        if !c.is_ascii_alphabetic() {
            return Err(Error::InvalidBusAddress(format!(
                "expected ASCII letter, got {c:?}"
            )));
        }
        Ok(BusAddress(c.to_ascii_uppercase()))
    }

    /// Get the raw address character.
    #[must_use]
    pub fn as_char(&self) -> char {
        self.0
    }
}

impl fmt::Display for BusAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for BusAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut chars = s.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => BusAddress::new(c),
            _ => Err(Error::InvalidBusAddress(format!(
                "expected a single character, got {s:?}"
            ))),
        }
    }
}

/// Role of a connected device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceRole {
    /// The single node bridging the socket control plane to the serial bus.
    Gateway,
    /// Sensor/input peripherals: RFID reader, buttons, environment sensors.
    SensorInput,
    /// Status display peripherals.
    Display,
}

impl DeviceRole {
    /// Returns `true` if the role is Gateway.
    #[inline]
    #[must_use]
    pub fn is_gateway(self) -> bool {
        matches!(self, DeviceRole::Gateway)
    }
}

impl fmt::Display for DeviceRole {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DeviceRole::Gateway => write!(f, "gateway"),
            DeviceRole::SensorInput => write!(f, "sensor-input"),
            DeviceRole::Display => write!(f, "display"),
        }
    }
}

/// Liveness state of a device session.
///
/// `Timeout` is a liveness signal, not a termination decision: a session
/// in this state still holds its connection handle and outbound queue,
/// and a heartbeat on the same connection revives it. `Closed` is
/// terminal for the connection epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Connected,
    Timeout,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SessionState::Connected => write!(f, "connected"),
            SessionState::Timeout => write!(f, "timeout"),
            SessionState::Closed => write!(f, "closed"),
        }
    }
}

/// Booking identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BookingId(Uuid);

impl BookingId {
    /// Generate a fresh random booking ID.
    #[must_use]
    pub fn generate() -> Self {
        BookingId(Uuid::new_v4())
    }

    /// Get the inner UUID.
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl From<Uuid> for BookingId {
    fn from(id: Uuid) -> Self {
        BookingId(id)
    }
}

impl fmt::Display for BookingId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for BookingId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let id = Uuid::parse_str(s).map_err(|e| Error::InvalidIdentifier(format!(
            "invalid booking ID '{s}': {e}"
        )))?;
        Ok(BookingId(id))
    }
}

/// QR credential secret.
///
/// # Security
/// This type implements constant-time comparison to prevent timing
/// attacks when validating scanned credentials.
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
pub struct QrSecret(String);

impl QrSecret {
    /// Wrap a secret string.
    #[must_use]
    pub fn new(secret: impl Into<String>) -> Self {
        QrSecret(secret.into())
    }

    /// Get the secret as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Constant-time comparison implementation for QrSecret
///
/// This prevents timing attacks by ensuring comparison takes the same
/// time regardless of where the strings differ.
impl PartialEq for QrSecret {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_bytes().ct_eq(other.0.as_bytes()).into()
    }
}

impl std::hash::Hash for QrSecret {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("door-lock-a", "door-lock-a")]
    #[case("  display-1  ", "display-1")]
    #[case("G", "G")]
    fn test_device_id_valid(#[case] input: &str, #[case] expected: &str) {
        let id = DeviceId::new(input).unwrap();
        assert_eq!(id.as_str(), expected);
    }

    #[rstest]
    #[case("")] // empty
    #[case("   ")] // whitespace only
    #[case("ünïcode")] // non-ASCII
    fn test_device_id_invalid(#[case] input: &str) {
        assert!(DeviceId::new(input).is_err());
    }

    #[test]
    fn test_device_id_max_length() {
        let long = "x".repeat(64);
        assert!(DeviceId::new(&long).is_ok());
        let too_long = "x".repeat(65);
        assert!(DeviceId::new(&too_long).is_err());
    }

    #[test]
    fn test_device_id_serde_round_trip() {
        let id = DeviceId::new("rfid-reader-3").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"rfid-reader-3\"");
        let back: DeviceId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[rstest]
    #[case('a', 'A')]
    #[case('Z', 'Z')]
    #[case('g', 'G')]
    fn test_bus_address_normalized(#[case] input: char, #[case] expected: char) {
        let addr = BusAddress::new(input).unwrap();
        assert_eq!(addr.as_char(), expected);
    }

    #[rstest]
    #[case('1')]
    #[case(';')]
    #[case('\n')]
    fn test_bus_address_invalid(#[case] input: char) {
        assert!(BusAddress::new(input).is_err());
    }

    #[test]
    fn test_bus_address_from_str() {
        let addr: BusAddress = "d".parse().unwrap();
        assert_eq!(addr.as_char(), 'D');
        assert!("".parse::<BusAddress>().is_err());
        assert!("DD".parse::<BusAddress>().is_err());
    }

    #[test]
    fn test_device_role_serde() {
        let json = serde_json::to_string(&DeviceRole::SensorInput).unwrap();
        assert_eq!(json, "\"sensor-input\"");
        let role: DeviceRole = serde_json::from_str("\"gateway\"").unwrap();
        assert!(role.is_gateway());
    }

    #[test]
    fn test_session_state_display() {
        assert_eq!(SessionState::Connected.to_string(), "connected");
        assert_eq!(SessionState::Timeout.to_string(), "timeout");
        assert_eq!(SessionState::Closed.to_string(), "closed");
    }

    #[test]
    fn test_booking_id_round_trip() {
        let id = BookingId::generate();
        let parsed: BookingId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-uuid".parse::<BookingId>().is_err());
    }

    #[test]
    fn test_qr_secret_equality() {
        let a = QrSecret::new("s3cret");
        let b = QrSecret::new("s3cret");
        let c = QrSecret::new("other");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
