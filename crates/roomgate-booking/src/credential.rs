//! Scanned credential validation.
//!
//! A QR credential encodes `"<booking-uuid>:<secret>"`. Validation is a
//! pure decision over the token, the booking (if any) and the clock, so
//! every rejection reason is reproducible in tests without a store or a
//! bus. Checks run in a fixed order and the secret comparison is
//! constant-time.

use chrono::{DateTime, Utc};
use roomgate_core::{BookingId, Error, QrSecret, Result};
use std::fmt;

use crate::booking::{Booking, BookingStatus};

/// Parsed form of a scanned credential string.
#[derive(Debug, Clone, PartialEq)]
pub struct CredentialToken {
    pub booking_id: BookingId,
    pub qr_secret: QrSecret,
}

impl CredentialToken {
    /// Parse `"<booking-uuid>:<secret>"`.
    ///
    /// # Errors
    /// Returns `Error::InvalidMessage` when the shape is wrong and
    /// `Error::InvalidIdentifier` when the uuid does not parse.
    pub fn parse(credential: &str) -> Result<Self> {
        let (id, secret) = credential.split_once(':').ok_or_else(|| Error::InvalidMessage {
            message: "credential must be '<booking-id>:<secret>'".to_string(),
        })?;
        if secret.is_empty() {
            return Err(Error::InvalidMessage {
                message: "credential secret must not be empty".to_string(),
            });
        }
        Ok(CredentialToken {
            booking_id: id.parse()?,
            qr_secret: QrSecret::new(secret),
        })
    }
}

/// Why a scan was denied.
///
/// Every variant is user-visible; the caller reports it, never swallows
/// it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationRejection {
    /// No booking matches the credential's id.
    NotFound,
    /// The booking exists but the secret does not match.
    SecretMismatch,
    /// The booking is not in a startable status.
    WrongStatus(BookingStatus),
    /// Scanned before the early-access window opens.
    TooEarly,
    /// Scanned at or after the booking's end time.
    Expired,
}

impl fmt::Display for ValidationRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationRejection::NotFound => write!(f, "no booking matches this credential"),
            ValidationRejection::SecretMismatch => write!(f, "credential secret mismatch"),
            ValidationRejection::WrongStatus(s) => write!(f, "booking is {s}, not startable"),
            ValidationRejection::TooEarly => write!(f, "too early, access opens 15 minutes before start"),
            ValidationRejection::Expired => write!(f, "booking has already ended"),
        }
    }
}

/// Outcome of validating one scan.
#[derive(Debug, Clone, PartialEq)]
pub enum Validation {
    Granted(Booking),
    Rejected(ValidationRejection),
}

/// Validate a token against the booking the store resolved for it.
///
/// Check order: existence, secret, status, window. The first failure
/// wins; a caller therefore learns the most specific reason that does
/// not leak whether later checks would also have failed.
#[must_use]
pub fn validate(
    booking: Option<&Booking>,
    token: &CredentialToken,
    now: DateTime<Utc>,
) -> Validation {
    let Some(booking) = booking else {
        return Validation::Rejected(ValidationRejection::NotFound);
    };
    if booking.qr_secret != token.qr_secret {
        return Validation::Rejected(ValidationRejection::SecretMismatch);
    }
    if !matches!(
        booking.status,
        BookingStatus::Pending | BookingStatus::Confirmed
    ) {
        return Validation::Rejected(ValidationRejection::WrongStatus(booking.status));
    }
    if booking.is_past_end(now) {
        return Validation::Rejected(ValidationRejection::Expired);
    }
    if !booking.access_window_contains(now) {
        return Validation::Rejected(ValidationRejection::TooEarly);
    }
    Validation::Granted(booking.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use roomgate_core::RoomId;
    use rstest::rstest;

    fn booking_at(start: DateTime<Utc>) -> Booking {
        Booking::new(
            RoomId::new("atlantis").unwrap(),
            start,
            start + Duration::hours(1),
            QrSecret::new("s3cret"),
        )
        .unwrap()
    }

    fn token_for(booking: &Booking, secret: &str) -> CredentialToken {
        CredentialToken {
            booking_id: booking.id,
            qr_secret: QrSecret::new(secret),
        }
    }

    #[test]
    fn test_parse_round_trip() {
        let id = BookingId::generate();
        let token = CredentialToken::parse(&format!("{id}:abc:def")).unwrap();
        assert_eq!(token.booking_id, id);
        // Everything after the first separator is the secret.
        assert_eq!(token.qr_secret.as_str(), "abc:def");
    }

    #[rstest]
    #[case("no-separator")]
    #[case("not-a-uuid:secret")]
    #[case("6f9619ff-8b86-d011-b42d-00c04fc964ff:")]
    fn test_parse_rejects_malformed(#[case] credential: &str) {
        assert!(CredentialToken::parse(credential).is_err());
    }

    #[test]
    fn test_unknown_booking() {
        let b = booking_at(Utc::now());
        let token = token_for(&b, "s3cret");
        assert_eq!(
            validate(None, &token, Utc::now()),
            Validation::Rejected(ValidationRejection::NotFound)
        );
    }

    #[test]
    fn test_wrong_secret() {
        let b = booking_at(Utc::now());
        let token = token_for(&b, "wrong");
        assert_eq!(
            validate(Some(&b), &token, Utc::now()),
            Validation::Rejected(ValidationRejection::SecretMismatch)
        );
    }

    #[test]
    fn test_wrong_status() {
        let mut b = booking_at(Utc::now());
        b.transition(BookingStatus::Active).unwrap();
        let token = token_for(&b, "s3cret");
        assert_eq!(
            validate(Some(&b), &token, Utc::now()),
            Validation::Rejected(ValidationRejection::WrongStatus(BookingStatus::Active))
        );
    }

    // The window boundary cases from the access rules: 16 minutes early
    // is denied, 14 minutes early is granted, past the end is denied.
    #[rstest]
    #[case(-16, false)]
    #[case(-14, true)]
    #[case(0, true)]
    #[case(30, true)]
    fn test_window_boundaries(#[case] minutes_from_start: i64, #[case] granted: bool) {
        let start = Utc::now();
        let b = booking_at(start);
        let token = token_for(&b, "s3cret");
        let at = start + Duration::minutes(minutes_from_start);

        let result = validate(Some(&b), &token, at);
        if granted {
            assert!(matches!(result, Validation::Granted(_)));
        } else {
            assert_eq!(result, Validation::Rejected(ValidationRejection::TooEarly));
        }
    }

    #[test]
    fn test_expired_past_end() {
        let start = Utc::now();
        let b = booking_at(start);
        let token = token_for(&b, "s3cret");
        assert_eq!(
            validate(Some(&b), &token, b.end_time),
            Validation::Rejected(ValidationRejection::Expired)
        );
        assert_eq!(
            validate(Some(&b), &token, b.end_time + Duration::hours(2)),
            Validation::Rejected(ValidationRejection::Expired)
        );
    }
}
