//! Bus frame representation and line-level encode/decode.
//!
//! A frame is the unit of communication on the half-duplex serial bus
//! between the gateway and the room peripherals. The wire format is a
//! single ASCII line:
//!
//! ```text
//! <TARGET>;<TYPE>;<PAYLOAD>\n
//! ```
//!
//! - `TARGET` - single uppercase letter addressing one bus node
//! - `TYPE` - one of `EVENT`, `ACTION`, `STATUS`, `DISPLAY`, `COMMAND_ACK`
//! - `PAYLOAD` - opaque string, typically serialized JSON; may contain
//!   further `;` characters (only the first two separators are structural)
//!
//! The codec performs no semantic validation of the payload; structured
//! data inside it is the caller's concern.
//!
//! # Example
//!
//! ```
//! use roomgate_protocol::{Frame, FrameKind};
//! use roomgate_core::BusAddress;
//!
//! let target = BusAddress::new('D').unwrap();
//! let frame = Frame::new(target, FrameKind::Action, "{\"command\":\"door_unlock\"}").unwrap();
//!
//! let line = frame.encode();
//! assert_eq!(line, "D;ACTION;{\"command\":\"door_unlock\"}\n");
//!
//! let decoded = Frame::decode(&line).unwrap();
//! assert_eq!(decoded, frame);
//! ```

use roomgate_core::{
    BusAddress, Error, Result,
    constants::{FRAME_SEPARATOR, FRAME_TERMINATOR},
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed set of bus message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FrameKind {
    /// Field event originating at a peripheral (RFID scan, button press,
    /// sensor reading, emergency button).
    Event,
    /// Actuator command from the gateway to a peripheral.
    Action,
    /// Peripheral status report.
    Status,
    /// Text for a status display.
    Display,
    /// Acknowledgment of a previously written `ACTION` or `DISPLAY` frame.
    CommandAck,
}

impl FrameKind {
    /// Wire name of this frame kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            FrameKind::Event => "EVENT",
            FrameKind::Action => "ACTION",
            FrameKind::Status => "STATUS",
            FrameKind::Display => "DISPLAY",
            FrameKind::CommandAck => "COMMAND_ACK",
        }
    }

    /// Parse a wire name into a frame kind.
    ///
    /// # Errors
    /// Returns `Error::MalformedFrame` for names outside the closed set.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "EVENT" => Ok(FrameKind::Event),
            "ACTION" => Ok(FrameKind::Action),
            "STATUS" => Ok(FrameKind::Status),
            "DISPLAY" => Ok(FrameKind::Display),
            "COMMAND_ACK" => Ok(FrameKind::CommandAck),
            other => Err(Error::MalformedFrame {
                reason: format!("unknown frame type '{other}'"),
            }),
        }
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One addressed, typed, payload-bearing unit of bus communication.
///
/// Frames are stateless and created per transmission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    target: BusAddress,
    kind: FrameKind,
    payload: String,
}

impl Frame {
    /// Create a new frame.
    ///
    /// # Errors
    /// Returns `Error::MalformedFrame` if the payload contains a newline,
    /// which would break line framing on the wire.
    pub fn new(target: BusAddress, kind: FrameKind, payload: impl Into<String>) -> Result<Self> {
        let payload = payload.into();
        if payload.contains(FRAME_TERMINATOR as char) {
            return Err(Error::MalformedFrame {
                reason: "payload must not contain a newline".to_string(),
            });
        }
        Ok(Frame {
            target,
            kind,
            payload,
        })
    }

    /// The addressed bus node.
    #[must_use]
    pub fn target(&self) -> BusAddress {
        self.target
    }

    /// The frame kind.
    #[must_use]
    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    /// The opaque payload.
    #[must_use]
    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// Whether this frame is addressed to the given local node.
    ///
    /// A decoded frame addressed elsewhere is a no-op signal to the
    /// caller, not an error: on a shared bus every node sees every line.
    #[must_use]
    pub fn addressed_to(&self, local: BusAddress) -> bool {
        self.target == local
    }

    /// Encode the frame as a terminated wire line.
    #[must_use]
    pub fn encode(&self) -> String {
        let mut line = String::with_capacity(self.payload.len() + 16);
        line.push(self.target.as_char());
        line.push(FRAME_SEPARATOR);
        line.push_str(self.kind.as_str());
        line.push(FRAME_SEPARATOR);
        line.push_str(&self.payload);
        line.push(FRAME_TERMINATOR as char);
        line
    }

    /// Decode a single wire line into a frame.
    ///
    /// The trailing terminator (and an optional `\r` before it) is
    /// tolerated but not required.
    ///
    /// # Errors
    /// Returns `Error::MalformedFrame` if fewer than two separators are
    /// present, the target is not a single letter, or the type is outside
    /// the closed set.
    pub fn decode(line: &str) -> Result<Self> {
        let line = line.trim_end_matches(['\n', '\r']);

        let mut parts = line.splitn(3, FRAME_SEPARATOR);
        let (Some(target), Some(kind), Some(payload)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(Error::MalformedFrame {
                reason: format!("expected TARGET;TYPE;PAYLOAD, got '{line}'"),
            });
        };

        let target: BusAddress = target.parse().map_err(|_| Error::MalformedFrame {
            reason: format!("invalid target '{target}'"),
        })?;
        let kind = FrameKind::parse(kind)?;

        Frame::new(target, kind, payload)
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Frame[target={}, kind={}, payload='{}']",
            self.target, self.kind, self.payload
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn addr(c: char) -> BusAddress {
        BusAddress::new(c).unwrap()
    }

    #[test]
    fn test_encode_basic() {
        let frame = Frame::new(addr('D'), FrameKind::Action, "payload").unwrap();
        assert_eq!(frame.encode(), "D;ACTION;payload\n");
    }

    #[test]
    fn test_encode_empty_payload() {
        let frame = Frame::new(addr('G'), FrameKind::Status, "").unwrap();
        assert_eq!(frame.encode(), "G;STATUS;\n");
    }

    #[test]
    fn test_decode_basic() {
        let frame = Frame::decode("D;ACTION;payload\n").unwrap();
        assert_eq!(frame.target(), addr('D'));
        assert_eq!(frame.kind(), FrameKind::Action);
        assert_eq!(frame.payload(), "payload");
    }

    #[test]
    fn test_decode_without_terminator() {
        let frame = Frame::decode("G;EVENT;x").unwrap();
        assert_eq!(frame.kind(), FrameKind::Event);
    }

    #[test]
    fn test_decode_crlf() {
        let frame = Frame::decode("G;EVENT;x\r\n").unwrap();
        assert_eq!(frame.payload(), "x");
    }

    #[test]
    fn test_payload_may_contain_separator() {
        let frame = Frame::decode("D;DISPLAY;meeting active; ends 14:00\n").unwrap();
        assert_eq!(frame.payload(), "meeting active; ends 14:00");
    }

    #[rstest]
    #[case("")] // empty line
    #[case("D")] // no separators
    #[case("D;ACTION")] // one separator
    #[case("DD;ACTION;x")] // multi-char target
    #[case("1;ACTION;x")] // non-letter target
    #[case("D;BOGUS;x")] // unknown type
    fn test_decode_malformed(#[case] line: &str) {
        let result = Frame::decode(line);
        assert!(matches!(result, Err(Error::MalformedFrame { .. })));
    }

    #[test]
    fn test_newline_in_payload_rejected() {
        let result = Frame::new(addr('D'), FrameKind::Action, "a\nb");
        assert!(matches!(result, Err(Error::MalformedFrame { .. })));
    }

    #[test]
    fn test_addressed_to() {
        let frame = Frame::decode("D;STATUS;ok").unwrap();
        assert!(frame.addressed_to(addr('D')));
        assert!(!frame.addressed_to(addr('G')));
    }

    #[rstest]
    #[case(FrameKind::Event, "EVENT")]
    #[case(FrameKind::Action, "ACTION")]
    #[case(FrameKind::Status, "STATUS")]
    #[case(FrameKind::Display, "DISPLAY")]
    #[case(FrameKind::CommandAck, "COMMAND_ACK")]
    fn test_frame_kind_wire_names(#[case] kind: FrameKind, #[case] name: &str) {
        assert_eq!(kind.as_str(), name);
        assert_eq!(FrameKind::parse(name).unwrap(), kind);
    }

    #[test]
    fn test_round_trip() {
        let original = Frame::new(addr('B'), FrameKind::CommandAck, "{\"ok\":true}").unwrap();
        let recovered = Frame::decode(&original.encode()).unwrap();
        assert_eq!(recovered, original);
    }

    #[test]
    fn test_display_format() {
        let frame = Frame::new(addr('D'), FrameKind::Event, "scan").unwrap();
        let display = format!("{frame}");
        assert!(display.contains("target=D"));
        assert!(display.contains("kind=EVENT"));
        assert!(display.contains("scan"));
    }
}
