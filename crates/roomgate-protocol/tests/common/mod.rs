//! Shared helpers for the protocol integration tests.
//!
//! The helpers build fully-formed frames and payloads with sensible
//! defaults so individual tests only spell out what they are actually
//! asserting.

use roomgate_core::{BusAddress, DeviceId};
use roomgate_protocol::{AckPayload, ActionPayload, BusCodec, Command, CommandKind, Frame};
use tokio::io::DuplexStream;
use tokio_util::codec::Framed;

/// Create a framed duplex pair for in-memory codec tests.
pub fn framed_duplex(
    buffer_size: usize,
) -> (
    Framed<DuplexStream, BusCodec>,
    Framed<DuplexStream, BusCodec>,
) {
    let (gateway, peripheral) = tokio::io::duplex(buffer_size);
    (
        Framed::new(gateway, BusCodec::new()),
        Framed::new(peripheral, BusCodec::new()),
    )
}

/// Bus address from a single character, panicking on invalid input.
pub fn addr(c: char) -> BusAddress {
    BusAddress::new(c).unwrap()
}

/// Device ID from a string, panicking on invalid input.
pub fn device(id: &str) -> DeviceId {
    DeviceId::new(id).unwrap()
}

/// Build the `ACTION`/`DISPLAY` frame a dispatcher would write for a
/// command.
pub fn action_frame(target: BusAddress, device_id: &str, kind: CommandKind) -> Frame {
    let command = Command::new(device(device_id), kind);
    let payload = command.wire_payload().unwrap();
    Frame::new(target, command.kind.frame_kind(), payload).unwrap()
}

/// Build the `COMMAND_ACK` frame a peripheral would write in response.
pub fn ack_frame(target: BusAddress, device_id: &str, kind: &CommandKind, ok: bool) -> Frame {
    let payload = AckPayload {
        device_id: device(device_id),
        command: kind.name().to_string(),
        ok,
    };
    Frame::new(
        target,
        roomgate_protocol::FrameKind::CommandAck,
        payload.to_json().unwrap(),
    )
    .unwrap()
}

/// Decode an `ACTION`/`DISPLAY` frame payload back into its structured
/// form, asserting it targets the expected device.
pub fn parse_action(frame: &Frame, expected_device: &str) -> ActionPayload {
    let payload = ActionPayload::from_json(frame.payload()).unwrap();
    assert_eq!(payload.device_id, device(expected_device));
    payload
}
