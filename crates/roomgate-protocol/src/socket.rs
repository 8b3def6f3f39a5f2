//! Control-plane socket messages and their line codec.
//!
//! Every message on the device/control-plane socket is one JSON object
//! per line, externally tagged by `type`. The variant set is closed and
//! each tag has a fixed payload shape, so a malformed message fails at
//! decode time instead of surfacing as a missing field deep inside a
//! handler.
//!
//! # Message flow
//!
//! ```text
//! device → gateway:  register, event, heartbeat
//! upstream → gateway: command
//! gateway → peer:    registration_success/error, command_sent/error,
//!                    notification
//! ```
//!
//! All device-originated messages implicitly carry the sender's
//! established device id through its session; only `register` names it
//! explicitly.

use crate::command::CommandKind;
use bytes::{BufMut, BytesMut};
use chrono::{DateTime, Utc};
use roomgate_core::{DeviceId, DeviceRole, Error, Result, RoomId, constants::MAX_FRAME_SIZE};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::marker::PhantomData;
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

/// Field event reported by a peripheral.
///
/// `SensorData` carries a float reading, so only `PartialEq` is derived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceEvent {
    /// An RFID/QR credential was presented at the reader.
    RfidScanned { credential: String },
    /// A physical button was pressed.
    ButtonPressed { button: ButtonKind },
    /// A sensor reported a reading.
    SensorData { sensor: String, value: f64 },
    /// The emergency button was pressed.
    EmergencyButton,
}

/// Physical buttons a room exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ButtonKind {
    /// Manual meeting start, valid inside the early-access window.
    StartMeeting,
    /// Manual meeting end.
    EndMeeting,
}

/// Messages a connected peer sends to the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Announce identity; must be the first message on a connection.
    Register {
        device_id: DeviceId,
        role: DeviceRole,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room_id: Option<RoomId>,
    },
    /// A field event from a peripheral.
    Event { event: DeviceEvent },
    /// A command from the control plane targeting some device.
    Command {
        target_device_id: DeviceId,
        command: CommandKind,
    },
    /// Liveness ping, no payload required.
    Heartbeat,
}

/// Messages the gateway sends to a connected peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    RegistrationSuccess {
        device_id: DeviceId,
        timestamp: DateTime<Utc>,
    },
    RegistrationError {
        message: String,
    },
    CommandSent,
    CommandError {
        message: String,
    },
    /// Pushed lifecycle and emergency notifications for observers.
    Notification {
        notification: GatewayNotification,
    },
}

/// Notifications broadcast to control-plane observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GatewayNotification {
    DeviceConnected { device_id: DeviceId },
    DeviceReconnected { device_id: DeviceId },
    DeviceDisconnected { device_id: DeviceId },
    DeviceTimeout { device_id: DeviceId },
    EmergencyTriggered { room_id: RoomId, reason: String },
}

/// Newline-delimited JSON codec for socket messages.
///
/// Generic over the inbound and outbound message types so both ends of
/// the socket can use it: the gateway decodes [`ClientMessage`] and
/// encodes [`ServerMessage`] ([`GatewaySocketCodec`]), a device does the
/// opposite ([`DeviceSocketCodec`]).
#[derive(Debug)]
pub struct SocketCodec<Rx, Tx> {
    max_line_size: usize,
    _marker: PhantomData<fn() -> (Rx, Tx)>,
}

/// Codec for the gateway side of a socket connection.
pub type GatewaySocketCodec = SocketCodec<ClientMessage, ServerMessage>;

/// Codec for the device/control-plane side of a socket connection.
pub type DeviceSocketCodec = SocketCodec<ServerMessage, ClientMessage>;

impl<Rx, Tx> SocketCodec<Rx, Tx> {
    /// Create a new codec with the default line size bound.
    pub fn new() -> Self {
        Self {
            max_line_size: MAX_FRAME_SIZE,
            _marker: PhantomData,
        }
    }
}

impl<Rx, Tx> Default for SocketCodec<Rx, Tx> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Rx: DeserializeOwned, Tx> Decoder for SocketCodec<Rx, Tx> {
    type Item = Rx;
    type Error = Error;

    /// Extract the next well-formed message from the byte stream.
    ///
    /// Malformed lines are logged and skipped inside the decoder rather
    /// than surfaced: a `Framed` stream fuses after a decoder error, and
    /// one bad line must not kill the connection. An oversized buffer
    /// with no terminator is discarded so it cannot grow without bound.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            let Some(pos) = src.iter().position(|&b| b == b'\n') else {
                if src.len() > self.max_line_size {
                    warn!(size = src.len(), "discarding oversized socket buffer");
                    src.clear();
                }
                return Ok(None);
            };

            let line = src.split_to(pos + 1);
            match serde_json::from_slice(&line) {
                Ok(message) => return Ok(Some(message)),
                Err(e) => {
                    warn!(error = %e, "skipping malformed socket line");
                }
            }
        }
    }
}

impl<Rx, Tx: Serialize> Encoder<Tx> for SocketCodec<Rx, Tx> {
    type Error = Error;

    fn encode(&mut self, item: Tx, dst: &mut BytesMut) -> Result<()> {
        let json = serde_json::to_vec(&item).map_err(|e| Error::InvalidMessage {
            message: format!("socket message encoding failed: {e}"),
        })?;
        dst.reserve(json.len() + 1);
        dst.put_slice(&json);
        dst.put_u8(b'\n');
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(id: &str) -> DeviceId {
        DeviceId::new(id).unwrap()
    }

    #[test]
    fn test_register_wire_shape() {
        let msg = ClientMessage::Register {
            device_id: device("display-1"),
            role: DeviceRole::Display,
            room_id: Some(RoomId::new("atlantis").unwrap()),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"register\""));
        assert!(json.contains("\"role\":\"display\""));
        assert!(json.contains("\"room_id\":\"atlantis\""));
    }

    #[test]
    fn test_register_without_room() {
        let json = "{\"type\":\"register\",\"device_id\":\"gw\",\"role\":\"gateway\"}";
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        assert!(matches!(
            msg,
            ClientMessage::Register { room_id: None, .. }
        ));
    }

    #[test]
    fn test_heartbeat_wire_shape() {
        let json = serde_json::to_string(&ClientMessage::Heartbeat).unwrap();
        assert_eq!(json, "{\"type\":\"heartbeat\"}");
    }

    #[test]
    fn test_event_tags() {
        let json = "{\"type\":\"event\",\"event\":{\"type\":\"RFID_SCANNED\",\"credential\":\"abc\"}}";
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        assert!(matches!(
            msg,
            ClientMessage::Event {
                event: DeviceEvent::RfidScanned { .. }
            }
        ));

        let json = "{\"type\":\"event\",\"event\":{\"type\":\"EMERGENCY_BUTTON\"}}";
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        assert!(matches!(
            msg,
            ClientMessage::Event {
                event: DeviceEvent::EmergencyButton
            }
        ));
    }

    #[test]
    fn test_command_message_round_trip() {
        let msg = ClientMessage::Command {
            target_device_id: device("door-1"),
            command: CommandKind::DoorUnlock,
        };
        let json = serde_json::to_string(&msg).unwrap();
        let back: ClientMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_unknown_event_type_rejected() {
        let json = "{\"type\":\"event\",\"event\":{\"type\":\"SOMETHING_ELSE\"}}";
        assert!(serde_json::from_str::<ClientMessage>(json).is_err());
    }

    #[test]
    fn test_codec_round_trip() {
        let mut gateway: GatewaySocketCodec = SocketCodec::new();
        let mut device_side: DeviceSocketCodec = SocketCodec::new();
        let mut buffer = BytesMut::new();

        device_side
            .encode(ClientMessage::Heartbeat, &mut buffer)
            .unwrap();
        let decoded = gateway.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(decoded, ClientMessage::Heartbeat);
    }

    #[test]
    fn test_codec_partial_line() {
        let mut codec: GatewaySocketCodec = SocketCodec::new();
        let mut buffer = BytesMut::from(&b"{\"type\":\"heart"[..]);
        assert!(codec.decode(&mut buffer).unwrap().is_none());

        buffer.extend_from_slice(b"beat\"}\n");
        assert!(codec.decode(&mut buffer).unwrap().is_some());
    }

    #[test]
    fn test_codec_skips_invalid_json() {
        let mut codec: GatewaySocketCodec = SocketCodec::new();
        let mut buffer = BytesMut::from(&b"not json\n{\"type\":\"heartbeat\"}\n"[..]);

        // The bad line is consumed silently and the next one decoded in
        // the same call.
        let next = codec.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(next, ClientMessage::Heartbeat);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_sensor_event_comparison() {
        let reading = DeviceEvent::SensorData {
            sensor: "temp".to_string(),
            value: 21.5,
        };
        assert_eq!(reading.clone(), reading);
        assert_ne!(
            reading,
            DeviceEvent::SensorData {
                sensor: "temp".to_string(),
                value: 22.0,
            }
        );
    }

    #[test]
    fn test_notification_wire_shape() {
        let msg = ServerMessage::Notification {
            notification: GatewayNotification::EmergencyTriggered {
                room_id: RoomId::new("atlantis").unwrap(),
                reason: "button".to_string(),
            },
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"notification\""));
        assert!(json.contains("\"kind\":\"emergency_triggered\""));
    }
}
