//! Closed set of actuator commands and their bus payloads.
//!
//! Every command the gateway can issue to a peripheral is one variant of
//! [`CommandKind`]; payload shape is fixed per variant, so a decoding
//! failure is a type error rather than a missing-key lookup at runtime.
//!
//! # Wire mapping
//!
//! Commands travel inside `ACTION` frames (or `DISPLAY` frames for
//! display text) as a JSON object that also carries the logical device
//! id, which the peripheral echoes back in its `COMMAND_ACK` payload for
//! correlation:
//!
//! ```text
//! D;ACTION;{"device_id":"door-1","command":"door_unlock"}
//! D;COMMAND_ACK;{"device_id":"door-1","command":"door_unlock","ok":true}
//! ```

use crate::FrameKind;
use chrono::{DateTime, Utc};
use roomgate_core::{DeviceId, Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Buzzer patterns a peripheral can play.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuzzerPattern {
    /// Short confirmation chirp after a successful meeting start.
    Confirm,
    /// Goodbye pattern when a meeting ends.
    Goodbye,
    /// Sustained emergency pattern.
    Emergency,
}

impl fmt::Display for BuzzerPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuzzerPattern::Confirm => write!(f, "confirm"),
            BuzzerPattern::Goodbye => write!(f, "goodbye"),
            BuzzerPattern::Emergency => write!(f, "emergency"),
        }
    }
}

/// One actuator command, payload shape fixed per variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum CommandKind {
    DoorUnlock,
    DoorLock,
    LightsOn,
    LightsOff,
    AcOn,
    AcOff,
    OutletsOn,
    OutletsOff,
    Buzzer { pattern: BuzzerPattern },
    DisplayText { text: String },
}

impl CommandKind {
    /// Stable name used for ack correlation and logging.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            CommandKind::DoorUnlock => "door_unlock",
            CommandKind::DoorLock => "door_lock",
            CommandKind::LightsOn => "lights_on",
            CommandKind::LightsOff => "lights_off",
            CommandKind::AcOn => "ac_on",
            CommandKind::AcOff => "ac_off",
            CommandKind::OutletsOn => "outlets_on",
            CommandKind::OutletsOff => "outlets_off",
            CommandKind::Buzzer { .. } => "buzzer",
            CommandKind::DisplayText { .. } => "display_text",
        }
    }

    /// Which frame kind this command travels in.
    #[must_use]
    pub fn frame_kind(&self) -> FrameKind {
        match self {
            CommandKind::DisplayText { .. } => FrameKind::Display,
            _ => FrameKind::Action,
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// One command addressed to one device.
///
/// Immutable once created; only `attempts` and the delivery outcome are
/// mutated while the dispatcher works on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Unique id for logging and tracing.
    pub id: Uuid,
    /// The device this command targets.
    pub target: DeviceId,
    /// What to do, payload shape fixed per variant.
    pub kind: CommandKind,
    /// When the command was created; queued commands older than the
    /// queue TTL are purged instead of delivered.
    pub created_at: DateTime<Utc>,
    /// Number of bus write attempts made so far.
    pub attempts: u32,
}

impl Command {
    /// Create a new command with a fresh id.
    #[must_use]
    pub fn new(target: DeviceId, kind: CommandKind) -> Self {
        Command {
            id: Uuid::new_v4(),
            target,
            kind,
            created_at: Utc::now(),
            attempts: 0,
        }
    }

    /// Age of the command relative to `now`.
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.created_at
    }

    /// Record one bus write attempt.
    pub fn record_attempt(&mut self) {
        self.attempts += 1;
    }

    /// The `ACTION`/`DISPLAY` payload for this command.
    ///
    /// # Errors
    /// Returns `Error::InvalidMessage` when serialization fails.
    pub fn wire_payload(&self) -> Result<String> {
        ActionPayload {
            device_id: self.target.clone(),
            kind: self.kind.clone(),
        }
        .to_json()
    }
}

/// JSON payload of an outgoing `ACTION`/`DISPLAY` frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionPayload {
    pub device_id: DeviceId,
    #[serde(flatten)]
    pub kind: CommandKind,
}

impl ActionPayload {
    /// Serialize to the frame payload string.
    ///
    /// # Errors
    /// Returns `Error::InvalidMessage` when serialization fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidMessage {
            message: format!("action payload encoding failed: {e}"),
        })
    }

    /// Parse from a frame payload string.
    ///
    /// # Errors
    /// Returns `Error::InvalidMessage` when the payload is not a valid
    /// action object.
    pub fn from_json(payload: &str) -> Result<Self> {
        serde_json::from_str(payload).map_err(|e| Error::InvalidMessage {
            message: format!("invalid action payload: {e}"),
        })
    }
}

/// JSON payload of a `COMMAND_ACK` frame.
///
/// Correlates back to the command by device id and command name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckPayload {
    pub device_id: DeviceId,
    pub command: String,
    pub ok: bool,
}

impl AckPayload {
    /// Whether this ack correlates to the given command.
    #[must_use]
    pub fn matches(&self, device_id: &DeviceId, kind: &CommandKind) -> bool {
        &self.device_id == device_id && self.command == kind.name()
    }

    /// Serialize to the frame payload string.
    ///
    /// # Errors
    /// Returns `Error::InvalidMessage` when serialization fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidMessage {
            message: format!("ack payload encoding failed: {e}"),
        })
    }

    /// Parse from a frame payload string.
    ///
    /// # Errors
    /// Returns `Error::InvalidMessage` when the payload is not a valid
    /// ack object.
    pub fn from_json(payload: &str) -> Result<Self> {
        serde_json::from_str(payload).map_err(|e| Error::InvalidMessage {
            message: format!("invalid ack payload: {e}"),
        })
    }
}
