//! Protocol and timing constants shared across the gateway.
//!
//! The bus wire format is a single ASCII line per frame:
//!
//! ```text
//! <TARGET>;<TYPE>;<PAYLOAD>\n
//! ```
//!
//! Where `TARGET` is a single uppercase letter addressing one bus node,
//! `TYPE` is one of the closed set of frame kinds, and `PAYLOAD` is an
//! opaque string (typically serialized JSON). The payload may itself
//! contain the separator character; only the first two separators are
//! structural.

use std::time::Duration;

// ============================================================================
// Bus wire format
// ============================================================================

/// Separator between the frame's target, type, and payload sections.
pub const FRAME_SEPARATOR: char = ';';

/// Frame terminator. One frame per line.
pub const FRAME_TERMINATOR: u8 = b'\n';

/// Maximum size of a single bus frame in bytes.
///
/// Lines longer than this without a terminator indicate a misbehaving
/// peer or line noise; the reader discards the buffer rather than grow
/// without bound.
pub const MAX_FRAME_SIZE: usize = 8 * 1024;

// ============================================================================
// Identifier bounds
// ============================================================================

/// Minimum length of a device or room identifier.
pub const MIN_ID_LENGTH: usize = 1;

/// Maximum length of a device or room identifier.
pub const MAX_ID_LENGTH: usize = 64;

// ============================================================================
// Liveness timing
// ============================================================================

/// How often the heartbeat monitor sweeps connected sessions.
pub const HEARTBEAT_SWEEP_PERIOD: Duration = Duration::from_secs(30);

/// A connected session whose last heartbeat is older than this is
/// reclassified as timed out on the next sweep.
pub const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(60);

// ============================================================================
// Command delivery
// ============================================================================

/// How long the dispatcher waits for a `COMMAND_ACK` frame after a bus
/// write. The peripheral path is designed for sub-second responsiveness.
pub const ACK_TIMEOUT: Duration = Duration::from_secs(1);

/// Number of retries after an ack timeout before reporting delivery
/// failure. The initial attempt is not counted.
pub const MAX_DELIVERY_RETRIES: u32 = 1;

/// Maximum number of commands parked in one device's outbound queue.
/// When full, the oldest entry is evicted first.
pub const OUTBOUND_QUEUE_CAP: usize = 64;

/// Queued commands older than this are purged instead of delivered.
pub const OUTBOUND_QUEUE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

// ============================================================================
// Booking rules
// ============================================================================

/// How far before a booking's scheduled start physical access is already
/// granted.
pub const EARLY_ACCESS_WINDOW: Duration = Duration::from_secs(15 * 60);

/// How often the booking sweep checks active bookings against their end
/// time.
pub const BOOKING_SWEEP_PERIOD: Duration = Duration::from_secs(30);
