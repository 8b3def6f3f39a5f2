//! Per-device outbound command queue.
//!
//! Commands submitted while a device is offline are parked here and
//! flushed in FIFO order when the device reconnects. The queue is
//! bounded with oldest-first eviction and a maximum entry age; emergency
//! commands jump the line via head insertion.

use chrono::{DateTime, Duration, Utc};
use roomgate_protocol::Command;
use std::collections::VecDeque;

use roomgate_core::constants::{OUTBOUND_QUEUE_CAP, OUTBOUND_QUEUE_TTL};

/// Bounded FIFO queue of commands awaiting delivery.
#[derive(Debug)]
pub struct OutboundQueue {
    entries: VecDeque<Command>,
    cap: usize,
    max_age: Duration,
    /// Commands evicted or expired since creation, for observability.
    dropped: u64,
}

impl OutboundQueue {
    /// Create a queue with the default capacity and TTL.
    #[must_use]
    pub fn new() -> Self {
        Self::with_limits(
            OUTBOUND_QUEUE_CAP,
            Duration::from_std(OUTBOUND_QUEUE_TTL).unwrap_or(Duration::hours(24)),
        )
    }

    /// Create a queue with custom limits.
    #[must_use]
    pub fn with_limits(cap: usize, max_age: Duration) -> Self {
        Self {
            entries: VecDeque::with_capacity(cap.min(16)),
            cap,
            max_age,
            dropped: 0,
        }
    }

    /// Append a command at the tail.
    ///
    /// Expired entries are purged first; if the queue is still full, the
    /// oldest entry is evicted to make room.
    pub fn push_back(&mut self, command: Command) {
        self.purge_expired(Utc::now());
        if self.entries.len() >= self.cap {
            self.entries.pop_front();
            self.dropped += 1;
        }
        self.entries.push_back(command);
    }

    /// Insert a command at the head, ahead of any queued non-emergency
    /// command for the same device.
    ///
    /// Used by the emergency path only. If the queue is full the oldest
    /// *tail* entry is evicted; the priority command is never dropped in
    /// favor of an older one.
    pub fn push_front(&mut self, command: Command) {
        self.purge_expired(Utc::now());
        if self.entries.len() >= self.cap {
            self.entries.pop_back();
            self.dropped += 1;
        }
        self.entries.push_front(command);
    }

    /// Drain all deliverable entries in FIFO order.
    ///
    /// Expired entries are dropped, not returned.
    pub fn drain(&mut self) -> Vec<Command> {
        let now = Utc::now();
        self.purge_expired(now);
        self.entries.drain(..).collect()
    }

    /// Drop entries older than the maximum age.
    pub fn purge_expired(&mut self, now: DateTime<Utc>) {
        let max_age = self.max_age;
        let before = self.entries.len();
        self.entries.retain(|c| c.age(now) <= max_age);
        self.dropped += (before - self.entries.len()) as u64;
    }

    /// Number of queued commands.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total commands evicted or expired over this queue's lifetime.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl Default for OutboundQueue {
    fn default() -> Self {
        Self::new()
    }
}
