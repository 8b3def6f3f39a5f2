//! Heartbeat monitor.
//!
//! A periodic sweep over the registry that reclassifies silent sessions
//! as timed out. The monitor only observes and labels; it never closes
//! connections, since a device may be alive but slow and any inbound
//! frame revives its session.

use chrono::Duration as ChronoDuration;
use roomgate_core::constants::{HEARTBEAT_SWEEP_PERIOD, HEARTBEAT_TIMEOUT};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

use crate::registry::SessionRegistry;

/// Periodic liveness sweeper over a [`SessionRegistry`].
#[derive(Debug)]
pub struct HeartbeatMonitor {
    registry: Arc<SessionRegistry>,
    sweep_period: Duration,
    timeout: ChronoDuration,
}

impl HeartbeatMonitor {
    /// Monitor with the default sweep period and timeout.
    #[must_use]
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self {
            registry,
            sweep_period: HEARTBEAT_SWEEP_PERIOD,
            timeout: ChronoDuration::from_std(HEARTBEAT_TIMEOUT)
                .unwrap_or_else(|_| ChronoDuration::seconds(60)),
        }
    }

    /// Override sweep period and timeout, mainly for tests.
    #[must_use]
    pub fn with_timing(mut self, sweep_period: Duration, timeout: ChronoDuration) -> Self {
        self.sweep_period = sweep_period;
        self.timeout = timeout;
        self
    }

    /// Run until `shutdown` flips to `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.sweep_period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let timed_out = self.registry.sweep_timeouts(self.timeout).await;
                    if !timed_out.is_empty() {
                        debug!(count = timed_out.len(), "heartbeat sweep flagged sessions");
                    }
                }
                result = shutdown.changed() => {
                    if result.is_err() || *shutdown.borrow() {
                        debug!("heartbeat monitor stopping");
                        return;
                    }
                }
            }
        }
    }
}
