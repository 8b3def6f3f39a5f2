//! Bus driver task.
//!
//! The driver is the sole owner of the bus transport. Every outbound
//! frame funnels through one mpsc request channel and is written by this
//! single task, so two frames can never interleave on the half-duplex
//! line no matter how many dispatcher callers race. Ack correlation
//! happens inline: after a correlated write the driver keeps reading
//! until the matching `COMMAND_ACK` arrives or the deadline passes,
//! which also keeps the line quiet while a peripheral is replying.
//!
//! Unsolicited inbound frames (bus-side sensor events, status reports)
//! are forwarded on a separate event channel at all times. Frames
//! addressed to other nodes are skipped and counted; on a shared line
//! every node sees every frame.

use roomgate_core::{BusAddress, DeviceId, Error, Result};
use roomgate_protocol::{AckPayload, CommandKind, Frame, FrameKind};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, timeout_at};
use tracing::{debug, trace, warn};

use crate::bus::BusTransport;

/// Capacity of the request channel feeding the driver.
const REQUEST_CAPACITY: usize = 32;

/// Capacity of the channel carrying unsolicited inbound frames.
const EVENT_CAPACITY: usize = 64;

/// Outcome of a correlated write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckResult {
    /// The peripheral acknowledged, reporting success or refusal.
    Acked { ok: bool },
    /// No matching ack arrived before the deadline.
    TimedOut,
}

struct AckWait {
    device_id: DeviceId,
    kind: CommandKind,
    timeout: Duration,
    reply: oneshot::Sender<AckResult>,
}

struct BusRequest {
    frame: Frame,
    correlate: Option<AckWait>,
    /// Resolved once the frame is on the wire; dropped on write failure.
    done: Option<oneshot::Sender<()>>,
}

/// Cloneable sender half for submitting frames to the driver.
#[derive(Debug, Clone)]
pub struct BusHandle {
    tx: mpsc::Sender<BusRequest>,
}

impl BusHandle {
    /// Write a frame without waiting for acknowledgment.
    ///
    /// Returns once the frame has left the transport, not merely once it
    /// is enqueued, so a caller observing the line afterwards sees the
    /// write.
    ///
    /// # Errors
    /// Returns `Error::BusUnavailable` when the driver has stopped or
    /// the write itself failed.
    pub async fn write(&self, frame: Frame) -> Result<()> {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(BusRequest {
                frame,
                correlate: None,
                done: Some(done_tx),
            })
            .await
            .map_err(|_| Error::BusUnavailable("bus driver stopped".into()))?;

        done_rx
            .await
            .map_err(|_| Error::BusUnavailable("bus write failed".into()))
    }

    /// Write a frame and wait for the correlated `COMMAND_ACK`.
    ///
    /// Correlation is by device id and command name echoed back in the
    /// ack payload.
    ///
    /// # Errors
    /// Returns `Error::BusUnavailable` when the driver has stopped or
    /// the write itself failed.
    pub async fn write_and_wait_ack(
        &self,
        frame: Frame,
        device_id: DeviceId,
        kind: CommandKind,
        timeout: Duration,
    ) -> Result<AckResult> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(BusRequest {
                frame,
                correlate: Some(AckWait {
                    device_id,
                    kind,
                    timeout,
                    reply: reply_tx,
                }),
                done: None,
            })
            .await
            .map_err(|_| Error::BusUnavailable("bus driver stopped".into()))?;

        reply_rx
            .await
            .map_err(|_| Error::BusUnavailable("bus write failed".into()))
    }
}

/// Single-owner task driving one [`BusTransport`].
#[derive(Debug)]
pub struct BusDriver<T> {
    transport: T,
    local: BusAddress,
    requests: mpsc::Receiver<BusRequest>,
    events: mpsc::Sender<Frame>,
    skipped: u64,
}

impl<T: BusTransport> BusDriver<T> {
    /// Build a driver around a transport.
    ///
    /// Returns the driver (to be `run` on its own task), the handle for
    /// submitting frames, and the receiver of unsolicited inbound frames.
    #[must_use]
    pub fn new(transport: T, local: BusAddress) -> (Self, BusHandle, mpsc::Receiver<Frame>) {
        let (request_tx, requests) = mpsc::channel(REQUEST_CAPACITY);
        let (events, event_rx) = mpsc::channel(EVENT_CAPACITY);
        let driver = Self {
            transport,
            local,
            requests,
            events,
            skipped: 0,
        };
        (driver, BusHandle { tx: request_tx }, event_rx)
    }

    /// Run until every [`BusHandle`] is dropped or the transport closes.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                request = self.requests.recv() => {
                    let Some(request) = request else {
                        debug!("all bus handles dropped, driver stopping");
                        return;
                    };
                    self.handle_request(request).await;
                }
                inbound = self.transport.recv() => {
                    match inbound {
                        Ok(Some(frame)) => self.route_inbound(frame),
                        Ok(None) => {
                            debug!("bus transport closed, driver stopping");
                            return;
                        }
                        Err(e) => {
                            warn!(error = %e, "bus transport error");
                        }
                    }
                }
            }
        }
    }

    async fn handle_request(&mut self, request: BusRequest) {
        if let Err(e) = self.write_frame(&request.frame).await {
            warn!(error = %e, "bus write failed");
            // Dropping the reply senders signals the failure to the caller.
            return;
        }
        trace!(frame = %request.frame, "bus write complete");

        if let Some(done) = request.done {
            let _ = done.send(());
        }
        if let Some(wait) = request.correlate {
            let result = self
                .await_ack(&wait.device_id, &wait.kind, wait.timeout)
                .await;
            let _ = wait.reply.send(result);
        }
    }

    /// One transmit-enable bracketed write.
    async fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.transport.set_transmit_enable(true).await?;
        let written = self.transport.send(frame.clone()).await;
        // Release the line even when the write failed.
        let released = self.transport.set_transmit_enable(false).await;
        written?;
        released
    }

    async fn await_ack(
        &mut self,
        device_id: &DeviceId,
        kind: &CommandKind,
        timeout: Duration,
    ) -> AckResult {
        let deadline = Instant::now() + timeout;
        loop {
            let frame = match timeout_at(deadline, self.transport.recv()).await {
                Err(_) => return AckResult::TimedOut,
                Ok(Ok(Some(frame))) => frame,
                Ok(Ok(None)) => return AckResult::TimedOut,
                Ok(Err(e)) => {
                    warn!(error = %e, "bus transport error");
                    continue;
                }
            };

            if !frame.addressed_to(self.local) {
                self.skipped += 1;
                trace!(frame = %frame, "skipping frame for another node");
                continue;
            }

            if frame.kind() == FrameKind::CommandAck {
                match AckPayload::from_json(frame.payload()) {
                    Ok(ack) if ack.matches(device_id, kind) => {
                        return AckResult::Acked { ok: ack.ok };
                    }
                    Ok(ack) => {
                        debug!(device_id = %ack.device_id, command = %ack.command,
                               "uncorrelated ack while waiting, dropping");
                    }
                    Err(e) => {
                        warn!(error = %e, "unparseable ack payload");
                    }
                }
            } else {
                // Unrelated traffic still reaches its consumers.
                self.forward_event(frame);
            }
        }
    }

    fn route_inbound(&mut self, frame: Frame) {
        if !frame.addressed_to(self.local) {
            self.skipped += 1;
            trace!(frame = %frame, "skipping frame for another node");
            return;
        }
        if frame.kind() == FrameKind::CommandAck {
            debug!(frame = %frame, "unsolicited ack, dropping");
            return;
        }
        self.forward_event(frame);
    }

    fn forward_event(&self, frame: Frame) {
        if let Err(e) = self.events.try_send(frame) {
            warn!(error = %e, "event channel full or closed, dropping inbound frame");
        }
    }
}
