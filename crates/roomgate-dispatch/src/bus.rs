//! Bus transport abstraction.
//!
//! The peripheral bus is a shared half-duplex serial line: one talker at
//! a time, transmit-enable asserted only for the duration of a write.
//! [`BusTransport`] captures that contract behind native `async fn`
//! methods so the driver runs unchanged over a real serial port adapter
//! ([`FramedBus`]) or the in-process [`LoopbackBus`] used in tests.

#![allow(async_fn_in_trait)]

use futures::{SinkExt, StreamExt};
use roomgate_core::{Error, Result};
use roomgate_protocol::{BusCodec, Frame};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;

/// Half-duplex bus transport.
///
/// Implementations must hold transmit-enable low except while a write is
/// in flight; the driver brackets every [`send`](Self::send) with
/// [`set_transmit_enable`](Self::set_transmit_enable) calls.
///
/// Not object-safe (`async fn` methods, Edition 2024 RPITIT); use
/// generic parameters or an enum wrapper for dispatch.
pub trait BusTransport: Send {
    /// Write one frame to the line.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying transport fails.
    async fn send(&mut self, frame: Frame) -> Result<()>;

    /// Read the next well-formed frame from the line.
    ///
    /// Returns `Ok(None)` when the transport has closed. Malformed lines
    /// are skipped below this layer (`BusCodec` logs and drops them), so
    /// an error here means the transport itself failed.
    async fn recv(&mut self) -> Result<Option<Frame>>;

    /// Assert or release the transmit-enable line.
    ///
    /// # Errors
    ///
    /// Returns an error if the control line cannot be toggled.
    async fn set_transmit_enable(&mut self, enabled: bool) -> Result<()>;
}

/// [`BusTransport`] over any byte stream, framed with [`BusCodec`].
///
/// Transmit-enable is flushed into the stream discipline: `send` only
/// returns once the bytes left the buffer, which is the moment the
/// enable line may drop. Adapters for real RS-485 hardware toggle the
/// line in their `AsyncWrite` implementation.
#[derive(Debug)]
pub struct FramedBus<T> {
    framed: Framed<T, BusCodec>,
}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> FramedBus<T> {
    pub fn new(stream: T) -> Self {
        Self {
            framed: Framed::new(stream, BusCodec::new()),
        }
    }
}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> BusTransport for FramedBus<T> {
    async fn send(&mut self, frame: Frame) -> Result<()> {
        self.framed.send(frame).await
    }

    async fn recv(&mut self) -> Result<Option<Frame>> {
        self.framed.next().await.transpose()
    }

    async fn set_transmit_enable(&mut self, _enabled: bool) -> Result<()> {
        // The byte stream itself has no enable line; hardware adapters
        // handle it below this layer.
        Ok(())
    }
}

/// One observable bus operation, recorded by [`LoopbackBus`].
#[derive(Debug, Clone, PartialEq)]
pub enum BusOp {
    TransmitEnable(bool),
    Write(Frame),
}

/// In-process bus transport for tests and bus-less deployments.
///
/// Records every write and transmit-enable toggle in a transcript and
/// serves scripted inbound frames from a handle, mirroring the
/// mock-plus-handle shape used for peripheral devices.
///
/// # Examples
///
/// ```
/// use roomgate_core::BusAddress;
/// use roomgate_dispatch::bus::{BusTransport, LoopbackBus};
/// use roomgate_protocol::{Frame, FrameKind};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> roomgate_core::Result<()> {
/// let (mut bus, handle) = LoopbackBus::new();
/// let frame = Frame::new(BusAddress::new('D')?, FrameKind::Action, "{}")?;
///
/// bus.set_transmit_enable(true).await?;
/// bus.send(frame).await?;
/// bus.set_transmit_enable(false).await?;
///
/// assert_eq!(handle.writes().len(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct LoopbackBus {
    inbound: mpsc::Receiver<Frame>,
    transcript: Arc<Mutex<Vec<BusOp>>>,
    /// Frames to serve as immediate replies, one per write.
    replies: Arc<Mutex<VecDeque<Frame>>>,
    pending: VecDeque<Frame>,
}

impl LoopbackBus {
    #[must_use]
    pub fn new() -> (Self, LoopbackHandle) {
        let (inbound_tx, inbound) = mpsc::channel(64);
        let transcript = Arc::new(Mutex::new(Vec::new()));
        let replies = Arc::new(Mutex::new(VecDeque::new()));
        let bus = Self {
            inbound,
            transcript: transcript.clone(),
            replies: replies.clone(),
            pending: VecDeque::new(),
        };
        let handle = LoopbackHandle {
            inbound_tx,
            transcript,
            replies,
        };
        (bus, handle)
    }
}

impl BusTransport for LoopbackBus {
    async fn send(&mut self, frame: Frame) -> Result<()> {
        let reply = {
            let mut transcript = self
                .transcript
                .lock()
                .map_err(|_| Error::BusUnavailable("loopback transcript poisoned".into()))?;
            transcript.push(BusOp::Write(frame));
            self.replies
                .lock()
                .map_err(|_| Error::BusUnavailable("loopback replies poisoned".into()))?
                .pop_front()
        };
        if let Some(reply) = reply {
            self.pending.push_back(reply);
        }
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<Frame>> {
        if let Some(frame) = self.pending.pop_front() {
            return Ok(Some(frame));
        }
        Ok(self.inbound.recv().await)
    }

    async fn set_transmit_enable(&mut self, enabled: bool) -> Result<()> {
        self.transcript
            .lock()
            .map_err(|_| Error::BusUnavailable("loopback transcript poisoned".into()))?
            .push(BusOp::TransmitEnable(enabled));
        Ok(())
    }
}

/// Handle for scripting and inspecting a [`LoopbackBus`].
#[derive(Debug, Clone)]
pub struct LoopbackHandle {
    inbound_tx: mpsc::Sender<Frame>,
    transcript: Arc<Mutex<Vec<BusOp>>>,
    replies: Arc<Mutex<VecDeque<Frame>>>,
}

impl LoopbackHandle {
    /// Inject an unsolicited inbound frame, as a bus node would emit.
    pub async fn inject(&self, frame: Frame) -> Result<()> {
        self.inbound_tx
            .send(frame)
            .await
            .map_err(|_| Error::BusUnavailable("loopback closed".into()))
    }

    /// Queue a frame to be served right after the next write, in order.
    /// Used to script acknowledgment replies.
    pub fn reply_with(&self, frame: Frame) {
        if let Ok(mut replies) = self.replies.lock() {
            replies.push_back(frame);
        }
    }

    /// Full transcript of operations in the order they happened.
    #[must_use]
    pub fn transcript(&self) -> Vec<BusOp> {
        self.transcript
            .lock()
            .map(|t| t.clone())
            .unwrap_or_default()
    }

    /// Just the written frames, transmit-enable toggles elided.
    #[must_use]
    pub fn writes(&self) -> Vec<Frame> {
        self.transcript()
            .into_iter()
            .filter_map(|op| match op {
                BusOp::Write(frame) => Some(frame),
                BusOp::TransmitEnable(_) => None,
            })
            .collect()
    }
}
