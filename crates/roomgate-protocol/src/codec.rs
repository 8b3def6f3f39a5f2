//! Tokio codec for bus frame framing.
//!
//! `BusCodec` integrates the line-delimited bus protocol with async I/O
//! by implementing tokio-util's [`Decoder`] and [`Encoder`] traits, so a
//! serial port or TCP stream can be wrapped in `Framed` and produce
//! [`Frame`] values directly.
//!
//! # Line noise
//!
//! A shared serial line sees garbage: partial frames from a reset
//! peripheral, electrical noise, traffic fragments. The decoder skips
//! malformed lines internally (logging each one) instead of returning
//! errors, because a `Framed` stream fuses after a decoder error and a
//! single bad line must never stop the bus reader. The buffered data is
//! also bounded: if no terminator is seen within the maximum frame size,
//! the buffer is discarded so it cannot grow without bound.
//!
//! # Usage
//!
//! ```no_run
//! use tokio::net::TcpStream;
//! use tokio_util::codec::Framed;
//! use roomgate_protocol::BusCodec;
//! use futures::StreamExt;
//!
//! # async fn example() -> roomgate_core::Result<()> {
//! let stream = TcpStream::connect("127.0.0.1:7800").await?;
//! let mut framed = Framed::new(stream, BusCodec::new());
//!
//! while let Some(frame) = framed.next().await.transpose()? {
//!     println!("Received: {frame}");
//! }
//! # Ok(())
//! # }
//! ```

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

use crate::Frame;
use roomgate_core::{Error, Result, constants::{FRAME_TERMINATOR, MAX_FRAME_SIZE}};

/// Tokio codec for line-delimited bus frames.
#[derive(Debug)]
pub struct BusCodec {
    /// Maximum allowed frame size in bytes, terminator included.
    max_frame_size: usize,
}

impl BusCodec {
    /// Create a new codec with the default maximum frame size.
    pub fn new() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
        }
    }

    /// Create a new codec with a custom maximum frame size.
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    /// Get the current maximum frame size.
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Default for BusCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for BusCodec {
    type Item = Frame;
    type Error = Error;

    /// Extract the next well-formed frame from the byte stream.
    ///
    /// Returns `Ok(Some(Frame))` when a complete line decoded, `Ok(None)`
    /// when more data is needed. Malformed, non-UTF-8, and oversized
    /// lines are logged and skipped inside the loop; surfacing them as
    /// errors would fuse the `Framed` stream and stop the reader.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            let Some(pos) = src.iter().position(|&b| b == FRAME_TERMINATOR) else {
                if src.len() > self.max_frame_size {
                    // Discard the runaway buffer so the stream can
                    // resynchronize at the next terminator.
                    warn!(size = src.len(), "discarding oversized bus buffer");
                    src.clear();
                }
                return Ok(None);
            };

            let line = src.split_to(pos + 1);

            if line.len() > self.max_frame_size {
                warn!(size = line.len(), "skipping oversized bus line");
                continue;
            }

            let text = match std::str::from_utf8(&line) {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "skipping non-UTF-8 bus line");
                    continue;
                }
            };

            match Frame::decode(text) {
                Ok(frame) => return Ok(Some(frame)),
                Err(e) => {
                    warn!(error = %e, "skipping malformed bus line");
                }
            }
        }
    }
}

impl Encoder<Frame> for BusCodec {
    type Error = Error;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<()> {
        let line = item.encode();

        if line.len() > self.max_frame_size {
            return Err(Error::FrameTooLarge {
                size: line.len(),
                max_size: self.max_frame_size,
            });
        }

        dst.reserve(line.len());
        dst.put_slice(line.as_bytes());
        Ok(())
    }
}
