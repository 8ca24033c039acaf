//! WebSocket frame reading.
//!
//! # Responsibilities
//! - Present the transport as a sequence of bounded reads ([`FrameSource`])
//! - Split messages larger than the receive buffer into in-order chunks
//! - Distinguish close frames, peer disappearance and protocol failures
//!
//! # Data Flow
//! ```text
//! Client ──── WebSocket messages ────→ FrameReader ── Frame (≤ capacity) ──→ receive loop
//! ```
//!
//! # Design Decisions
//! - Ping/pong are answered by tungstenite and never surface as frames
//! - No reassembly: each read is handed on as it arrives
//! - A chunk keeps the opcode of the message it was cut from

use std::future::Future;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use thiserror::Error;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

/// Frame kind as seen by the receive loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Text,
    Binary,
    Close,
}

/// One bounded read from the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub opcode: OpCode,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(opcode: OpCode, payload: impl Into<Bytes>) -> Self {
        Self {
            opcode,
            payload: payload.into(),
        }
    }

    pub fn close() -> Self {
        Self::new(OpCode::Close, Bytes::new())
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Failure while reading frames after the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("transport failure: {0}")]
    Transport(String),
}

impl From<WsError> for FrameError {
    fn from(err: WsError) -> Self {
        match err {
            WsError::Io(e) => FrameError::Transport(e.to_string()),
            other => FrameError::Protocol(other.to_string()),
        }
    }
}

/// Source of frames for one connection.
pub trait FrameSource {
    /// Read the next frame. `Ok(None)` means the peer went away without a
    /// close frame.
    fn next_frame(&mut self) -> impl Future<Output = Result<Option<Frame>, FrameError>> + Send;
}

/// [`FrameSource`] over a tungstenite message stream.
pub struct FrameReader<S> {
    inner: S,
    capacity: usize,
    pending: Option<Frame>,
}

impl<S> FrameReader<S> {
    /// Wrap `inner`, bounding every read to `capacity` bytes.
    pub fn new(inner: S, capacity: usize) -> Self {
        Self {
            inner,
            capacity: capacity.max(1),
            pending: None,
        }
    }

    fn take_chunk(&mut self, mut frame: Frame) -> Frame {
        if frame.payload.len() > self.capacity {
            let rest = frame.payload.split_off(self.capacity);
            self.pending = Some(Frame::new(frame.opcode, rest));
        }
        frame
    }
}

impl<S> FrameSource for FrameReader<S>
where
    S: Stream<Item = Result<Message, WsError>> + Unpin + Send,
{
    async fn next_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        if let Some(rest) = self.pending.take() {
            return Ok(Some(self.take_chunk(rest)));
        }

        loop {
            let message = match self.inner.next().await {
                None
                | Some(Err(
                    WsError::ConnectionClosed
                    | WsError::AlreadyClosed
                    | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake),
                )) => return Ok(None),
                Some(Err(e)) => return Err(e.into()),
                Some(Ok(message)) => message,
            };

            let opcode = match &message {
                Message::Text(_) => OpCode::Text,
                Message::Binary(_) => OpCode::Binary,
                Message::Close(_) => return Ok(Some(Frame::close())),
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            };
            return Ok(Some(self.take_chunk(Frame::new(opcode, message.into_data()))));
        }
    }
}
