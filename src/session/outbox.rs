//! Reply path from an engine session back to its client.
//!
//! The receive loop never writes to the socket itself. Engine sessions queue
//! replies on an [`Outbox`]; one writer task per connection drains the queue
//! into the socket's sink and closes it once every `Outbox` handle is gone.

use std::fmt::Display;

use bytes::Bytes;
use futures_util::{Sink, SinkExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use crate::net::ConnectionId;

/// A single outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Text(String),
    Binary(Bytes),
}

impl Reply {
    fn into_message(self) -> Message {
        match self {
            Reply::Text(text) => Message::text(text),
            Reply::Binary(data) => Message::binary(data),
        }
    }
}

/// Handle for queueing replies to one client.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<Reply>,
}

/// Receiving end of an outbox, consumed by the connection's writer.
#[derive(Debug)]
pub struct Replies {
    rx: mpsc::UnboundedReceiver<Reply>,
}

impl Outbox {
    /// Create an outbox and the queue its replies land in.
    pub fn channel() -> (Self, Replies) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, Replies { rx })
    }

    /// Queue a reply. Returns `false` once the connection's writer has stopped.
    pub fn send(&self, reply: Reply) -> bool {
        self.tx.send(reply).is_ok()
    }

    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.send(Reply::Text(text.into()))
    }

    pub fn send_binary(&self, data: impl Into<Bytes>) -> bool {
        self.send(Reply::Binary(data.into()))
    }

    /// Whether the writer is gone.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Spawn the writer for one connection.
///
/// The task ends after the last `Outbox` clone is dropped (remaining replies
/// are flushed first, then the sink is closed) or when the sink fails. It
/// yields the number of replies written.
pub fn spawn_writer<S>(mut sink: S, replies: Replies, id: ConnectionId) -> JoinHandle<u64>
where
    S: Sink<Message> + Unpin + Send + 'static,
    S::Error: Display,
{
    let Replies { mut rx } = replies;

    tokio::spawn(async move {
        let mut written = 0u64;
        while let Some(reply) = rx.recv().await {
            if let Err(e) = sink.send(reply.into_message()).await {
                tracing::debug!(connection_id = %id, error = %e, "Reply dropped, socket gone");
                return written;
            }
            written += 1;
        }

        if let Err(e) = sink.close().await {
            tracing::trace!(connection_id = %id, error = %e, "Close after peer close");
        }
        written
    })
}
