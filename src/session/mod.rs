//! Per-connection backend session.
//!
//! A [`Session`] is created when a connection reaches the open state and is
//! dropped exactly once when it closes. It is never shared: each connection
//! owns its own, and the engine sees one `EngineSession` per client.

pub mod outbox;

pub use outbox::{spawn_writer, Outbox, Replies, Reply};

use std::time::Instant;

use crate::engine::{Engine, EngineSession};
use crate::net::ConnectionId;
use crate::observability::metrics;

/// Backend state bound 1:1 to a connection.
pub struct Session {
    id: ConnectionId,
    inner: Box<dyn EngineSession>,
    // Keeps the connection's writer alive for as long as the session is.
    #[cfg_attr(not(test), allow(dead_code))]
    outbox: Outbox,
    chunks: u64,
    bytes: u64,
    opened_at: Instant,
}

impl Session {
    /// Open a session on `engine` for connection `id`.
    pub fn open(engine: &dyn Engine, id: ConnectionId, outbox: Outbox) -> Self {
        let inner = engine.open_session(id, outbox.clone());
        metrics::record_session_opened();
        tracing::debug!(connection_id = %id, engine = engine.name(), "Session opened");

        Self {
            id,
            inner,
            outbox,
            chunks: 0,
            bytes: 0,
            opened_at: Instant::now(),
        }
    }

    /// Forward one received chunk to the engine.
    ///
    /// Chunks are forwarded one call each, in the order they are given.
    pub fn handle_input(&mut self, chunk: &[u8]) {
        debug_assert!(!chunk.is_empty(), "empty reads end the connection");
        self.chunks += 1;
        self.bytes += chunk.len() as u64;
        self.inner.handle_input(chunk);
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    #[cfg(test)]
    fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    /// Number of chunks forwarded so far.
    pub fn chunks(&self) -> u64 {
        self.chunks
    }

    /// Number of payload bytes forwarded so far.
    pub fn bytes(&self) -> u64 {
        self.bytes
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("chunks", &self.chunks)
            .field("bytes", &self.bytes)
            .finish_non_exhaustive()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        metrics::record_session_closed();
        tracing::debug!(
            connection_id = %self.id,
            chunks = self.chunks,
            bytes = self.bytes,
            lifetime_ms = self.opened_at.elapsed().as_millis() as u64,
            "Session released"
        );
    }
}
