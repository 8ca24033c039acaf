//! Shared utilities for integration tests.
#![allow(dead_code)]

use std::io::Write;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use loolwsd::config::ServerConfig;
use loolwsd::engine::{Engine, EngineSession};
use loolwsd::lifecycle::Supervisor;
use loolwsd::net::ConnectionId;
use loolwsd::session::Outbox;

#[derive(Default)]
struct Record {
    sessions: Vec<Vec<Vec<u8>>>,
    released: usize,
}

/// Engine that records every chunk, per session. Optionally echoes each
/// chunk back to the client as a text reply.
#[derive(Clone, Default)]
pub struct RecordingEngine {
    record: Arc<Mutex<Record>>,
    echo: bool,
}

struct RecordingSession {
    index: usize,
    record: Arc<Mutex<Record>>,
    outbox: Option<Outbox>,
}

impl RecordingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn echoing() -> Self {
        Self {
            echo: true,
            ..Self::default()
        }
    }

    pub fn opened(&self) -> usize {
        self.record.lock().unwrap().sessions.len()
    }

    pub fn released(&self) -> usize {
        self.record.lock().unwrap().released
    }

    /// Chunks received by each session, in session creation order.
    pub fn sessions(&self) -> Vec<Vec<Vec<u8>>> {
        self.record.lock().unwrap().sessions.clone()
    }
}

impl Engine for RecordingEngine {
    fn name(&self) -> &str {
        "recording"
    }

    fn open_session(&self, _id: ConnectionId, outbox: Outbox) -> Box<dyn EngineSession> {
        let mut record = self.record.lock().unwrap();
        record.sessions.push(Vec::new());
        Box::new(RecordingSession {
            index: record.sessions.len() - 1,
            record: self.record.clone(),
            outbox: self.echo.then_some(outbox),
        })
    }
}

impl EngineSession for RecordingSession {
    fn handle_input(&mut self, chunk: &[u8]) {
        self.record.lock().unwrap().sessions[self.index].push(chunk.to_vec());
        if let Some(outbox) = &self.outbox {
            outbox.send_text(String::from_utf8_lossy(chunk));
        }
    }
}

impl Drop for RecordingSession {
    fn drop(&mut self) {
        self.record.lock().unwrap().released += 1;
    }
}

/// Start a server on an ephemeral loopback port.
pub async fn boot(engine: RecordingEngine) -> Supervisor {
    boot_with(engine, |_| {}).await
}

/// Like [`boot`], with `configure` applied on top of the test defaults.
pub async fn boot_with(
    engine: RecordingEngine,
    configure: impl FnOnce(&mut ServerConfig),
) -> Supervisor {
    let mut config = ServerConfig::default();
    config.listener.bind_host = "127.0.0.1".into();
    config.listener.port = 0;
    config.lifecycle.shutdown_grace_secs = 2;
    configure(&mut config);
    Supervisor::start(&config, Arc::new(engine)).await.unwrap()
}

pub fn ws_url(addr: SocketAddr) -> String {
    format!("ws://{addr}/ws")
}

/// Poll `condition` until it holds or `limit` elapses.
pub async fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// `Write` sink whose contents can be inspected after it was moved away.
#[derive(Clone, Default)]
pub struct SharedOutput(Arc<Mutex<Vec<u8>>>);

impl SharedOutput {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for SharedOutput {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
