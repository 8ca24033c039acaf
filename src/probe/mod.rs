//! Interactive probe: a loopback WebSocket client for manual testing.
//!
//! Enabled with `--test`. It connects to the server's own port, prints the
//! leading line of every frame the server sends back, and sends each line
//! read from its input as one text frame. End of input closes the socket and
//! stops the server.

use std::io::Write;
use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use crate::lifecycle::Shutdown;

pub const BANNER: &str = "Enter LOOL WS requests, one per line. Enter EOF to finish.";

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] WsError),

    #[error("input/output error: {0}")]
    Io(#[from] std::io::Error),

    #[error("reader task failed: {0}")]
    Reader(String),
}

/// What the probe exchanged before finishing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeSummary {
    pub sent: u64,
    pub received: u64,
}

pub struct Probe {
    addr: SocketAddr,
    path: String,
    shutdown: Shutdown,
}

impl Probe {
    /// Probe the server listening on `addr`. Stops it through `shutdown`.
    pub fn new(addr: SocketAddr, path: impl Into<String>, shutdown: Shutdown) -> Self {
        Self {
            addr,
            path: path.into(),
            shutdown,
        }
    }

    /// Loopback URL for a server listening on `addr`; wildcard hosts map to localhost.
    pub fn url(&self) -> String {
        let host = if self.addr.ip().is_unspecified() {
            match self.addr {
                SocketAddr::V4(_) => "127.0.0.1".to_string(),
                SocketAddr::V6(_) => "[::1]".to_string(),
            }
        } else {
            match self.addr {
                SocketAddr::V4(a) => a.ip().to_string(),
                SocketAddr::V6(a) => format!("[{}]", a.ip()),
            }
        };
        format!("ws://{host}:{}{}", self.addr.port(), self.path)
    }

    /// Run until `input` is exhausted.
    ///
    /// Empty lines are skipped, since an empty frame ends the server's
    /// session. Any other line, whitespace included, is sent verbatim.
    /// Shutdown is triggered even if the exchange fails part way.
    pub async fn run<R, W>(self, input: R, output: W) -> Result<ProbeSummary, ProbeError>
    where
        R: AsyncBufRead + Unpin,
        W: Write + Send + 'static,
    {
        let result = self.exchange(input, output).await;
        if let Err(e) = &result {
            tracing::error!(error = %e, "Probe failed");
        }
        self.shutdown.trigger();
        result
    }

    async fn exchange<R, W>(&self, input: R, mut output: W) -> Result<ProbeSummary, ProbeError>
    where
        R: AsyncBufRead + Unpin,
        W: Write + Send + 'static,
    {
        writeln!(output, "{BANNER}")?;
        output.flush()?;

        let url = self.url();
        let (socket, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
        tracing::info!(url = %url, "Probe connected");
        let (mut sink, mut stream) = socket.split();

        let reader = tokio::spawn(async move {
            let mut received = 0u64;
            while let Some(message) = stream.next().await {
                let data = match message {
                    Ok(m @ (Message::Text(_) | Message::Binary(_))) => m.into_data(),
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => continue,
                };
                received += 1;
                if writeln!(output, ">>{} bytes: {}", data.len(), leading_line(&data)).is_err() {
                    break;
                }
                let _ = output.flush();
            }
            received
        });

        let mut sent = 0u64;
        let mut lines = input.lines();
        while let Some(line) = lines.next_line().await? {
            if line.is_empty() {
                continue;
            }
            sink.send(Message::text(line)).await?;
            sent += 1;
        }

        tracing::info!(sent, "Probe input finished, closing");
        sink.send(Message::Close(None)).await?;
        let received = reader
            .await
            .map_err(|e| ProbeError::Reader(e.to_string()))?;

        Ok(ProbeSummary { sent, received })
    }
}

/// First line of `data`, lossily decoded.
pub fn leading_line(data: &[u8]) -> String {
    let end = data
        .iter()
        .position(|&b| b == b'\n')
        .unwrap_or(data.len());
    String::from_utf8_lossy(&data[..end]).into_owned()
}
