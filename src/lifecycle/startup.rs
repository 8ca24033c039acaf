//! Startup orchestration and the server supervisor.
//!
//! # Responsibilities
//! - Initialise the engine before anything is bound (fail fast)
//! - Bind the listener and run the HTTP server on its own task
//! - Optionally run the interactive probe against the bound port
//! - Block until termination, then stop accepting and drain open connections
//!
//! # Design Decisions
//! - Engine failure is the one fatal runtime condition and maps to EX_UNAVAILABLE
//! - Draining is bounded by `lifecycle.shutdown_grace_secs`
//! - The probe is joined within the grace period; one still blocked on input
//!   after that is aborted

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::AsyncBufRead;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::config::ServerConfig;
use crate::engine::{self, Engine};
use crate::http::HttpServer;
use crate::lifecycle::{signals, Shutdown};
use crate::net::ConnectionTracker;
use crate::observability::metrics;
use crate::probe::{Probe, ProbeError, ProbeSummary};

/// Process outcome, in sysexits terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Ok,
    /// EX_UNAVAILABLE: the engine could not be initialised.
    Unavailable,
    /// EX_SOFTWARE: bind or serve failure.
    Software,
    /// EX_CONFIG: invalid configuration.
    Config,
}

impl ExitStatus {
    pub fn code(self) -> u8 {
        match self {
            ExitStatus::Ok => 0,
            ExitStatus::Unavailable => 69,
            ExitStatus::Software => 70,
            ExitStatus::Config => 78,
        }
    }
}

impl From<ExitStatus> for ExitCode {
    fn from(status: ExitStatus) -> Self {
        ExitCode::from(status.code())
    }
}

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),

    #[error("server task failed: {0}")]
    Task(String),
}

/// Owns the running server and the optional probe.
pub struct Supervisor {
    addr: SocketAddr,
    shutdown: Shutdown,
    tracker: ConnectionTracker,
    grace: Duration,
    server: JoinHandle<std::io::Result<()>>,
    probe: Option<JoinHandle<Result<ProbeSummary, ProbeError>>>,
}

impl Supervisor {
    /// Bind the configured address and start serving.
    pub async fn start(config: &ServerConfig, engine: Arc<dyn Engine>) -> Result<Self, StartupError> {
        let address = config.listener.bind_address();
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|source| StartupError::Bind {
                address: address.clone(),
                source,
            })?;
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, engine = engine.name(), "Listening for connections");

        let server = HttpServer::new(config, engine);
        let tracker = server.tracker().clone();
        let shutdown = Shutdown::new();
        let server = tokio::spawn(server.run(listener, shutdown.subscribe()));

        Ok(Self {
            addr,
            shutdown,
            tracker,
            grace: Duration::from_secs(config.lifecycle.shutdown_grace_secs),
            server,
            probe: None,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn tracker(&self) -> &ConnectionTracker {
        &self.tracker
    }

    /// Start the interactive probe on its own task.
    pub fn start_probe<R, W>(&mut self, path: &str, input: R, output: W)
    where
        R: AsyncBufRead + Unpin + Send + 'static,
        W: std::io::Write + Send + 'static,
    {
        let probe = Probe::new(self.addr, path, self.shutdown.clone());
        self.probe = Some(tokio::spawn(probe.run(input, output)));
    }

    /// Block until termination is requested, then stop.
    pub async fn wait(self) -> Result<Option<ProbeSummary>, StartupError> {
        let triggered = self.shutdown.subscribe();
        tokio::select! {
            _ = signals::termination() => {}
            _ = triggered.recv() => tracing::info!("Shutdown requested"),
        }
        self.stop().await
    }

    /// Stop accepting, drain open connections and join the probe.
    ///
    /// Yields the probe's summary when it ran and finished within the grace
    /// period.
    pub async fn stop(mut self) -> Result<Option<ProbeSummary>, StartupError> {
        self.shutdown.trigger();

        let served = match tokio::time::timeout(self.grace, &mut self.server).await {
            Ok(Ok(result)) => result.map_err(StartupError::from),
            Ok(Err(e)) => Err(StartupError::Task(e.to_string())),
            Err(_) => {
                tracing::warn!("Server did not stop within the grace period");
                self.server.abort();
                Ok(())
            }
        };

        let remaining = self.tracker.wait_for_idle(self.grace).await;
        if remaining > 0 {
            tracing::warn!(remaining, "Connections still open after grace period");
        }

        let summary = match self.probe.take() {
            Some(probe) => self.join_probe(probe).await,
            None => None,
        };

        tracing::info!("Shutdown complete");
        served.map(|()| summary)
    }

    async fn join_probe(
        &self,
        mut probe: JoinHandle<Result<ProbeSummary, ProbeError>>,
    ) -> Option<ProbeSummary> {
        match tokio::time::timeout(self.grace, &mut probe).await {
            Ok(Ok(Ok(summary))) => {
                tracing::info!(
                    sent = summary.sent,
                    received = summary.received,
                    "Probe finished"
                );
                Some(summary)
            }
            Ok(Ok(Err(e))) => {
                tracing::warn!(error = %e, "Probe ended with an error");
                None
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Probe task failed");
                None
            }
            Err(_) => {
                probe.abort();
                tracing::debug!("Probe still waiting for input, aborted");
                None
            }
        }
    }
}

/// Run the server described by `config` until termination.
pub async fn run(config: ServerConfig) -> ExitStatus {
    let Some(install_path) = config.engine.install_path.as_deref() else {
        tracing::error!("No engine installation path configured");
        return ExitStatus::Config;
    };

    let engine = match engine::init(install_path) {
        Ok(engine) => engine,
        Err(e) => {
            tracing::error!(
                fatal = true,
                path = %install_path.display(),
                error = %e,
                "Failed to initialise the office kit"
            );
            return ExitStatus::Unavailable;
        }
    };
    tracing::info!(path = %install_path.display(), engine = engine.name(), "Engine initialised");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let mut supervisor = match Supervisor::start(&config, engine).await {
        Ok(supervisor) => supervisor,
        Err(e) => {
            tracing::error!(error = %e, "Failed to start server");
            return ExitStatus::Software;
        }
    };

    if config.probe.enabled {
        let input = tokio::io::BufReader::new(tokio::io::stdin());
        supervisor.start_probe(&config.probe.path, input, std::io::stdout());
    }

    match supervisor.wait().await {
        Ok(_) => ExitStatus::Ok,
        Err(e) => {
            tracing::error!(error = %e, "Server failed");
            ExitStatus::Software
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_sysexits() {
        assert_eq!(ExitStatus::Ok.code(), 0);
        assert_eq!(ExitStatus::Unavailable.code(), 69);
        assert_eq!(ExitStatus::Software.code(), 70);
        assert_eq!(ExitStatus::Config.code(), 78);
    }

    #[tokio::test]
    async fn missing_engine_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ServerConfig::default();
        config.listener.port = 0;
        config.engine.install_path = Some(dir.path().join("absent"));

        assert_eq!(run(config).await, ExitStatus::Unavailable);
    }

    #[tokio::test]
    async fn unset_install_path_is_a_config_error() {
        assert_eq!(run(ServerConfig::default()).await, ExitStatus::Config);
    }
}
