//! loolwsd: LibreOffice On-Line WebSocket server.
//!
//! ```text
//!     Client ──HTTP upgrade──▶ http::server ──▶ factory ──▶ handler ──▶ Session ──▶ engine
//!        ▲                                                     │
//!        └──────────────── replies (Outbox writer) ◀───────────┘
//! ```

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;

use loolwsd::config::Cli;
use loolwsd::lifecycle::{startup, ExitStatus};
use loolwsd::observability::logging;

fn main() -> ExitCode {
    let config = match Cli::parse().into_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("loolwsd: {e}");
            return ExitStatus::Config.into();
        }
    };

    logging::init(&config.observability);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.listener.port,
        probe = config.probe.enabled,
        "loolwsd starting"
    );

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "Failed to build runtime");
            return ExitStatus::Software.into();
        }
    };

    let status = runtime.block_on(startup::run(config));
    // A probe blocked reading stdin holds a blocking thread that never returns.
    runtime.shutdown_timeout(Duration::from_secs(1));

    status.into()
}
