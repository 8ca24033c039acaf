//! Backend engine capability.
//!
//! The engine interprets payload bytes; this server only hands them over.
//! One engine is initialised at startup and shared read-only by every
//! connection. Each connection gets its own [`EngineSession`].
//!
//! # Data Flow
//! ```text
//! startup: init(install_path) → Arc<dyn Engine>
//! per connection: Engine::open_session(id, outbox) → Box<dyn EngineSession>
//! per chunk: EngineSession::handle_input(bytes)
//! ```

pub mod kit;

pub use kit::OfficeKit;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use crate::net::ConnectionId;
use crate::session::Outbox;

/// Error type for engine initialisation.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("installation path {0:?} does not exist or is not a directory")]
    NotADirectory(PathBuf),

    #[error("no office kit library found under {0:?}")]
    LibraryNotFound(PathBuf),
}

/// A processing engine shared by all connections.
pub trait Engine: Send + Sync + 'static {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Create the per-connection state for a newly opened connection.
    ///
    /// `outbox` is how the session writes back to its client.
    fn open_session(&self, id: ConnectionId, outbox: Outbox) -> Box<dyn EngineSession>;
}

/// Engine state bound to one connection.
///
/// Dropping it releases the backend state for that client.
pub trait EngineSession: Send {
    /// Consume one received chunk. Never called with an empty slice.
    fn handle_input(&mut self, chunk: &[u8]);
}

/// Initialise the engine installed at `install_path`.
pub fn init(install_path: &Path) -> Result<Arc<dyn Engine>, EngineError> {
    let kit = OfficeKit::init(install_path)?;
    Ok(Arc::new(kit))
}
