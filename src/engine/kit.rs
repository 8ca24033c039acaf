//! Office kit engine.
//!
//! Initialisation locates the kit's shared library inside an installation
//! directory, either at the top level or under `program/`, the same places
//! the kit's own loader looks. A missing library is fatal at startup.

use std::path::{Path, PathBuf};

use crate::engine::{Engine, EngineError, EngineSession};
use crate::net::ConnectionId;
use crate::session::Outbox;

/// Library names the kit ships under, in lookup order.
const KIT_LIBRARIES: &[&str] = &[
    "libsofficeapp.so",
    "libmergedlo.so",
    "libsofficeapp.dylib",
    "libmergedlo.dylib",
];

/// Handle to an initialised office kit installation.
#[derive(Debug, Clone)]
pub struct OfficeKit {
    install_path: PathBuf,
    library: PathBuf,
}

impl OfficeKit {
    /// Locate the kit under `install_path`.
    pub fn init(install_path: &Path) -> Result<Self, EngineError> {
        if !install_path.is_dir() {
            return Err(EngineError::NotADirectory(install_path.to_path_buf()));
        }

        let library = [install_path.to_path_buf(), install_path.join("program")]
            .into_iter()
            .flat_map(|dir| KIT_LIBRARIES.iter().map(move |name| dir.join(name)))
            .find(|candidate| candidate.is_file())
            .ok_or_else(|| EngineError::LibraryNotFound(install_path.to_path_buf()))?;

        tracing::info!(
            install_path = %install_path.display(),
            library = %library.display(),
            "Office kit located"
        );

        Ok(Self {
            install_path: install_path.to_path_buf(),
            library,
        })
    }

    pub fn install_path(&self) -> &Path {
        &self.install_path
    }

    /// The shared library that was found.
    pub fn library(&self) -> &Path {
        &self.library
    }
}

impl Engine for OfficeKit {
    fn name(&self) -> &str {
        "office-kit"
    }

    fn open_session(&self, id: ConnectionId, _outbox: Outbox) -> Box<dyn EngineSession> {
        tracing::debug!(
            connection_id = %id,
            install_path = %self.install_path().display(),
            library = %self.library().display(),
            "Kit session opened"
        );
        Box::new(KitSession { id, commands: 0 })
    }
}

/// One client's view of the kit.
///
/// Command interpretation belongs to the kit; here each chunk is traced by
/// its leading line.
struct KitSession {
    id: ConnectionId,
    commands: u64,
}

impl EngineSession for KitSession {
    fn handle_input(&mut self, chunk: &[u8]) {
        self.commands += 1;
        let line = chunk.split(|b| *b == b'\n').next().unwrap_or_default();
        tracing::debug!(
            connection_id = %self.id,
            seq = self.commands,
            command = %String::from_utf8_lossy(line),
            "Kit input"
        );
    }
}
