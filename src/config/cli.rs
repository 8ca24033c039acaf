//! Command-line surface.
//!
//! Flags override values from the optional config file, which override the
//! built-in defaults. Validation runs once on the merged result.

use std::path::PathBuf;

use clap::Parser;

use crate::config::loader::{read_config, ConfigError};
use crate::config::schema::ServerConfig;
use crate::config::validation::validate_config;

#[derive(Debug, Parser)]
#[command(name = "loolwsd")]
#[command(about = "LibreOffice On-Line WebSocket server.", long_about = None)]
pub struct Cli {
    /// port number to listen to (default: 9980)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// path to LibreOffice installation
    #[arg(short, long, value_name = "directory", required_unless_present = "config")]
    pub lopath: Option<PathBuf>,

    /// interactive testing
    #[arg(short, long)]
    pub test: bool,

    /// TOML configuration file
    #[arg(short, long, value_name = "file")]
    pub config: Option<PathBuf>,
}

impl Cli {
    /// Merge flags over the config file (or defaults) and validate.
    pub fn into_config(self) -> Result<ServerConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => read_config(path)?,
            None => ServerConfig::default(),
        };

        if let Some(port) = self.port {
            config.listener.port = port;
        }
        if let Some(path) = self.lopath {
            config.engine.install_path = Some(path);
        }
        if self.test {
            config.probe.enabled = true;
        }

        validate_config(&config).map_err(ConfigError::Validation)?;
        Ok(config)
    }
}
