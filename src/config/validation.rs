//! Configuration validation.
//!
//! Serde handles syntax; this module checks the values make sense together.
//! All problems are reported at once rather than stopping at the first.

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::ServerConfig;

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("engine.install_path is required (use --lopath)")]
    MissingInstallPath,

    #[error("websocket.receive_buffer_bytes must be greater than zero")]
    ZeroReceiveBuffer,

    #[error("websocket.max_message_bytes must be at least receive_buffer_bytes ({0})")]
    MessageLimitBelowBuffer(usize),

    #[error("invalid listen address {0:?}")]
    InvalidBindAddress(String),

    #[error("invalid metrics address {0:?}")]
    InvalidMetricsAddress(String),

    #[error("probe.path must start with '/', got {0:?}")]
    InvalidProbePath(String),
}

/// Check a merged configuration.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.engine.install_path.is_none() {
        errors.push(ValidationError::MissingInstallPath);
    }

    if config.websocket.receive_buffer_bytes == 0 {
        errors.push(ValidationError::ZeroReceiveBuffer);
    }

    let buffer = config.websocket.receive_buffer_bytes.max(1);
    if config.websocket.max_message_bytes < buffer {
        errors.push(ValidationError::MessageLimitBelowBuffer(buffer));
    }

    let bind_address = config.listener.bind_address();
    if bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidBindAddress(bind_address));
    }

    let metrics = &config.observability;
    if metrics.metrics_enabled && metrics.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidMetricsAddress(
            metrics.metrics_address.clone(),
        ));
    }

    if !config.probe.path.starts_with('/') {
        errors.push(ValidationError::InvalidProbePath(config.probe.path.clone()));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> ServerConfig {
        let mut config = ServerConfig::default();
        config.engine.install_path = Some("/opt/office".into());
        config
    }

    #[test]
    fn defaults_with_install_path_pass() {
        assert_eq!(validate_config(&valid()), Ok(()));
    }

    #[test]
    fn install_path_is_required() {
        let errors = validate_config(&ServerConfig::default()).unwrap_err();
        assert_eq!(errors, vec![ValidationError::MissingInstallPath]);
    }

    #[test]
    fn reports_every_problem() {
        let mut config = ServerConfig::default();
        config.websocket.receive_buffer_bytes = 0;
        config.listener.bind_host = "not a host".into();
        config.probe.path = "ws".into();

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 4);
        assert!(errors.contains(&ValidationError::ZeroReceiveBuffer));
        assert!(errors.contains(&ValidationError::InvalidProbePath("ws".into())));
    }

    #[test]
    fn message_limit_must_hold_one_read() {
        let mut config = valid();
        config.websocket.receive_buffer_bytes = 4096;
        config.websocket.max_message_bytes = 4095;
        assert_eq!(
            validate_config(&config),
            Err(vec![ValidationError::MessageLimitBelowBuffer(4096)])
        );

        config.websocket.max_message_bytes = 4096;
        assert_eq!(validate_config(&config), Ok(()));
    }

    #[test]
    fn metrics_address_only_checked_when_enabled() {
        let mut config = valid();
        config.observability.metrics_address = "nowhere".into();
        assert_eq!(validate_config(&config), Ok(()));

        config.observability.metrics_enabled = true;
        assert_eq!(
            validate_config(&config),
            Err(vec![ValidationError::InvalidMetricsAddress("nowhere".into())])
        );
    }
}
