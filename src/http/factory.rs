//! Per-request handler construction.
//!
//! The server asks a [`HandlerFactory`] for one [`ConnectionHandler`] per
//! inbound request. The factory holds the only state shared between
//! connections: the read-only engine handle and the connection tracker.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::Request;

use crate::config::WebSocketSettings;
use crate::engine::Engine;
use crate::http::handler::ConnectionHandler;
use crate::net::{ConnectionId, ConnectionTracker};
use crate::observability::metrics;

/// Produces an isolated handler for each inbound request.
pub trait HandlerFactory: Send + Sync + 'static {
    fn create_handler(&self, peer: Option<SocketAddr>, request: &Request) -> ConnectionHandler;
}

/// Factory binding every handler to the shared engine.
#[derive(Clone)]
pub struct SessionHandlerFactory {
    engine: Arc<dyn Engine>,
    settings: WebSocketSettings,
    tracker: ConnectionTracker,
}

impl SessionHandlerFactory {
    pub fn new(
        engine: Arc<dyn Engine>,
        settings: WebSocketSettings,
        tracker: ConnectionTracker,
    ) -> Self {
        Self {
            engine,
            settings,
            tracker,
        }
    }

    #[cfg(test)]
    fn tracker(&self) -> &ConnectionTracker {
        &self.tracker
    }
}

impl HandlerFactory for SessionHandlerFactory {
    fn create_handler(&self, peer: Option<SocketAddr>, request: &Request) -> ConnectionHandler {
        let id = ConnectionId::new();
        let request_id = request
            .headers()
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown");

        tracing::info!(
            connection_id = %id,
            request_id = %request_id,
            peer = ?peer,
            method = %request.method(),
            uri = %request.uri(),
            version = ?request.version(),
            "Request received"
        );
        for (name, value) in request.headers() {
            tracing::info!(
                connection_id = %id,
                header = %name,
                value = %String::from_utf8_lossy(value.as_bytes()),
                "Request header"
            );
        }
        metrics::record_request(request.method().as_str());

        ConnectionHandler::new(
            id,
            peer,
            Arc::clone(&self.engine),
            self.settings.clone(),
            self.tracker.clone(),
        )
    }
}
