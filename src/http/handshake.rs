//! WebSocket opening handshake (RFC 6455 §4.2).
//!
//! # Responsibilities
//! - Decide whether a request is a WebSocket upgrade at all
//! - Validate the handshake headers in a fixed order
//! - Map every failure to a `400 Bad Request` with an empty body and `Connection: close`
//! - Produce the `101 Switching Protocols` response on success
//!
//! # Failure Taxonomy
//! ```text
//! no `Upgrade: websocket`         → NotWebSocket       → 400
//! not GET / no `Connection: upgrade` → NoHandshake     → 400
//! no Sec-WebSocket-Version        → NoVersion          → 400
//! version other than 13           → UnsupportedVersion → 400 + Sec-WebSocket-Version: 13
//! no Sec-WebSocket-Key            → NoKey              → 400
//! ```

use axum::http::header::{
    CONNECTION, CONTENT_LENGTH, SEC_WEBSOCKET_ACCEPT, SEC_WEBSOCKET_KEY, SEC_WEBSOCKET_VERSION,
    UPGRADE,
};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;

/// The only protocol version this server speaks.
pub const WEBSOCKET_VERSION: &str = "13";

/// A request that looked like a WebSocket upgrade but could not complete it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HandshakeError {
    #[error("no WebSocket handshake in request")]
    NoHandshake,

    #[error("missing Sec-WebSocket-Version header")]
    NoVersion,

    #[error("unsupported WebSocket version")]
    UnsupportedVersion,

    #[error("missing Sec-WebSocket-Key header")]
    NoKey,
}

/// Why a request never reached the open state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("not a WebSocket upgrade request")]
    NotWebSocket,

    #[error(transparent)]
    Handshake(#[from] HandshakeError),
}

impl Rejection {
    /// Stable label for logs and metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            Rejection::NotWebSocket => "not_websocket",
            Rejection::Handshake(HandshakeError::NoHandshake) => "no_handshake",
            Rejection::Handshake(HandshakeError::NoVersion) => "no_version",
            Rejection::Handshake(HandshakeError::UnsupportedVersion) => "unsupported_version",
            Rejection::Handshake(HandshakeError::NoKey) => "no_key",
        }
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        let mut response = StatusCode::BAD_REQUEST.into_response();
        let headers = response.headers_mut();
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("0"));
        headers.insert(CONNECTION, HeaderValue::from_static("close"));
        if self == Rejection::Handshake(HandshakeError::UnsupportedVersion) {
            headers.insert(
                SEC_WEBSOCKET_VERSION,
                HeaderValue::from_static(WEBSOCKET_VERSION),
            );
        }
        response
    }
}

/// Computed `Sec-WebSocket-Accept` for a valid handshake.
#[derive(Debug, Clone)]
pub struct Accept(HeaderValue);

impl Accept {
    /// The header value, for logging.
    pub fn as_str(&self) -> &str {
        self.0.to_str().unwrap_or_default()
    }
}

impl IntoResponse for Accept {
    fn into_response(self) -> Response {
        let mut response = StatusCode::SWITCHING_PROTOCOLS.into_response();
        let headers = response.headers_mut();
        headers.insert(CONNECTION, HeaderValue::from_static("upgrade"));
        headers.insert(UPGRADE, HeaderValue::from_static("websocket"));
        headers.insert(SEC_WEBSOCKET_ACCEPT, self.0);
        response
    }
}

/// `Upgrade: websocket`, compared case-insensitively.
pub fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get(UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("websocket"))
}

/// Whether any `Connection` header carries the `upgrade` token.
fn has_connection_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
}

/// Validate the handshake headers and derive the accept key.
pub fn validate(method: &Method, headers: &HeaderMap) -> Result<Accept, HandshakeError> {
    if *method != Method::GET || !has_connection_upgrade(headers) || !is_websocket_upgrade(headers)
    {
        return Err(HandshakeError::NoHandshake);
    }

    let version = headers
        .get(SEC_WEBSOCKET_VERSION)
        .map(|v| v.as_bytes())
        .filter(|v| !v.is_empty())
        .ok_or(HandshakeError::NoVersion)?;
    if version != WEBSOCKET_VERSION.as_bytes() {
        return Err(HandshakeError::UnsupportedVersion);
    }

    let key = headers
        .get(SEC_WEBSOCKET_KEY)
        .map(|v| v.as_bytes())
        .filter(|v| !v.is_empty())
        .ok_or(HandshakeError::NoKey)?;

    HeaderValue::from_str(&derive_accept_key(key))
        .map(Accept)
        .map_err(|_| HandshakeError::NoKey)
}
