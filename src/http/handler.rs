//! Connection handler: handshake and frame state machine.
//!
//! # States
//! ```text
//! Handshaking ──valid handshake──→ Open ──close frame / EOF / error──→ Closed
//!      │
//!      └──invalid request──→ Rejected (400, no session)
//! ```
//!
//! The session is created on the `Handshaking → Open` edge and released on
//! the `Open → Closed` edge, so it exists exactly while the connection is
//! open. Any other transition is a programming error.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::Request;
use axum::response::{IntoResponse, Response};
use futures_util::StreamExt;
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;
use tokio_tungstenite::tungstenite::protocol::{Role, WebSocketConfig};
use tokio_tungstenite::WebSocketStream;
use tracing::Instrument;

use crate::config::WebSocketSettings;
use crate::engine::Engine;
use crate::http::handshake::{self, Accept, HandshakeError, Rejection};
use crate::http::websocket::{FrameError, FrameReader, FrameSource, OpCode};
use crate::net::{ConnectionGuard, ConnectionId, ConnectionTracker};
use crate::observability::metrics;
use crate::session::{spawn_writer, Outbox, Replies, Session};

/// How long the writer may take to flush after the session is released.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Socket limits for an upgraded connection. Frames and messages above
/// `max_message_bytes` fail the read instead of being buffered.
pub fn socket_config(settings: &WebSocketSettings) -> WebSocketConfig {
    WebSocketConfig::default()
        .max_message_size(Some(settings.max_message_bytes))
        .max_frame_size(Some(settings.max_message_bytes))
}

/// Why an open connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Closure {
    /// The peer sent a close frame.
    CloseFrame,
    /// The transport ended, or a read returned no bytes.
    EndOfStream,
    /// The peer violated the framing protocol.
    ProtocolError(String),
    /// The socket failed.
    TransportError(String),
}

impl Closure {
    /// Stable label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Closure::CloseFrame => "close_frame",
            Closure::EndOfStream => "end_of_stream",
            Closure::ProtocolError(_) => "protocol_error",
            Closure::TransportError(_) => "transport_error",
        }
    }
}

/// Lifecycle of one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Handshaking,
    Open,
    Closed(Closure),
    Rejected(Rejection),
}

impl ConnectionState {
    pub fn name(&self) -> &'static str {
        match self {
            ConnectionState::Handshaking => "handshaking",
            ConnectionState::Open => "open",
            ConnectionState::Closed(_) => "closed",
            ConnectionState::Rejected(_) => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConnectionState::Closed(_) | ConnectionState::Rejected(_)
        )
    }

    /// Whether `next` is a legal successor of this state.
    pub fn permits(&self, next: &ConnectionState) -> bool {
        matches!(
            (self, next),
            (ConnectionState::Handshaking, ConnectionState::Open)
                | (ConnectionState::Handshaking, ConnectionState::Rejected(_))
                | (ConnectionState::Open, ConnectionState::Closed(_))
        )
    }
}

/// Drive `session` from `source` until the connection ends.
///
/// Every non-empty data frame is forwarded in receive order. A close frame,
/// an empty read, the end of the stream or a read error stops the loop.
pub async fn receive_loop<S: FrameSource>(source: &mut S, session: &mut Session) -> Closure {
    loop {
        let frame = match source.next_frame().await {
            Ok(Some(frame)) => frame,
            Ok(None) => return Closure::EndOfStream,
            Err(FrameError::Protocol(e)) => return Closure::ProtocolError(e),
            Err(FrameError::Transport(e)) => return Closure::TransportError(e),
        };

        tracing::debug!(
            connection_id = %session.id(),
            length = frame.len(),
            opcode = ?frame.opcode,
            "Frame received"
        );

        if frame.opcode == OpCode::Close {
            return Closure::CloseFrame;
        }
        if frame.is_empty() {
            return Closure::EndOfStream;
        }

        metrics::record_frame(frame.len());
        session.handle_input(&frame.payload);
    }
}

/// Handles one inbound request from handshake to teardown.
pub struct ConnectionHandler {
    id: ConnectionId,
    peer: Option<SocketAddr>,
    engine: Arc<dyn Engine>,
    settings: WebSocketSettings,
    tracker: ConnectionTracker,
    state: ConnectionState,
    session: Option<Session>,
    guard: Option<ConnectionGuard>,
    opened_at: Option<Instant>,
}

impl ConnectionHandler {
    pub fn new(
        id: ConnectionId,
        peer: Option<SocketAddr>,
        engine: Arc<dyn Engine>,
        settings: WebSocketSettings,
        tracker: ConnectionTracker,
    ) -> Self {
        Self {
            id,
            peer,
            engine,
            settings,
            tracker,
            state: ConnectionState::Handshaking,
            session: None,
            guard: None,
            opened_at: None,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// The session, while the connection is open.
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Answer `request`. On a valid handshake the connection continues on
    /// its own task once the `101` response has been sent.
    pub fn handle(mut self, mut request: Request) -> Response {
        match self.handshake(&mut request) {
            Ok((accept, on_upgrade, replies)) => {
                tracing::debug!(
                    connection_id = %self.id,
                    accept = accept.as_str(),
                    "Handshake accepted"
                );
                let span = tracing::info_span!(
                    "connection",
                    id = %self.id,
                    peer = ?self.peer
                );
                tokio::spawn(self.serve(on_upgrade, replies).instrument(span));
                accept.into_response()
            }
            Err(rejection) => self.reject(rejection),
        }
    }

    /// Handshaking: validate the request and open on success.
    fn handshake(
        &mut self,
        request: &mut Request,
    ) -> Result<(Accept, OnUpgrade, Replies), Rejection> {
        if !handshake::is_websocket_upgrade(request.headers()) {
            return Err(Rejection::NotWebSocket);
        }

        let accept = handshake::validate(request.method(), request.headers())?;
        let on_upgrade = request
            .extensions_mut()
            .remove::<OnUpgrade>()
            .ok_or(HandshakeError::NoHandshake)?;

        Ok((accept, on_upgrade, self.open()))
    }

    /// Handshaking → Rejected.
    fn reject(&mut self, rejection: Rejection) -> Response {
        tracing::warn!(
            connection_id = %self.id,
            peer = ?self.peer,
            reason = rejection.reason(),
            error = %rejection,
            "WebSocket handshake rejected"
        );
        metrics::record_rejection(rejection.reason());
        self.transition(ConnectionState::Rejected(rejection));
        rejection.into_response()
    }

    /// Handshaking → Open. Creates the session.
    fn open(&mut self) -> Replies {
        let (outbox, replies) = Outbox::channel();
        self.session = Some(Session::open(self.engine.as_ref(), self.id, outbox));
        self.guard = Some(self.tracker.track(self.id));
        self.opened_at = Some(Instant::now());
        metrics::record_connection_opened();
        self.transition(ConnectionState::Open);

        tracing::info!(connection_id = %self.id, peer = ?self.peer, "WebSocket connection established");
        replies
    }

    /// Open: take over the upgraded socket and pump frames until it ends.
    async fn serve(mut self, on_upgrade: OnUpgrade, replies: Replies) {
        let upgraded = match on_upgrade.await {
            Ok(upgraded) => upgraded,
            Err(e) => {
                self.close(Closure::TransportError(e.to_string()));
                return;
            }
        };

        let config = socket_config(&self.settings);
        let socket =
            WebSocketStream::from_raw_socket(TokioIo::new(upgraded), Role::Server, Some(config))
                .await;
        let (sink, stream) = socket.split();
        let writer = spawn_writer(sink, replies, self.id);
        let mut frames = FrameReader::new(stream, self.settings.receive_buffer_bytes);

        let closure = match self.session.as_mut() {
            Some(session) => receive_loop(&mut frames, session).await,
            None => Closure::TransportError("connection opened without a session".into()),
        };
        self.close(closure);

        match tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer).await {
            Ok(Ok(written)) => {
                tracing::trace!(connection_id = %self.id, replies = written, "Writer finished")
            }
            Ok(Err(e)) => tracing::error!(connection_id = %self.id, error = %e, "Writer task failed"),
            Err(_) => tracing::warn!(connection_id = %self.id, "Writer did not drain in time"),
        }
    }

    /// Open → Closed. Releases the session.
    fn close(&mut self, closure: Closure) {
        let (chunks, bytes) = self
            .session
            .as_ref()
            .map_or((0, 0), |s| (s.chunks(), s.bytes()));
        match &closure {
            Closure::CloseFrame | Closure::EndOfStream => tracing::info!(
                connection_id = %self.id,
                closure = closure.label(),
                chunks,
                bytes,
                "WebSocket connection closed"
            ),
            Closure::ProtocolError(e) | Closure::TransportError(e) => tracing::warn!(
                connection_id = %self.id,
                closure = closure.label(),
                chunks,
                bytes,
                error = %e,
                "WebSocket connection failed"
            ),
        }
        if let Some(opened_at) = self.opened_at {
            metrics::record_connection_closed(closure.label(), opened_at);
        }
        self.transition(ConnectionState::Closed(closure));
        self.session = None;
        self.guard = None;
    }

    fn transition(&mut self, next: ConnectionState) {
        let legal = self.state.permits(&next);
        if !legal {
            tracing::error!(
                connection_id = %self.id,
                from = self.state.name(),
                to = next.name(),
                "Illegal connection state transition"
            );
        }
        debug_assert!(
            legal,
            "illegal transition {} -> {}",
            self.state.name(),
            next.name()
        );
        if legal {
            self.state = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use axum::body::Body;
    use axum::http::{header, StatusCode};

    use crate::engine::EngineSession;
    use crate::http::websocket::Frame;

    #[derive(Default)]
    struct Record {
        opened: usize,
        released: usize,
        inputs: Vec<Vec<u8>>,
    }

    #[derive(Default, Clone)]
    struct RecordingEngine(Arc<Mutex<Record>>);

    struct RecordingSession(Arc<Mutex<Record>>);

    impl Engine for RecordingEngine {
        fn name(&self) -> &str {
            "recording"
        }

        fn open_session(&self, _id: ConnectionId, _outbox: Outbox) -> Box<dyn EngineSession> {
            self.0.lock().unwrap().opened += 1;
            Box::new(RecordingSession(self.0.clone()))
        }
    }

    impl EngineSession for RecordingSession {
        fn handle_input(&mut self, chunk: &[u8]) {
            self.0.lock().unwrap().inputs.push(chunk.to_vec());
        }
    }

    impl Drop for RecordingSession {
        fn drop(&mut self) {
            self.0.lock().unwrap().released += 1;
        }
    }

    struct ScriptedSource(VecDeque<Result<Option<Frame>, FrameError>>);

    impl ScriptedSource {
        fn new(reads: Vec<Result<Option<Frame>, FrameError>>) -> Self {
            Self(reads.into())
        }
    }

    impl FrameSource for ScriptedSource {
        async fn next_frame(&mut self) -> Result<Option<Frame>, FrameError> {
            self.0.pop_front().unwrap_or(Ok(None))
        }
    }

    fn text(payload: &'static str) -> Result<Option<Frame>, FrameError> {
        Ok(Some(Frame::new(OpCode::Text, payload)))
    }

    fn handler(engine: &RecordingEngine) -> ConnectionHandler {
        ConnectionHandler::new(
            ConnectionId::new(),
            None,
            Arc::new(engine.clone()),
            WebSocketSettings::default(),
            ConnectionTracker::new(),
        )
    }

    fn open_session(engine: &RecordingEngine) -> Session {
        let (outbox, _replies) = Outbox::channel();
        Session::open(engine, ConnectionId::new(), outbox)
    }

    #[test]
    fn socket_limits_follow_settings() {
        let settings = WebSocketSettings {
            max_message_bytes: 64 * 1024,
            ..WebSocketSettings::default()
        };
        let config = socket_config(&settings);
        assert_eq!(config.max_message_size, Some(64 * 1024));
        assert_eq!(config.max_frame_size, Some(64 * 1024));
    }

    #[test]
    fn legal_transitions() {
        use ConnectionState::*;
        let rejected = Rejected(Rejection::NotWebSocket);
        let closed = Closed(Closure::CloseFrame);

        assert!(Handshaking.permits(&Open));
        assert!(Handshaking.permits(&rejected));
        assert!(Open.permits(&closed));

        assert!(!Handshaking.permits(&closed));
        assert!(!Open.permits(&rejected));
        assert!(!closed.permits(&Closed(Closure::EndOfStream)));
        assert!(!rejected.permits(&Open));
        assert!(closed.is_terminal() && rejected.is_terminal());
        assert!(!Open.is_terminal());
    }

    #[tokio::test]
    async fn frames_forwarded_in_order_until_close() {
        let engine = RecordingEngine::default();
        let mut session = open_session(&engine);
        let mut source = ScriptedSource::new(vec![
            text("A"),
            text("B"),
            text("C"),
            Ok(Some(Frame::close())),
            text("after close"),
        ]);

        let closure = receive_loop(&mut source, &mut session).await;

        assert_eq!(closure, Closure::CloseFrame);
        assert_eq!(
            engine.0.lock().unwrap().inputs,
            vec![b"A".to_vec(), b"B".to_vec(), b"C".to_vec()]
        );
        assert_eq!(session.chunks(), 3);
    }

    #[tokio::test]
    async fn empty_read_ends_the_loop() {
        let engine = RecordingEngine::default();
        let mut session = open_session(&engine);
        let mut source = ScriptedSource::new(vec![
            text("A"),
            Ok(Some(Frame::new(OpCode::Binary, ""))),
            text("B"),
        ]);

        assert_eq!(
            receive_loop(&mut source, &mut session).await,
            Closure::EndOfStream
        );
        assert_eq!(engine.0.lock().unwrap().inputs, vec![b"A".to_vec()]);
    }

    #[tokio::test]
    async fn end_of_stream_and_errors_end_the_loop() {
        let engine = RecordingEngine::default();
        let mut session = open_session(&engine);

        let mut source = ScriptedSource::new(vec![Ok(None)]);
        assert_eq!(
            receive_loop(&mut source, &mut session).await,
            Closure::EndOfStream
        );

        let mut source =
            ScriptedSource::new(vec![text("A"), Err(FrameError::Protocol("bad".into()))]);
        assert_eq!(
            receive_loop(&mut source, &mut session).await,
            Closure::ProtocolError("bad".into())
        );

        let mut source = ScriptedSource::new(vec![Err(FrameError::Transport("reset".into()))]);
        assert_eq!(
            receive_loop(&mut source, &mut session).await,
            Closure::TransportError("reset".into())
        );
        assert_eq!(engine.0.lock().unwrap().inputs.len(), 1);
    }

    #[test]
    fn plain_http_is_rejected_without_session() {
        let engine = RecordingEngine::default();
        let mut handler = handler(&engine);
        let mut request = axum::http::Request::builder().uri("/").body(Body::empty()).unwrap();

        let rejection = handler.handshake(&mut request).unwrap_err();
        assert_eq!(rejection, Rejection::NotWebSocket);

        let response = handler.reject(rejection);
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "0");
        assert_eq!(
            handler.state(),
            &ConnectionState::Rejected(Rejection::NotWebSocket)
        );
        assert!(handler.session().is_none());
        assert_eq!(engine.0.lock().unwrap().opened, 0);
    }

    #[test]
    fn request_without_upgrade_io_is_no_handshake() {
        let engine = RecordingEngine::default();
        let mut handler = handler(&engine);
        let mut request = axum::http::Request::builder()
            .uri("/ws")
            .header(header::UPGRADE, "websocket")
            .header(header::CONNECTION, "Upgrade")
            .header(header::SEC_WEBSOCKET_VERSION, "13")
            .header(header::SEC_WEBSOCKET_KEY, "dGhlIHNhbXBsZSBub25jZQ==")
            .body(Body::empty())
            .unwrap();

        let rejection = handler.handshake(&mut request).unwrap_err();
        assert_eq!(rejection, Rejection::Handshake(HandshakeError::NoHandshake));
        assert_eq!(engine.0.lock().unwrap().opened, 0);
    }

    #[test]
    fn session_lives_exactly_while_open() {
        let engine = RecordingEngine::default();
        let tracker = ConnectionTracker::new();
        let mut handler = ConnectionHandler::new(
            ConnectionId::new(),
            None,
            Arc::new(engine.clone()),
            WebSocketSettings::default(),
            tracker.clone(),
        );

        let _replies = handler.open();
        assert_eq!(handler.state(), &ConnectionState::Open);
        assert!(handler.session().is_some());
        assert_eq!(tracker.active_count(), 1);

        handler.close(Closure::CloseFrame);
        assert_eq!(
            handler.state(),
            &ConnectionState::Closed(Closure::CloseFrame)
        );
        assert!(handler.session().is_none());
        assert_eq!(tracker.active_count(), 0);

        let record = engine.0.lock().unwrap();
        assert_eq!(record.opened, 1);
        assert_eq!(record.released, 1);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "illegal transition")]
    fn closing_twice_is_a_programming_error() {
        let engine = RecordingEngine::default();
        let mut handler = handler(&engine);
        let _replies = handler.open();
        handler.close(Closure::EndOfStream);
        handler.close(Closure::EndOfStream);
    }
}
