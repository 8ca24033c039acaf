//! HTTP and WebSocket protocol handling.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum, request ID, tracing)
//!     → factory.rs (log request, create one handler)
//!     → handler.rs (handshake.rs validation → 101 or 400)
//!     → handler.rs receive loop (websocket.rs frames → Session)
//! ```

pub mod factory;
pub mod handler;
pub mod handshake;
pub mod server;
pub mod websocket;

pub use factory::{HandlerFactory, SessionHandlerFactory};
pub use handler::{receive_loop, Closure, ConnectionHandler, ConnectionState};
pub use handshake::{HandshakeError, Rejection, WEBSOCKET_VERSION};
pub use server::HttpServer;
pub use websocket::{Frame, FrameError, FrameReader, FrameSource, OpCode};
