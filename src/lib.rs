//! LibreOffice On-Line WebSocket front end.
//!
//! Accepts HTTP upgrade requests, completes the WebSocket handshake, binds
//! each connection to its own engine session and forwards received payload
//! chunks to it in order.

pub mod config;
pub mod engine;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod probe;
pub mod session;

pub use config::ServerConfig;
pub use http::HttpServer;
pub use lifecycle::{ExitStatus, Shutdown, Supervisor};
