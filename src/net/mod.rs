//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection (accepted by axum::serve)
//!     → HTTP layer (handshake)
//!     → connection.rs (identity, live-connection tracking)
//!
//! Connection States:
//!     Handshaking → Open → Closed
//!               ↘ Rejected
//! ```

pub mod connection;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionTracker};
