//! Duplex Channel Session Management
//!
//! This module contains the client side of a real-time chat session. It is
//! structured into submodules:
//!
//! - `connection`: Opens the WebSocket, tracks its lifecycle and reconnects with backoff.
//! - `session`: The per-session event loop that routes frames and user input.

pub mod connection;
pub mod session;

pub use connection::{ConnectionManager, Connector, ReconnectPolicy, WsConnector};
pub use session::{Session, SessionHandle};
