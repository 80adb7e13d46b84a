//! antrikshGPT Session Library Crate
//!
//! This library contains the I/O side of a chat session: configuration, the
//! WebSocket connection manager, the HTTP fallback transport and the session
//! event loop that feeds everything into the `antriksh-core` state. The
//! `client` binary is a thin wrapper around this library.

pub mod config;
pub mod error;
pub mod fallback;
pub mod ws;
