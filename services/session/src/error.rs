//! Error types for the transport and session layers.

use tokio_tungstenite::tungstenite;

/// Failures of the duplex channel or the HTTP fallback.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to open channel to {url}: {reason}")]
    Connect { url: String, reason: String },
    #[error("channel error: {0}")]
    Channel(#[from] tungstenite::Error),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("backend answered with status {0}")]
    Status(reqwest::StatusCode),
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("channel is not open")]
    NotConnected,
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("gave up reconnecting after {attempts} attempts")]
    ConnectionExhausted { attempts: u32 },
    #[error("session has shut down")]
    Closed,
}
