//! Notifications the state core emits to whatever is observing a session.
//!
//! The core never renders anything. A view layer subscribes to the receiving
//! half of an [`EventSink`] and redraws from these events.

use crate::models::ConversationTurn;
use crate::tool_calls::ToolCall;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::trace;

/// Lifecycle state of the duplex channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Closed,
}

/// Events that the session emits to its observer.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The backend greeted the client.
    Welcome(String),
    /// An informational notice from the backend.
    Info(String),
    /// A fresh data snapshot for one domain.
    Snapshot {
        domain: String,
        data: Value,
        cached: bool,
    },
    /// Only the newly received fragment of a streamed reply.
    ReplyDelta(String),
    /// A turn was appended to the conversation history.
    TurnAppended(ConversationTurn),
    /// The tool-call active set changed; carries the whole set for re-render.
    ToolStateChanged { active: Vec<ToolCall> },
    /// The backend reported an error.
    ServerError(String),
    /// The duplex channel moved to a new state.
    Connection(ConnectionState),
    /// A reconnect attempt has been scheduled.
    ReconnectScheduled { attempt: u32, delay: Duration },
    /// Reconnect attempts are exhausted; no further automatic recovery.
    ConnectionExhausted { attempts: u32 },
}

/// Sending half shared by every component that notifies the observer.
///
/// Sends never block and a dropped receiver is ignored, so observation can
/// never stall or fail a state transition.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<SessionEvent>>,
}

impl EventSink {
    /// Creates a sink and the receiver an observer reads from.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A sink that discards every event.
    pub fn detached() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: SessionEvent) {
        if let Some(tx) = &self.tx {
            if tx.send(event).is_err() {
                trace!("Observer dropped; event discarded.");
            }
        }
    }
}
