//! Streamed reply reassembly.
//!
//! Fragments are appended to a raw text buffer as they arrive. Only the new
//! fragment is forwarded to observers; the accumulated buffer is never
//! re-processed per chunk, and the whole text becomes a single assistant turn
//! when the stream ends.

use crate::events::{EventSink, SessionEvent};
use crate::history::HistoryBuffer;
use crate::models::ConversationTurn;
use chrono::{DateTime, Utc};
use tracing::debug;

/// The assistant reply currently being streamed.
#[derive(Debug, Clone)]
pub struct StreamingMessage {
    pub text: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct StreamReassembler {
    current: Option<StreamingMessage>,
    events: EventSink,
}

impl StreamReassembler {
    pub fn new(events: EventSink) -> Self {
        Self {
            current: None,
            events,
        }
    }

    /// Appends a fragment, opening a new message if none is in progress.
    pub fn chunk(&mut self, text: &str) {
        let message = self.current.get_or_insert_with(|| {
            debug!("Streaming reply started");
            StreamingMessage {
                text: String::new(),
                created_at: Utc::now(),
            }
        });
        message.text.push_str(text);
        self.events.emit(SessionEvent::ReplyDelta(text.to_string()));
    }

    /// Finalizes the in-progress message into `history`.
    ///
    /// Returns the appended turn, or `None` when no message was streaming
    /// (a duplicate end).
    pub fn end(&mut self, history: &mut HistoryBuffer) -> Option<ConversationTurn> {
        let Some(message) = self.current.take() else {
            debug!("Reply end without an active stream ignored");
            return None;
        };
        let turn = ConversationTurn::assistant(message.text);
        debug!(
            chars = turn.content.len(),
            streamed_ms = (turn.timestamp - message.created_at).num_milliseconds(),
            "Streaming reply finalized"
        );
        history.append(turn.clone());
        self.events.emit(SessionEvent::TurnAppended(turn.clone()));
        Some(turn)
    }

    /// Discards any partial message without recording it.
    pub fn reset(&mut self) {
        self.current = None;
    }

    pub fn current(&self) -> Option<&StreamingMessage> {
        self.current.as_ref()
    }

    pub fn is_streaming(&self) -> bool {
        self.current.is_some()
    }
}
