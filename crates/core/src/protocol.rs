//! Defines the JSON frame protocol spoken over the duplex channel.
//!
//! Inbound frames are decoded into the closed [`Frame`] union; anything that
//! fails to parse yields a [`DecodeError`] that callers log and discard.
//! Outbound traffic is the [`OutgoingMessage`] union, whose encoding cannot
//! fail.

use crate::models::ConversationTurn;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A frame decoding failure. Never fatal to the connection.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Messages sent from the backend to the client.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// Greeting sent once the channel is established.
    Welcome { message: String },
    /// A periodic push of externally sourced data, opaque to the session.
    Snapshot {
        domain: String,
        data: Value,
        #[serde(default)]
        cached: bool,
    },
    /// A complete, non-streamed assistant reply.
    #[serde(alias = "chat_response")]
    Reply { message: String },
    /// A fragment of a streamed assistant reply.
    ReplyChunk { chunk: String },
    /// Signals the end of a streamed reply.
    ReplyEnd,
    /// Envelope around one tool lifecycle event.
    ToolEvent {
        #[serde(default)]
        event: Option<ToolEvent>,
    },
    /// A server-side failure to report to the user.
    Error { message: String },
    /// An informational notice from the server.
    Info { message: String },
    /// Answer to an outbound keepalive ping.
    Pong,
    /// Any well-formed frame whose kind this client does not know.
    #[serde(other)]
    Unknown,
}

impl Frame {
    /// The wire tag of this frame, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Welcome { .. } => "welcome",
            Frame::Snapshot { .. } => "snapshot",
            Frame::Reply { .. } => "reply",
            Frame::ReplyChunk { .. } => "reply_chunk",
            Frame::ReplyEnd => "reply_end",
            Frame::ToolEvent { .. } => "tool_event",
            Frame::Error { .. } => "error",
            Frame::Info { .. } => "info",
            Frame::Pong => "pong",
            Frame::Unknown => "unknown",
        }
    }
}

/// One step of a tool invocation's lifecycle, as reported by the backend.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolEvent {
    ToolCallStart {
        tool_id: String,
        tool_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    ToolCallComplete {
        tool_id: String,
        #[serde(default)]
        tool_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<Value>,
    },
}

impl ToolEvent {
    pub fn tool_id(&self) -> &str {
        match self {
            ToolEvent::ToolCallStart { tool_id, .. } | ToolEvent::ToolCallComplete { tool_id, .. } => {
                tool_id
            }
        }
    }

    pub fn is_start(&self) -> bool {
        matches!(self, ToolEvent::ToolCallStart { .. })
    }
}

/// Messages sent from the client to the backend.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutgoingMessage {
    /// A user message with the recent conversation for context.
    Chat {
        message: String,
        chat_history: Vec<ConversationTurn>,
    },
    /// Keepalive ping; the backend answers with [`Frame::Pong`].
    Ping,
}

/// Parses one raw text frame.
pub fn decode(raw: &str) -> Result<Frame, DecodeError> {
    Ok(serde_json::from_str(raw)?)
}

/// Serializes an outgoing message to its wire text.
pub fn encode(msg: &OutgoingMessage) -> String {
    // Plain strings, timestamps and derived enums have no failing serialization path.
    serde_json::to_string(msg).expect("outgoing messages always serialize")
}

/// Serializes an inbound frame, as a backend would put it on the wire.
pub fn encode_frame(frame: &Frame) -> String {
    serde_json::to_string(frame).expect("frames always serialize")
}
