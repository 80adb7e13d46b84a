//! Session state core for the antrikshGPT chat client.
//!
//! Everything here is transport-agnostic: the frame protocol, the
//! conversation history, the tool-call tracker, the streamed reply
//! reassembler and the router that ties them together. The duplex channel
//! and the HTTP fallback live in the `antriksh-session` service.

pub mod events;
pub mod history;
pub mod models;
pub mod protocol;
pub mod reassembler;
pub mod router;
pub mod tool_calls;

pub use events::{ConnectionState, EventSink, SessionEvent};
pub use history::HistoryBuffer;
pub use models::{ConversationTurn, Role};
pub use protocol::{DecodeError, Frame, OutgoingMessage, ToolEvent};
pub use router::MessageRouter;
pub use tool_calls::{ToolCall, ToolCallStatus, ToolCallTracker, ToolOutcome};
