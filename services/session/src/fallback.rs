//! Fallback Transport
//!
//! A stateless HTTP request/response path used whenever the duplex channel is
//! not open. The reply is turned back into the same frames the channel would
//! have carried, so tool calls go through a single code path.

use crate::error::TransportError;
use antriksh_core::models::ConversationTurn;
use antriksh_core::protocol::{Frame, ToolEvent};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error, warn};

pub const APOLOGY: &str =
    "Sorry, I'm having trouble reaching the server right now. Please try again in a moment.";

#[derive(Serialize, Debug)]
struct ChatRequest<'a> {
    message: &'a str,
    chat_history: &'a [ConversationTurn],
}

#[derive(Deserialize, Debug)]
struct ChatResponse {
    response: String,
    /// Absent and `null` both mean no tool calls.
    #[serde(default)]
    tool_call_events: Option<Vec<Value>>,
}

/// What one fallback exchange produced.
#[derive(Debug, Clone, PartialEq)]
pub struct FallbackReply {
    pub reply: String,
    pub tool_events: Vec<ToolEvent>,
}

impl FallbackReply {
    pub fn apology() -> Self {
        Self {
            reply: APOLOGY.to_string(),
            tool_events: Vec::new(),
        }
    }

    /// Replays the exchange as inbound frames: every start, then every
    /// completion, then the reply itself.
    pub fn into_frames(self) -> Vec<Frame> {
        let (starts, completes): (Vec<_>, Vec<_>) =
            self.tool_events.into_iter().partition(ToolEvent::is_start);
        starts
            .into_iter()
            .chain(completes)
            .map(|event| Frame::ToolEvent { event: Some(event) })
            .chain(std::iter::once(Frame::Reply {
                message: self.reply,
            }))
            .collect()
    }
}

#[derive(Clone, Debug)]
pub struct FallbackTransport {
    client: reqwest::Client,
    url: String,
}

impl FallbackTransport {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    /// Sends one message. Failures are absorbed into an apology reply.
    pub async fn request(&self, message: &str, history: &[ConversationTurn]) -> FallbackReply {
        match self.try_request(message, history).await {
            Ok(reply) => reply,
            Err(e) => {
                error!(error = %e, url = %self.url, "Fallback request failed");
                FallbackReply::apology()
            }
        }
    }

    async fn try_request(
        &self,
        message: &str,
        history: &[ConversationTurn],
    ) -> Result<FallbackReply, TransportError> {
        let response = self
            .client
            .post(&self.url)
            .json(&ChatRequest {
                message,
                chat_history: history,
            })
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status));
        }

        let body: ChatResponse = response.json().await?;
        let tool_events = body
            .tool_call_events
            .unwrap_or_default()
            .into_iter()
            .filter_map(|raw| match serde_json::from_value::<ToolEvent>(raw) {
                Ok(event) => Some(event),
                Err(e) => {
                    warn!(error = %e, "Dropping malformed fallback tool event");
                    None
                }
            })
            .collect::<Vec<_>>();
        debug!(tool_events = tool_events.len(), "Fallback reply received");

        Ok(FallbackReply {
            reply: body.response,
            tool_events,
        })
    }
}
