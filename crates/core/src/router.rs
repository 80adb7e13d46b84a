//! Message Router
//!
//! Owns the per-session state (history, tool tracker, reassembler, latest
//! snapshots) and dispatches each decoded frame to the component that
//! consumes its kind. Dispatch is synchronous and happens in arrival order.

use crate::events::{EventSink, SessionEvent};
use crate::history::HistoryBuffer;
use crate::models::ConversationTurn;
use crate::protocol::Frame;
use crate::reassembler::StreamReassembler;
use crate::tool_calls::ToolCallTracker;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// The latest snapshot received for one domain.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub data: Value,
    pub cached: bool,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct MessageRouter {
    history: HistoryBuffer,
    tracker: ToolCallTracker,
    reassembler: StreamReassembler,
    snapshots: HashMap<String, Snapshot>,
    events: EventSink,
}

impl MessageRouter {
    pub fn new(
        history: HistoryBuffer,
        tracker: ToolCallTracker,
        reassembler: StreamReassembler,
        events: EventSink,
    ) -> Self {
        Self {
            history,
            tracker,
            reassembler,
            snapshots: HashMap::new(),
            events,
        }
    }

    pub fn dispatch(&mut self, frame: Frame) {
        match frame {
            Frame::Welcome { message } => {
                info!(%message, "Backend welcome received");
                self.events.emit(SessionEvent::Welcome(message));
            }
            Frame::Snapshot {
                domain,
                data,
                cached,
            } => {
                debug!(%domain, cached, "Snapshot received");
                self.snapshots.insert(
                    domain.clone(),
                    Snapshot {
                        data: data.clone(),
                        cached,
                        received_at: Utc::now(),
                    },
                );
                self.events.emit(SessionEvent::Snapshot {
                    domain,
                    data,
                    cached,
                });
            }
            Frame::Reply { message } => {
                self.record_turn(ConversationTurn::assistant(message));
            }
            Frame::ReplyChunk { chunk } => self.reassembler.chunk(&chunk),
            Frame::ReplyEnd => {
                self.reassembler.end(&mut self.history);
            }
            Frame::ToolEvent { event: Some(event) } => self.tracker.apply(event),
            Frame::ToolEvent { event: None } => {
                warn!("Tool event envelope without an event dropped");
            }
            Frame::Error { message } => {
                warn!(%message, "Backend reported an error");
                self.events.emit(SessionEvent::ServerError(message));
            }
            Frame::Info { message } => {
                info!(%message, "Backend notice");
                self.events.emit(SessionEvent::Info(message));
            }
            Frame::Pong => debug!("Keepalive pong received"),
            Frame::Unknown => debug!("Frame of unknown kind dropped"),
        }
    }

    /// Appends a turn to history and tells the observer.
    pub fn record_turn(&mut self, turn: ConversationTurn) {
        self.history.append(turn.clone());
        self.events.emit(SessionEvent::TurnAppended(turn));
    }

    /// Cancels pending timers and drops any partial reply.
    pub fn teardown(&mut self) {
        self.tracker.cancel_pending();
        self.reassembler.reset();
    }

    pub fn history(&self) -> &HistoryBuffer {
        &self.history
    }

    pub fn tracker(&self) -> &ToolCallTracker {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut ToolCallTracker {
        &mut self.tracker
    }

    pub fn reassembler(&self) -> &StreamReassembler {
        &self.reassembler
    }

    pub fn snapshot(&self, domain: &str) -> Option<&Snapshot> {
        self.snapshots.get(domain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use crate::protocol::{ToolEvent, decode};
    use crate::tool_calls::{DEFAULT_SETTLE_DELAY, DEFAULT_TOOL_HISTORY_CAP, ToolCallStatus};
    use serde_json::json;
    use tokio::sync::mpsc;

    fn router() -> (MessageRouter, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, rx) = EventSink::channel();
        let router = MessageRouter::new(
            HistoryBuffer::default(),
            ToolCallTracker::new(
                DEFAULT_SETTLE_DELAY,
                DEFAULT_TOOL_HISTORY_CAP,
                events.clone(),
            ),
            StreamReassembler::new(events.clone()),
            events,
        );
        (router, rx)
    }

    #[test]
    fn test_streamed_reply_reaches_history() {
        let (mut router, _rx) = router();
        router.dispatch(Frame::ReplyChunk {
            chunk: "Hello ".into(),
        });
        router.dispatch(Frame::ReplyChunk {
            chunk: "world".into(),
        });
        router.dispatch(Frame::ReplyEnd);
        router.dispatch(Frame::ReplyEnd);

        assert_eq!(router.history().len(), 1);
        let turn = router.history().last().unwrap();
        assert_eq!(turn.role, Role::Assistant);
        assert_eq!(turn.content, "Hello world");
    }

    #[test]
    fn test_whole_reply_appends_turn() {
        let (mut router, mut rx) = router();
        router.dispatch(Frame::Reply {
            message: "Mars is cold.".into(),
        });
        assert_eq!(router.history().last().unwrap().content, "Mars is cold.");
        assert!(matches!(rx.try_recv().unwrap(), SessionEvent::TurnAppended(_)));
    }

    #[test]
    fn test_tool_events_are_unwrapped() {
        let (mut router, _rx) = router();
        router.dispatch(Frame::ToolEvent {
            event: Some(ToolEvent::ToolCallStart {
                tool_id: "t1".into(),
                tool_name: "get_iss_location".into(),
                description: Some("Locating the ISS".into()),
            }),
        });
        assert_eq!(
            router.tracker().get("t1").unwrap().status,
            ToolCallStatus::Active
        );

        router.dispatch(Frame::ToolEvent { event: None });
        assert_eq!(router.tracker().active().count(), 1);
    }

    #[test]
    fn test_snapshot_is_stored_and_forwarded() {
        let (mut router, mut rx) = router();
        let frame = decode(r#"{"type":"snapshot","domain":"iss","data":{"lat":1.0},"cached":true}"#)
            .unwrap();
        router.dispatch(frame);

        let snapshot = router.snapshot("iss").unwrap();
        assert!(snapshot.cached);
        assert_eq!(snapshot.data, json!({"lat": 1.0}));
        assert_eq!(
            rx.try_recv().unwrap(),
            SessionEvent::Snapshot {
                domain: "iss".into(),
                data: json!({"lat": 1.0}),
                cached: true,
            }
        );
        assert!(router.snapshot("mars-weather").is_none());
    }

    #[test]
    fn test_notices_and_unknown_frames() {
        let (mut router, mut rx) = router();
        router.dispatch(Frame::Welcome {
            message: "Connected".into(),
        });
        router.dispatch(Frame::Error {
            message: "Chat error".into(),
        });
        router.dispatch(Frame::Info {
            message: "limited".into(),
        });
        router.dispatch(Frame::Pong);
        router.dispatch(Frame::Unknown);

        assert_eq!(rx.try_recv().unwrap(), SessionEvent::Welcome("Connected".into()));
        assert_eq!(
            rx.try_recv().unwrap(),
            SessionEvent::ServerError("Chat error".into())
        );
        assert_eq!(rx.try_recv().unwrap(), SessionEvent::Info("limited".into()));
        assert!(rx.try_recv().is_err());
        assert!(router.history().is_empty());
    }

    #[test]
    fn test_teardown_discards_partial_reply() {
        let (mut router, _rx) = router();
        router.dispatch(Frame::ReplyChunk {
            chunk: "half".into(),
        });
        router.teardown();
        router.dispatch(Frame::ReplyEnd);
        assert!(router.history().is_empty());
    }
}
