//! Runs one chat session on a single event loop.
//!
//! Inbound frames, channel opens, fallback replies, user commands, tool settle
//! timers, reconnect timers and the keepalive ping are all serialized through
//! one `tokio::select!` loop, so the session state is never touched
//! concurrently. Nothing that waits on the network runs inline in a handler,
//! so `close()` is always read promptly.

use super::connection::{ConnectionEvent, ConnectionManager, Connector, ReconnectPolicy};
use crate::{
    config::Config,
    error::SessionError,
    fallback::{FallbackReply, FallbackTransport},
};
use antriksh_core::{
    events::EventSink,
    history::HistoryBuffer,
    models::ConversationTurn,
    protocol::{self, OutgoingMessage},
    reassembler::StreamReassembler,
    router::MessageRouter,
    tool_calls::ToolCallTracker,
};
use futures_util::{StreamExt, future::BoxFuture, stream::FuturesOrdered};
use std::time::Duration;
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{Instant, Interval, MissedTickBehavior},
};
use tracing::{Instrument, debug, info, warn};
use uuid::Uuid;

/// Commands accepted by a running session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    /// Submit a line of user input.
    SendUser(String),
    /// Tear the session down.
    Close,
}

/// Cloneable front end of a running [`Session`].
#[derive(Debug, Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    pub async fn send_user(&self, text: impl Into<String>) -> Result<(), SessionError> {
        self.tx
            .send(SessionCommand::SendUser(text.into()))
            .await
            .map_err(|_| SessionError::Closed)
    }

    /// Asks the session to tear down. Closing an already finished session is fine.
    pub async fn close(&self) {
        let _ = self.tx.send(SessionCommand::Close).await;
    }
}

pub struct Session {
    id: Uuid,
    connection: Option<ConnectionManager>,
    fallback: FallbackTransport,
    /// In-flight fallback requests, resolved in submission order.
    replies: FuturesOrdered<BoxFuture<'static, FallbackReply>>,
    router: MessageRouter,
    history_window: usize,
    ping_interval: Option<Duration>,
    commands: mpsc::Receiver<SessionCommand>,
}

impl Session {
    /// Builds a session. Without a connector every message goes through the
    /// fallback transport.
    pub fn new(
        config: &Config,
        connector: Option<Box<dyn Connector>>,
        fallback: FallbackTransport,
        events: EventSink,
    ) -> (Self, SessionHandle) {
        let (tx, commands) = mpsc::channel(32);
        let policy = ReconnectPolicy {
            base: config.reconnect_base,
            cap: config.reconnect_cap,
            max_retries: config.reconnect_max_retries,
        };
        let router = MessageRouter::new(
            HistoryBuffer::new(config.history_cap, config.history_retain),
            ToolCallTracker::new(config.tool_settle, config.tool_history_cap, events.clone()),
            StreamReassembler::new(events.clone()),
            events.clone(),
        );
        let session = Self {
            id: Uuid::new_v4(),
            connection: connector.map(|c| ConnectionManager::new(c, policy, events)),
            fallback,
            replies: FuturesOrdered::new(),
            router,
            history_window: config.history_window,
            ping_interval: config.ping_interval,
            commands,
        };
        (session, SessionHandle { tx })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Spawns the event loop inside a span carrying the session id.
    pub fn spawn(self) -> JoinHandle<()> {
        let session_span = tracing::info_span!("session", session_id = %self.id);
        tokio::spawn(self.run().instrument(session_span))
    }

    /// The main event loop. Returns after `close()` or once every handle is dropped.
    pub async fn run(mut self) {
        info!("Session started.");
        if let Some(connection) = self.connection.as_mut() {
            if let Err(e) = connection.begin_open() {
                warn!(error = %e, "Duplex channel not started");
            }
        }

        let mut ping = self.ping_interval.map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        loop {
            tokio::select! {
                event = next_connection_event(self.connection.as_mut()) => {
                    self.on_connection_event(event);
                }
                Some(reply) = self.replies.next(), if !self.replies.is_empty() => {
                    for frame in reply.into_frames() {
                        self.router.dispatch(frame);
                    }
                }
                command = self.commands.recv() => match command {
                    Some(SessionCommand::SendUser(text)) => self.submit(text).await,
                    Some(SessionCommand::Close) | None => break,
                },
                id = self.router.tracker_mut().next_settle() => {
                    self.router.tracker_mut().settle(&id);
                }
                _ = next_tick(ping.as_mut()) => self.ping().await,
            }
        }

        self.teardown().await;
        info!("Session finished.");
    }

    fn on_connection_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Inbound(text) => match protocol::decode(&text) {
                Ok(frame) => {
                    debug!(kind = frame.kind(), "Frame received");
                    self.router.dispatch(frame);
                }
                Err(e) => warn!(error = %e, "Dropping undecodable frame"),
            },
            ConnectionEvent::Opened => debug!("Duplex channel ready"),
            ConnectionEvent::Lost(decision) => debug!(?decision, "Duplex channel lost"),
        }
    }

    /// Records the user turn and sends it over the channel, or queues a
    /// fallback request when the channel is not open. The fallback reply is
    /// dispatched by the loop once it arrives.
    async fn submit(&mut self, text: String) {
        // The window is taken before the new turn is appended.
        let chat_history = self.router.history().recent(self.history_window);
        self.router.record_turn(ConversationTurn::user(text.clone()));

        if let Some(connection) = self.connection.as_mut().filter(|c| c.is_open()) {
            let outgoing = protocol::encode(&OutgoingMessage::Chat {
                message: text.clone(),
                chat_history: chat_history.clone(),
            });
            match connection.send(outgoing).await {
                Ok(()) => return,
                Err(e) => warn!(error = %e, "Send failed; using fallback transport"),
            }
        }

        info!("Duplex channel not open; sending through fallback transport.");
        let fallback = self.fallback.clone();
        self.replies.push_back(Box::pin(async move {
            fallback.request(&text, &chat_history).await
        }));
    }

    async fn ping(&mut self) {
        let Some(connection) = self.connection.as_mut().filter(|c| c.is_open()) else {
            return;
        };
        if let Err(e) = connection.send(protocol::encode(&OutgoingMessage::Ping)).await {
            warn!(error = %e, "Keepalive ping failed");
        }
    }

    async fn teardown(&mut self) {
        if let Some(connection) = self.connection.as_mut() {
            connection.close().await;
        }
        if !self.replies.is_empty() {
            debug!(pending = self.replies.len(), "Abandoning in-flight fallback requests");
        }
        self.replies = FuturesOrdered::new();
        self.router.teardown();
        self.commands.close();
    }
}

async fn next_connection_event(connection: Option<&mut ConnectionManager>) -> ConnectionEvent {
    match connection {
        Some(connection) => connection.next_event().await,
        None => std::future::pending().await,
    }
}

async fn next_tick(interval: Option<&mut Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
