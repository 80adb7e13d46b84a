//! Connection Manager
//!
//! Owns the duplex channel and its lifecycle (`Idle -> Connecting -> Open ->
//! Closed`). An open runs as a stored future so the owner can keep serving
//! other work, or tear down, while the handshake is pending. An unsolicited
//! closure or a failed open schedules a reconnect with exponential backoff;
//! once the retry budget is spent the manager stays `Closed` for good and
//! reports exhaustion exactly once.

use crate::error::{SessionError, TransportError};
use antriksh_core::events::{ConnectionState, EventSink, SessionEvent};
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use futures_util::{Sink, SinkExt, StreamExt, future};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, sleep_until, timeout};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message as WsMessage};
use tracing::{debug, error, info, warn};

/// Exponential backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub max_retries: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(1000),
            cap: Duration::from_millis(30_000),
            max_retries: 5,
        }
    }
}

impl ReconnectPolicy {
    /// `min(base * 2^retry, cap)`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.cap)
    }
}

/// Both halves of an open duplex channel, carrying raw text frames.
pub struct Channel {
    pub sink: Pin<Box<dyn Sink<String, Error = TransportError> + Send>>,
    pub stream: BoxStream<'static, Result<String, TransportError>>,
}

/// Opens duplex channels to the backend.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Channel, TransportError>;
}

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Connects over WebSocket and exposes only text frames.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new(url: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            connect_timeout,
        }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<Channel, TransportError> {
        let connect_error = |reason: String| TransportError::Connect {
            url: self.url.clone(),
            reason,
        };
        let (ws_stream, _) = timeout(self.connect_timeout, connect_async(self.url.as_str()))
            .await
            .map_err(|_| {
                connect_error(format!(
                    "handshake timed out after {}ms",
                    self.connect_timeout.as_millis()
                ))
            })?
            .map_err(|e| connect_error(e.to_string()))?;
        let (ws_tx, ws_rx) = ws_stream.split();

        let sink = ws_tx.with(|text: String| {
            future::ready(Ok::<_, TransportError>(WsMessage::Text(text.into())))
        });
        let stream = ws_rx
            .filter_map(|msg| {
                future::ready(match msg {
                    Ok(WsMessage::Text(text)) => Some(Ok(text.to_string())),
                    Ok(_) => None,
                    Err(e) => Some(Err(TransportError::from(e))),
                })
            })
            .boxed();

        Ok(Channel {
            sink: Box::pin(sink),
            stream,
        })
    }
}

/// What the policy decided after the channel was lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    Scheduled { attempt: u32, delay: Duration },
    Exhausted,
}

/// Something the session loop has to react to.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// A raw text frame arrived.
    Inbound(String),
    /// A pending open succeeded.
    Opened,
    /// The channel closed, errored or failed to open.
    Lost(ReconnectDecision),
}

pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
    state: ConnectionState,
    retry_count: u32,
    channel: Option<Channel>,
    /// The in-flight open, polled by [`ConnectionManager::next_event`].
    connecting: Option<BoxFuture<'static, Result<Channel, TransportError>>>,
    reconnect_at: Option<Instant>,
    exhausted: bool,
    events: EventSink,
}

impl ConnectionManager {
    pub fn new(connector: Box<dyn Connector>, policy: ReconnectPolicy, events: EventSink) -> Self {
        Self {
            connector: Arc::from(connector),
            policy,
            state: ConnectionState::Idle,
            retry_count: 0,
            channel: None,
            connecting: None,
            reconnect_at: None,
            exhausted: false,
            events,
        }
    }

    /// Starts opening the channel without waiting for the handshake.
    ///
    /// The result is reported by [`ConnectionManager::next_event`]. Does
    /// nothing while a channel is open or an open is already in flight.
    pub fn begin_open(&mut self) -> Result<(), SessionError> {
        if self.exhausted {
            return Err(SessionError::ConnectionExhausted {
                attempts: self.policy.max_retries,
            });
        }
        if self.channel.is_some() || self.connecting.is_some() {
            return Ok(());
        }
        self.reconnect_at = None;
        self.set_state(ConnectionState::Connecting);
        let connector = Arc::clone(&self.connector);
        self.connecting = Some(Box::pin(async move { connector.connect().await }));
        Ok(())
    }

    /// Opens the channel and waits for the outcome.
    ///
    /// A failure is handed to the reconnection policy before it is returned.
    pub async fn open(&mut self) -> Result<(), SessionError> {
        self.begin_open()?;
        let Some(connecting) = self.connecting.as_mut() else {
            return Ok(());
        };
        let result = connecting.await;
        self.connecting = None;
        match result {
            Ok(channel) => {
                self.attach(channel);
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, attempt = self.retry_count, "Failed to open duplex channel");
                self.lost();
                Err(e.into())
            }
        }
    }

    /// Sends one encoded frame. Only valid while `Open`.
    pub async fn send(&mut self, text: String) -> Result<(), SessionError> {
        if self.state != ConnectionState::Open {
            return Err(SessionError::NotConnected);
        }
        let Some(channel) = self.channel.as_mut() else {
            return Err(SessionError::NotConnected);
        };
        let result = channel.sink.send(text).await;
        if let Err(e) = result {
            warn!(error = %e, "Send on duplex channel failed");
            self.lost();
            return Err(e.into());
        }
        Ok(())
    }

    /// Records a closure of the channel and applies the reconnection policy.
    pub fn lost(&mut self) -> ReconnectDecision {
        self.channel = None;
        self.set_state(ConnectionState::Closed);
        if self.exhausted {
            return ReconnectDecision::Exhausted;
        }

        self.retry_count += 1;
        if self.retry_count > self.policy.max_retries {
            self.exhausted = true;
            self.reconnect_at = None;
            error!(
                attempts = self.policy.max_retries,
                "Reconnect attempts exhausted; giving up on the duplex channel"
            );
            self.events.emit(SessionEvent::ConnectionExhausted {
                attempts: self.policy.max_retries,
            });
            return ReconnectDecision::Exhausted;
        }

        let delay = self.policy.delay_for(self.retry_count);
        self.reconnect_at = Some(Instant::now() + delay);
        info!(
            attempt = self.retry_count,
            delay_ms = delay.as_millis() as u64,
            "Reconnect scheduled"
        );
        self.events.emit(SessionEvent::ReconnectScheduled {
            attempt: self.retry_count,
            delay,
        });
        ReconnectDecision::Scheduled {
            attempt: self.retry_count,
            delay,
        }
    }

    /// Waits for the next inbound frame, open outcome or channel loss.
    ///
    /// Due reconnects are started here. Pends forever when there is no
    /// channel, no open in flight and no scheduled reconnect. Cancel-safe:
    /// an interrupted open stays in flight for the next call.
    pub async fn next_event(&mut self) -> ConnectionEvent {
        loop {
            if let Some(channel) = self.channel.as_mut() {
                match channel.stream.next().await {
                    Some(Ok(text)) => return ConnectionEvent::Inbound(text),
                    Some(Err(e)) => warn!(error = %e, "Duplex channel error"),
                    None => info!("Duplex channel closed by peer."),
                }
                return ConnectionEvent::Lost(self.lost());
            }

            if let Some(connecting) = self.connecting.as_mut() {
                let result = connecting.await;
                self.connecting = None;
                return match result {
                    Ok(channel) => {
                        self.attach(channel);
                        ConnectionEvent::Opened
                    }
                    Err(e) => {
                        warn!(error = %e, attempt = self.retry_count, "Failed to open duplex channel");
                        ConnectionEvent::Lost(self.lost())
                    }
                };
            }

            let Some(deadline) = self.reconnect_at else {
                return future::pending().await;
            };
            sleep_until(deadline).await;
            self.reconnect_at = None;
            debug!(attempt = self.retry_count, "Reconnecting");
            if let Err(e) = self.begin_open() {
                debug!(error = %e, "Reconnect not started");
            }
        }
    }

    /// Closes the channel, abandons any in-flight open and cancels any
    /// scheduled reconnect.
    pub async fn close(&mut self) {
        if self.reconnect_at.take().is_some() {
            debug!("Cancelled pending reconnect");
        }
        if self.connecting.take().is_some() {
            debug!("Abandoned in-flight open");
        }
        if let Some(mut channel) = self.channel.take() {
            match timeout(CLOSE_TIMEOUT, channel.sink.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!(error = %e, "Error while closing duplex channel"),
                Err(_) => debug!("Peer did not acknowledge close in time"),
            }
        }
        self.set_state(ConnectionState::Closed);
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    fn attach(&mut self, channel: Channel) {
        self.channel = Some(channel);
        self.retry_count = 0;
        self.set_state(ConnectionState::Open);
        info!("Duplex channel open.");
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            self.state = state;
            self.events.emit(SessionEvent::Connection(state));
        }
    }
}

/// In-memory channel whose far end is driven by the test.
#[cfg(test)]
pub(crate) mod scripted {
    use super::*;
    use tokio::sync::mpsc;
    use tokio_tungstenite::tungstenite;

    pub struct Remote {
        pub inbound: mpsc::UnboundedSender<Result<String, TransportError>>,
        pub outbound: mpsc::UnboundedReceiver<String>,
    }

    pub fn channel() -> (Channel, Remote) {
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel::<String>();

        let stream = futures_util::stream::unfold(in_rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed();
        let sink = futures_util::sink::unfold(
            out_tx,
            |tx: mpsc::UnboundedSender<String>, text: String| async move {
                tx.send(text)
                    .map_err(|_| TransportError::Channel(tungstenite::Error::ConnectionClosed))?;
                Ok::<_, TransportError>(tx)
            },
        );

        (
            Channel {
                sink: Box::pin(sink),
                stream,
            },
            Remote {
                inbound: in_tx,
                outbound: out_rx,
            },
        )
    }

    /// A connector whose handshake never completes.
    pub struct StalledConnector;

    #[async_trait]
    impl Connector for StalledConnector {
        async fn connect(&self) -> Result<Channel, TransportError> {
            future::pending().await
        }
    }

    pub fn refused() -> TransportError {
        TransportError::Connect {
            url: "ws://localhost:8000/ws".into(),
            reason: "connection refused".into(),
        }
    }
}
