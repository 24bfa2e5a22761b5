//! Shared WebSocket event stream with bounded auto-reconnect.
//!
//! [`StreamConnection`] owns one logical session to the pool's push channel.
//! It is created by the caller and handed to whatever needs it. Nothing
//! connects until first use (subscribing to events, emitting a control message
//! or calling [`connect`](StreamConnection::connect)).
//!
//! Frames in both directions are JSON text of the form
//! `{"event": "<name>", "data": <payload>}`. Incoming frames are fanned out to
//! in-process listeners through a [`tokio::sync::broadcast`] channel, so many
//! logical event types share the single socket.
//!
//! # Example
//!
//! ```rust,ignore
//! use poolwatch_api::stream::{StreamConfig, StreamConnection, events};
//!
//! let conn = StreamConnection::new(StreamConfig::new("ws://pool.example:4000".parse()?));
//! let mut rx = conn.subscribe();
//!
//! while let Ok(event) = rx.recv().await {
//!     if event.name == events::NEW_BLOCK {
//!         println!("block: {}", event.payload);
//!     }
//! }
//!
//! conn.disconnect();
//! ```

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::Error;

// ── Broadcast channel capacity ───────────────────────────────────────

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Server → client event names.
pub mod events {
    /// Object-overlay delta for the pool overview.
    pub const POOL_UPDATE: &str = "poolUpdate";
    /// A single newly found block.
    pub const NEW_BLOCK: &str = "newBlock";
    /// A single new pool payment.
    pub const NEW_PAYMENT: &str = "newPayment";
    /// A share submitted by a subscribed miner, tagged with its address.
    pub const MINER_SHARE_UPDATE: &str = "minerShareUpdate";
}

// ── StreamEvent ──────────────────────────────────────────────────────

/// A named event received from the push channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    pub name: String,
    pub payload: Value,
}

impl StreamEvent {
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }
}

/// Wire envelope shared by both directions.
#[derive(Debug, Serialize, Deserialize)]
struct Frame {
    event: String,
    #[serde(default)]
    data: Value,
}

// ── ControlMessage ───────────────────────────────────────────────────

/// Client → server control messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    SubscribeMiner { address: String },
    UnsubscribeMiner { address: String },
}

impl ControlMessage {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::SubscribeMiner { .. } => "subscribeMiner",
            Self::UnsubscribeMiner { .. } => "unsubscribeMiner",
        }
    }

    pub fn address(&self) -> &str {
        match self {
            Self::SubscribeMiner { address } | Self::UnsubscribeMiner { address } => address,
        }
    }

    /// Encode as a wire frame.
    pub fn to_frame(&self) -> String {
        let frame = Frame {
            event: self.event_name().to_owned(),
            data: serde_json::json!({ "address": self.address() }),
        };
        // A struct of String + Value always serializes.
        serde_json::to_string(&frame).unwrap_or_default()
    }
}

// ── StreamState ──────────────────────────────────────────────────────

/// Connection state observable by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
}

// ── StreamConfig ─────────────────────────────────────────────────────

/// Endpoint and reconnection policy for the push channel.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub url: Url,

    /// Reconnection attempts after a failure before giving up. Default: 5.
    pub max_attempts: u32,

    /// Fixed delay between reconnection attempts. Default: 1s.
    pub reconnect_delay: Duration,
}

impl StreamConfig {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            max_attempts: 5,
            reconnect_delay: Duration::from_secs(1),
        }
    }
}

// ── StreamConnection ─────────────────────────────────────────────────

/// Handle to the shared push-channel session.
///
/// Cheaply cloneable; all clones share one socket. Dropping handles does not
/// close the socket, call [`disconnect`](Self::disconnect) for that.
#[derive(Clone)]
pub struct StreamConnection {
    inner: Arc<Inner>,
}

struct Inner {
    config: StreamConfig,
    events: broadcast::Sender<Arc<StreamEvent>>,
    state: watch::Sender<StreamState>,
    session: Mutex<Option<Session>>,
    last_failure: Mutex<Option<String>>,
}

struct Session {
    cancel: CancellationToken,
    outbound: mpsc::UnboundedSender<String>,
}

impl StreamConnection {
    /// Create an unconnected handle. No I/O happens until first use.
    pub fn new(config: StreamConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (state, _) = watch::channel(StreamState::Disconnected);

        Self {
            inner: Arc::new(Inner {
                config,
                events,
                state,
                session: Mutex::new(None),
                last_failure: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &StreamConfig {
        &self.inner.config
    }

    /// Start the session if none exists. Must be called inside a Tokio runtime.
    pub fn connect(&self) {
        let mut session = self.lock_session();
        if session.is_some() {
            return;
        }

        let cancel = CancellationToken::new();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        *session = Some(Session {
            cancel: cancel.clone(),
            outbound,
        });
        drop(session);

        *self.lock_failure() = None;
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            session_loop(inner, outbound_rx, cancel).await;
        });
    }

    /// Tear down the current session and start a fresh one.
    ///
    /// This is the only way back from a session that exhausted its
    /// reconnection attempts.
    pub fn retry(&self) {
        self.disconnect();
        self.connect();
    }

    /// Close the socket and forget the session. A later use starts over.
    pub fn disconnect(&self) {
        if let Some(session) = self.lock_session().take() {
            session.cancel.cancel();
            tracing::debug!("stream session cancelled");
        }
        self.inner.state.send_replace(StreamState::Disconnected);
    }

    /// Receive every event from the push channel. Connects lazily.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<StreamEvent>> {
        let rx = self.inner.events.subscribe();
        self.connect();
        rx
    }

    /// Observe connection state transitions.
    pub fn state(&self) -> watch::Receiver<StreamState> {
        self.inner.state.subscribe()
    }

    pub fn current_state(&self) -> StreamState {
        *self.inner.state.borrow()
    }

    /// The error that made the last session give up, if it did.
    pub fn last_failure(&self) -> Option<String> {
        self.lock_failure().clone()
    }

    /// Send a control message. Connects lazily.
    ///
    /// Returns `false` when the message was dropped because the socket is not
    /// currently connected; there is no queueing or retry.
    pub fn emit(&self, message: &ControlMessage) -> bool {
        self.connect();

        if self.current_state() != StreamState::Connected {
            tracing::debug!(
                event = message.event_name(),
                address = message.address(),
                "stream not connected, dropping control message"
            );
            return false;
        }

        let session = self.lock_session();
        let Some(session) = session.as_ref() else {
            return false;
        };
        session.outbound.send(message.to_frame()).is_ok()
    }

    fn lock_session(&self) -> std::sync::MutexGuard<'_, Option<Session>> {
        self.inner
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_failure(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.inner
            .last_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

// ── Background reconnection loop ─────────────────────────────────────

/// Main loop: connect → read → on drop, fixed delay → reconnect, bounded.
///
/// The attempt counter resets whenever a connection is established, so the
/// bound applies to consecutive failures only.
async fn session_loop(
    inner: Arc<Inner>,
    mut outbound: mpsc::UnboundedReceiver<String>,
    cancel: CancellationToken,
) {
    let config = &inner.config;
    let mut attempt: u32 = 0;

    loop {
        if attempt == 0 {
            inner.state.send_replace(StreamState::Connecting);
        }

        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            result = connect_and_read(&inner, &mut outbound, &cancel, &mut attempt) => result,
        };

        if cancel.is_cancelled() {
            break;
        }

        let reason = match result {
            Ok(()) => "connection closed".to_owned(),
            Err(e) => e.to_string(),
        };

        attempt += 1;
        if attempt > config.max_attempts {
            tracing::error!(
                max_attempts = config.max_attempts,
                error = %reason,
                "stream reconnection limit reached, giving up"
            );
            *inner
                .last_failure
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(reason);
            inner.state.send_replace(StreamState::Disconnected);
            return;
        }

        tracing::warn!(error = %reason, attempt, "stream dropped, reconnecting");
        inner
            .state
            .send_replace(StreamState::Reconnecting { attempt });

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(config.reconnect_delay) => {}
        }

        inner.state.send_replace(StreamState::Connecting);
    }

    tracing::debug!("stream loop exiting");
}

// ── Single connection lifecycle ──────────────────────────────────────

/// Establish one WebSocket connection and pump frames until it drops.
async fn connect_and_read(
    inner: &Inner,
    outbound: &mut mpsc::UnboundedReceiver<String>,
    cancel: &CancellationToken,
    attempt: &mut u32,
) -> Result<(), Error> {
    let url = &inner.config.url;
    tracing::info!(url = %url, "connecting to stream");

    let (ws_stream, _response) = tokio_tungstenite::connect_async(url.as_str())
        .await
        .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

    // Anything queued while we were down belongs to a previous session.
    while outbound.try_recv().is_ok() {}

    *attempt = 0;
    inner.state.send_replace(StreamState::Connected);
    tracing::info!("stream connected");

    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                let _ = write.send(tungstenite::Message::Close(None)).await;
                return Ok(());
            }
            message = outbound.recv() => {
                let Some(text) = message else { return Ok(()) };
                write
                    .send(tungstenite::Message::Text(text.into()))
                    .await
                    .map_err(|e| Error::WebSocketConnect(e.to_string()))?;
            }
            frame = read.next() => {
                match frame {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        parse_and_broadcast(text.as_str(), &inner.events);
                    }
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        return Err(match frame {
                            Some(cf) => Error::WebSocketClosed {
                                code: cf.code.into(),
                                reason: cf.reason.to_string(),
                            },
                            None => Error::WebSocketClosed {
                                code: 1005,
                                reason: "no close frame payload".into(),
                            },
                        });
                    }
                    Some(Err(e)) => {
                        return Err(Error::WebSocketConnect(e.to_string()));
                    }
                    None => {
                        tracing::info!("stream ended");
                        return Ok(());
                    }
                    Some(Ok(_)) => {
                        // Binary, Ping, Pong, Frame. Tungstenite answers pings itself.
                    }
                }
            }
        }
    }
}

// ── Message parsing ──────────────────────────────────────────────────

fn parse_frame(text: &str) -> Option<StreamEvent> {
    match serde_json::from_str::<Frame>(text) {
        Ok(frame) => Some(StreamEvent::new(frame.event, frame.data)),
        Err(e) => {
            tracing::debug!(error = %e, "failed to parse stream frame");
            None
        }
    }
}

/// Parse a text frame and broadcast it if well-formed.
fn parse_and_broadcast(text: &str, event_tx: &broadcast::Sender<Arc<StreamEvent>>) {
    if let Some(event) = parse_frame(text) {
        tracing::trace!(event = %event.name, "stream event");
        // Ignore send errors -- just means no active subscribers right now
        let _ = event_tx.send(Arc::new(event));
    }
}

// ── Tests ────────────────────────────────────────────────────────────
