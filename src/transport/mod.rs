//! Push-stream transport
//!
//! [`TransportManager`] owns at most one live push connection, bound to the
//! conversation that currently has focus. A binding walks the state machine
//!
//! ```text
//! Disconnected -> Connecting -> Open
//!      ^                         |
//!      +---- (delay) <---- abnormal close
//! ```
//!
//! and reports [`TransportEvent`]s to a single subscriber over an mpsc
//! channel. An explicit [`TransportManager::close`] (focus moved, logout)
//! passes through `Closing` to `Disconnected` and ends the binding; any
//! other close, including a failed connect, is retried after a fixed delay
//! for as long as the binding keeps focus.
//!
//! Connections are opened through a [`PushConnector`]:
//!
//! - [`ws::WsConnector`] -- WebSocket client over `tokio-tungstenite`
//! - `fake::FakeConnector` -- in-process scripted connector (test builds
//!   only)

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ParleyError, Result};
use crate::types::{ChatId, Message};

pub mod ws;

#[cfg(test)]
pub mod fake;

pub use ws::WsConnector;

/// Lifecycle state of the bound push connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No connection, or waiting out the reconnect delay
    #[default]
    Disconnected,
    /// Handshake in progress
    Connecting,
    /// Frames are flowing
    Open,
    /// Explicit local close in progress
    Closing,
}

/// Snapshot of the transport's connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ConnectionInfo {
    /// Current state
    pub state: ConnectionState,
    /// Conversation the connection is scoped to
    pub bound_conversation: Option<ChatId>,
    /// Consecutive abnormal closes since the last successful open
    pub reconnect_attempt: u32,
}

/// Notification sent from the transport to its subscriber.
///
/// Every event carries the conversation id of the binding that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The connection is open and frames will follow
    Opened { chat_id: ChatId },
    /// A text frame arrived; decode with [`decode_frame`]
    MessageReceived { chat_id: ChatId, raw: String },
    /// The connection closed abnormally; a reconnect is scheduled
    Closed {
        chat_id: ChatId,
        code: Option<u16>,
        reason: String,
    },
    /// Connecting or reading failed
    Error { chat_id: ChatId, message: String },
}

/// Sequence number of a binding. Every `bind` that opens a new binding takes
/// the next number, so later bindings always compare greater.
pub type BindingId = u64;

/// A [`TransportEvent`] tagged with the binding that produced it.
///
/// Events already queued when their binding is closed are still delivered;
/// the tag lets the subscriber recognise and drop them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundEvent {
    /// Binding that emitted the event
    pub binding: BindingId,
    /// The event itself
    pub event: TransportEvent,
}

impl TransportEvent {
    /// Conversation the event belongs to.
    pub fn chat_id(&self) -> ChatId {
        match self {
            Self::Opened { chat_id }
            | Self::MessageReceived { chat_id, .. }
            | Self::Closed { chat_id, .. }
            | Self::Error { chat_id, .. } => *chat_id,
        }
    }
}

/// One unit read from an open push connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushFrame {
    /// Text payload
    Text(String),
    /// Remote close; no more frames follow
    Closed { code: Option<u16>, reason: String },
    /// Read error; no more frames follow
    Error(String),
}

/// An open push connection as seen by the manager.
///
/// The connector keeps driving the socket until `shutdown` is cancelled or
/// the remote side goes away. Dropping `frames` has the same effect as a
/// shutdown on the next frame.
#[derive(Debug)]
pub struct PushChannel {
    /// Inbound frames
    pub frames: mpsc::UnboundedReceiver<PushFrame>,
    /// Cancel to close the connection locally
    pub shutdown: CancellationToken,
}

/// Opens push connections scoped to a conversation.
#[async_trait::async_trait]
pub trait PushConnector: Send + Sync + std::fmt::Debug {
    /// Open a connection for `chat_id`, authenticated with `token`.
    ///
    /// # Errors
    ///
    /// Returns [`ParleyError::WebSocket`] when the handshake fails.
    async fn connect(&self, chat_id: ChatId, token: &str) -> Result<PushChannel>;
}

/// Decode a push frame into a [`Message`].
///
/// # Errors
///
/// Returns [`ParleyError::Protocol`] when the frame is not JSON, carries no
/// `chat_id`, or is otherwise not a message record.
///
/// # Examples
///
/// ```
/// use parley::transport::decode_frame;
///
/// let raw = r#"{"id":1,"chat_id":4,"user_id":2,"content":"hi","timestamp":"2024-01-01T00:00:00"}"#;
/// assert_eq!(decode_frame(raw).unwrap().chat_id, 4);
///
/// assert!(decode_frame("hello").is_err());
/// assert!(decode_frame(r#"{"id":1,"content":"orphan"}"#).is_err());
/// ```
pub fn decode_frame(raw: &str) -> Result<Message> {
    let value: serde_json::Value = serde_json::from_str(raw)
        .map_err(|e| ParleyError::Protocol(format!("frame is not JSON: {e}")))?;
    if value.get("chat_id").map_or(true, serde_json::Value::is_null) {
        return Err(ParleyError::Protocol("frame has no chat_id".into()).into());
    }
    let message: Message = serde_json::from_value(value)
        .map_err(|e| ParleyError::Protocol(format!("frame is not a message: {e}")))?;
    Ok(message)
}

/// A live binding: the task driving one conversation's connection.
#[derive(Debug)]
struct Binding {
    chat_id: ChatId,
    focus: CancellationToken,
    info: watch::Receiver<ConnectionInfo>,
    task: JoinHandle<()>,
}

impl Binding {
    fn is_live(&self) -> bool {
        !self.focus.is_cancelled() && !self.task.is_finished()
    }
}

/// Owner of the single push connection.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use std::time::Duration;
/// use parley::transport::{TransportManager, WsConnector};
///
/// # async fn example() -> anyhow::Result<()> {
/// let connector = Arc::new(WsConnector::new("ws://localhost:8000".parse()?));
/// let (mut transport, mut events) = TransportManager::new(connector, Duration::from_secs(2));
///
/// transport.bind(7, "token").await;
/// while let Some(bound) = events.recv().await {
///     println!("{:?}", bound.event);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct TransportManager {
    connector: Arc<dyn PushConnector>,
    reconnect_delay: Duration,
    events: mpsc::UnboundedSender<BoundEvent>,
    binding: Option<Binding>,
    next_binding: BindingId,
}

impl TransportManager {
    /// Create a manager and the receiver for its events.
    pub fn new(
        connector: Arc<dyn PushConnector>,
        reconnect_delay: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<BoundEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (
            Self {
                connector,
                reconnect_delay,
                events,
                binding: None,
                next_binding: 0,
            },
            rx,
        )
    }

    /// Delay between an abnormal close and the next connect attempt.
    pub fn reconnect_delay(&self) -> Duration {
        self.reconnect_delay
    }

    /// Bind the push connection to `chat_id`.
    ///
    /// A no-op when `chat_id` already has a live binding. A binding for a
    /// different conversation is closed first.
    pub async fn bind(&mut self, chat_id: ChatId, token: &str) {
        if let Some(binding) = &self.binding {
            if binding.chat_id == chat_id && binding.is_live() {
                debug!(chat_id, "push connection already bound");
                return;
            }
            self.close().await;
        }

        let binding = self.next_binding;
        self.next_binding += 1;
        let focus = CancellationToken::new();
        let (info_tx, info_rx) = watch::channel(ConnectionInfo {
            state: ConnectionState::Disconnected,
            bound_conversation: Some(chat_id),
            reconnect_attempt: 0,
        });
        let link = ConnectionLink {
            chat_id,
            binding,
            token: token.to_string(),
            connector: Arc::clone(&self.connector),
            reconnect_delay: self.reconnect_delay,
            focus: focus.clone(),
            info: info_tx,
            events: self.events.clone(),
        };
        let task = tokio::spawn(link.run());

        info!(chat_id, binding, "push connection bound");
        self.binding = Some(Binding {
            chat_id,
            focus,
            info: info_rx,
            task,
        });
    }

    /// Close the current binding, if any, and wait for its task to finish.
    ///
    /// No reconnect follows.
    pub async fn close(&mut self) {
        let Some(binding) = self.binding.take() else {
            return;
        };
        binding.focus.cancel();
        if let Err(e) = binding.task.await {
            if !e.is_cancelled() {
                warn!(chat_id = binding.chat_id, error = %e, "push connection task failed");
            }
        }
        info!(chat_id = binding.chat_id, "push connection released");
    }

    /// Current connection snapshot.
    pub fn info(&self) -> ConnectionInfo {
        self.binding
            .as_ref()
            .map(|binding| *binding.info.borrow())
            .unwrap_or_default()
    }

    /// Conversation the connection is bound to.
    pub fn bound_conversation(&self) -> Option<ChatId> {
        self.binding.as_ref().map(|binding| binding.chat_id)
    }

    /// Id the next new binding will get. Every binding created so far has
    /// a smaller id.
    pub fn next_binding(&self) -> BindingId {
        self.next_binding
    }
}

impl Drop for TransportManager {
    fn drop(&mut self) {
        if let Some(binding) = &self.binding {
            binding.focus.cancel();
        }
    }
}

/// How an open connection ended.
enum ChannelExit {
    FocusLost,
    Closed { code: Option<u16>, reason: String },
}

/// Everything the connection task needs, moved into the task.
struct ConnectionLink {
    chat_id: ChatId,
    binding: BindingId,
    token: String,
    connector: Arc<dyn PushConnector>,
    reconnect_delay: Duration,
    focus: CancellationToken,
    info: watch::Sender<ConnectionInfo>,
    events: mpsc::UnboundedSender<BoundEvent>,
}

impl ConnectionLink {
    fn set_state(&self, state: ConnectionState) {
        self.info.send_modify(|info| info.state = state);
    }

    fn emit(&self, event: TransportEvent) {
        let bound = BoundEvent {
            binding: self.binding,
            event,
        };
        if self.events.send(bound).is_err() {
            debug!(chat_id = self.chat_id, "transport subscriber gone");
        }
    }

    async fn run(self) {
        let chat_id = self.chat_id;
        loop {
            self.set_state(ConnectionState::Connecting);
            let connected = tokio::select! {
                biased;
                _ = self.focus.cancelled() => break,
                result = self.connector.connect(chat_id, &self.token) => result,
            };

            let (code, reason) = match connected {
                Ok(channel) => {
                    self.info.send_modify(|info| {
                        info.state = ConnectionState::Open;
                        info.reconnect_attempt = 0;
                    });
                    info!(chat_id, "push connection open");
                    self.emit(TransportEvent::Opened { chat_id });

                    match self.forward(channel).await {
                        ChannelExit::FocusLost => break,
                        ChannelExit::Closed { code, reason } => {
                            self.emit(TransportEvent::Closed {
                                chat_id,
                                code,
                                reason: reason.clone(),
                            });
                            (code, reason)
                        }
                    }
                }
                Err(e) => {
                    let message = format!("{e:#}");
                    self.emit(TransportEvent::Error {
                        chat_id,
                        message: message.clone(),
                    });
                    (None, message)
                }
            };

            let mut attempt = 0;
            self.info.send_modify(|info| {
                info.state = ConnectionState::Disconnected;
                info.reconnect_attempt += 1;
                attempt = info.reconnect_attempt;
            });
            let lost = ParleyError::ConnectionLost { chat_id, reason };
            warn!(
                chat_id,
                attempt,
                code,
                delay_ms = self.reconnect_delay.as_millis() as u64,
                error = %lost,
                "push connection lost, reconnecting"
            );

            tokio::select! {
                biased;
                _ = self.focus.cancelled() => break,
                _ = tokio::time::sleep(self.reconnect_delay) => {}
            }
        }

        self.set_state(ConnectionState::Disconnected);
        debug!(chat_id, "push connection task finished");
    }

    /// Forward frames until the channel ends or focus is lost.
    async fn forward(&self, channel: PushChannel) -> ChannelExit {
        let chat_id = self.chat_id;
        let PushChannel {
            mut frames,
            shutdown,
        } = channel;

        let exit = loop {
            tokio::select! {
                biased;
                _ = self.focus.cancelled() => break ChannelExit::FocusLost,
                frame = frames.recv() => match frame {
                    Some(PushFrame::Text(raw)) => {
                        debug!(chat_id, bytes = raw.len(), "push frame");
                        self.emit(TransportEvent::MessageReceived { chat_id, raw });
                    }
                    Some(PushFrame::Closed { code, reason }) => {
                        break ChannelExit::Closed { code, reason };
                    }
                    Some(PushFrame::Error(message)) => {
                        self.emit(TransportEvent::Error {
                            chat_id,
                            message: message.clone(),
                        });
                        break ChannelExit::Closed { code: None, reason: message };
                    }
                    None => {
                        break ChannelExit::Closed {
                            code: None,
                            reason: "stream ended".to_string(),
                        };
                    }
                },
            }
        };

        if matches!(exit, ChannelExit::FocusLost) {
            self.set_state(ConnectionState::Closing);
        }
        shutdown.cancel();
        exit
    }
}
