//! In-process fake connector for transport and engine tests
//!
//! [`FakeConnector::new`] returns the connector plus a receiver that yields
//! one [`FakeConnection`] per successful connect. The test holds the
//! connection and uses it to push frames or to close the socket from the
//! "server" side. Dropping a `FakeConnection` ends its frame stream, which
//! the manager sees as an abnormal close.
//!
//! ```text
//! manager connect() --> FakeConnector --> connections_rx (test)
//! test push_text()  --> frames_tx     --> PushChannel.frames (manager)
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{PushChannel, PushConnector, PushFrame};
use crate::error::{ParleyError, Result};
use crate::types::ChatId;

/// Scripted [`PushConnector`].
#[derive(Debug)]
pub struct FakeConnector {
    connections: mpsc::UnboundedSender<FakeConnection>,
    attempts: Mutex<Vec<(ChatId, String)>>,
    failures: AtomicUsize,
}

impl FakeConnector {
    /// Create a connector and the receiver for its connections.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<FakeConnection>) {
        let (connections, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                connections,
                attempts: Mutex::new(Vec::new()),
                failures: AtomicUsize::new(0),
            }),
            rx,
        )
    }

    /// Make the next `count` connect attempts fail.
    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// Every connect attempt so far, as `(chat_id, token)`.
    pub fn attempts(&self) -> Vec<(ChatId, String)> {
        self.attempts.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl PushConnector for FakeConnector {
    async fn connect(&self, chat_id: ChatId, token: &str) -> Result<PushChannel> {
        self.attempts
            .lock()
            .unwrap()
            .push((chat_id, token.to_string()));

        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ParleyError::WebSocket("connection refused".into()).into());
        }

        let (frames_tx, frames) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let _ = self.connections.send(FakeConnection {
            chat_id,
            token: token.to_string(),
            frames: frames_tx,
            shutdown: shutdown.clone(),
        });
        Ok(PushChannel { frames, shutdown })
    }
}

/// Server side of one fake connection.
#[derive(Debug)]
pub struct FakeConnection {
    /// Conversation the client connected for
    pub chat_id: ChatId,
    /// Token the client presented
    pub token: String,
    /// Frames delivered to the client
    pub frames: mpsc::UnboundedSender<PushFrame>,
    /// Cancelled when the client closes the connection
    pub shutdown: CancellationToken,
}

impl FakeConnection {
    /// Deliver a text frame.
    pub fn push_text(&self, raw: impl Into<String>) {
        let _ = self.frames.send(PushFrame::Text(raw.into()));
    }

    /// Deliver a message record as JSON.
    pub fn push_message(&self, message: &crate::types::Message) {
        self.push_text(serde_json::to_string(message).unwrap());
    }

    /// Close from the server side.
    pub fn close(&self, code: Option<u16>, reason: &str) {
        let _ = self.frames.send(PushFrame::Closed {
            code,
            reason: reason.to_string(),
        });
    }

    /// Fail the read side.
    pub fn fail(&self, message: &str) {
        let _ = self.frames.send(PushFrame::Error(message.to_string()));
    }
}
