use std::sync::Arc;

use parley::error::Result;
use parley::transport::{PushChannel, PushConnector, PushFrame};
use parley::types::{ChatId, Credentials};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[allow(dead_code)]
pub fn credentials(username: &str, password: &str) -> Credentials {
    Credentials {
        username: username.to_string(),
        password: password.to_string(),
    }
}

/// Message record as the server renders it.
#[allow(dead_code)]
pub fn message_json(id: i64, chat_id: ChatId, timestamp: &str) -> Value {
    json!({
        "id": id,
        "chat_id": chat_id,
        "user_id": 2,
        "content": format!("message {id}"),
        "timestamp": timestamp,
    })
}

/// Push connector whose connections open and stay silent.
///
/// Each connect hands the frame sender to the test through `opened`.
#[allow(dead_code)]
#[derive(Debug)]
pub struct SilentConnector {
    opened: mpsc::UnboundedSender<(ChatId, mpsc::UnboundedSender<PushFrame>)>,
}

#[allow(dead_code)]
impl SilentConnector {
    pub fn new() -> (
        Arc<Self>,
        mpsc::UnboundedReceiver<(ChatId, mpsc::UnboundedSender<PushFrame>)>,
    ) {
        let (opened, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { opened }), rx)
    }
}

#[async_trait::async_trait]
impl PushConnector for SilentConnector {
    async fn connect(&self, chat_id: ChatId, _token: &str) -> Result<PushChannel> {
        let (tx, frames) = mpsc::unbounded_channel();
        let _ = self.opened.send((chat_id, tx));
        Ok(PushChannel {
            frames,
            shutdown: CancellationToken::new(),
        })
    }
}
