//! WebSocket push connector
//!
//! Connects to `{ws_base}/ws/chat/{chat_id}?token={token}` and forwards
//! text frames to the manager. A background reader task owns the socket;
//! cancelling the channel's `shutdown` token sends a close frame and ends
//! the task.

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use super::{PushChannel, PushConnector, PushFrame};
use crate::error::{ParleyError, Result};
use crate::types::ChatId;

/// Derive the push base URL from the HTTP server URL.
///
/// `http` maps to `ws` and `https` to `wss`; host, port and path prefix are
/// kept.
///
/// # Examples
///
/// ```
/// use parley::transport::ws::ws_base_from_http;
///
/// let http = "https://chat.example.com:8443/".parse().unwrap();
/// assert_eq!(
///     ws_base_from_http(&http).unwrap().as_str(),
///     "wss://chat.example.com:8443/"
/// );
/// ```
pub fn ws_base_from_http(http: &Url) -> Result<Url> {
    let scheme = match http.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(
                ParleyError::Config(format!("Cannot derive push URL from scheme {other}")).into(),
            )
        }
    };
    let mut ws = http.clone();
    ws.set_scheme(scheme)
        .map_err(|_| ParleyError::Config(format!("Cannot derive push URL from {http}")))?;
    Ok(ws)
}

/// [`PushConnector`] over `tokio-tungstenite`.
#[derive(Debug, Clone)]
pub struct WsConnector {
    ws_base: Url,
}

impl WsConnector {
    /// Connect relative to `ws_base` (a `ws://` or `wss://` URL).
    pub fn new(ws_base: Url) -> Self {
        Self { ws_base }
    }

    /// Connect relative to the push URL derived from an HTTP server URL.
    pub fn from_http_base(http: &Url) -> Result<Self> {
        Ok(Self::new(ws_base_from_http(http)?))
    }

    /// Full connection URL for `chat_id`.
    pub fn chat_url(&self, chat_id: ChatId, token: &str) -> Url {
        let mut url = self.ws_base.clone();
        let id = chat_id.to_string();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(["ws", "chat", id.as_str()]);
        }
        url.query_pairs_mut().clear().append_pair("token", token);
        url
    }
}

#[async_trait::async_trait]
impl PushConnector for WsConnector {
    async fn connect(&self, chat_id: ChatId, token: &str) -> Result<PushChannel> {
        let url = self.chat_url(chat_id, token);
        let (stream, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| ParleyError::WebSocket(e.to_string()))?;
        debug!(chat_id, "websocket handshake complete");

        let (mut write, mut read) = stream.split();
        let (frames_tx, frames) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let stop = shutdown.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop.cancelled() => {
                        let _ = write.send(WsMessage::Close(None)).await;
                        let _ = write.close().await;
                        break;
                    }
                    next = read.next() => {
                        let frame = match next {
                            Some(Ok(WsMessage::Text(text))) => PushFrame::Text(text.to_string()),
                            Some(Ok(WsMessage::Binary(data))) => match String::from_utf8(data.to_vec()) {
                                Ok(text) => PushFrame::Text(text),
                                Err(_) => {
                                    debug!(chat_id, "ignoring non-UTF-8 binary frame");
                                    continue;
                                }
                            },
                            Some(Ok(WsMessage::Close(frame))) => {
                                let (code, reason) = match frame {
                                    Some(f) => (Some(u16::from(f.code)), f.reason.to_string()),
                                    None => (None, "server closed connection".to_string()),
                                };
                                PushFrame::Closed { code, reason }
                            }
                            Some(Ok(_)) => continue,
                            Some(Err(e)) => PushFrame::Error(e.to_string()),
                            None => PushFrame::Closed {
                                code: None,
                                reason: "stream ended".to_string(),
                            },
                        };
                        let last = !matches!(frame, PushFrame::Text(_));
                        if frames_tx.send(frame).is_err() || last {
                            break;
                        }
                    }
                }
            }
            debug!(chat_id, "websocket reader finished");
        });

        Ok(PushChannel { frames, shutdown })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ws_base_maps_schemes() {
        let http: Url = "http://localhost:8000".parse().unwrap();
        assert_eq!(ws_base_from_http(&http).unwrap().as_str(), "ws://localhost:8000/");

        let https: Url = "https://example.com/chat/".parse().unwrap();
        assert_eq!(
            ws_base_from_http(&https).unwrap().as_str(),
            "wss://example.com/chat/"
        );
    }

    #[test]
    fn test_ws_base_rejects_other_schemes() {
        let ftp: Url = "ftp://example.com".parse().unwrap();
        assert!(ws_base_from_http(&ftp).is_err());
    }

    #[test]
    fn test_chat_url_layout() {
        let connector = WsConnector::new("ws://localhost:8000".parse().unwrap());
        assert_eq!(
            connector.chat_url(12, "abc").as_str(),
            "ws://localhost:8000/ws/chat/12?token=abc"
        );
    }

    #[test]
    fn test_chat_url_encodes_token_and_keeps_prefix() {
        let connector = WsConnector::new("wss://example.com/prefix/".parse().unwrap());
        let url = connector.chat_url(3, "a+b c");
        assert_eq!(url.path(), "/prefix/ws/chat/3");
        assert_eq!(
            url.query_pairs().find(|(k, _)| k == "token").map(|(_, v)| v.into_owned()),
            Some("a+b c".to_string())
        );
    }

    #[tokio::test]
    async fn test_connect_failure_is_websocket_error() {
        // Port 9 (discard) is closed on test hosts.
        let connector = WsConnector::new("ws://127.0.0.1:9".parse().unwrap());
        let err = connector.connect(1, "t").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ParleyError>(),
            Some(ParleyError::WebSocket(_))
        ));
    }
}
