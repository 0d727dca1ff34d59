//! Sync engine integration tests
//!
//! Runs `SyncEngine` over the real HTTP client against a `wiremock` server,
//! with an in-process push connector standing in for the WebSocket.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::time::timeout;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use parley::api::HttpChatApi;
use parley::error::ParleyError;
use parley::session::{FileSessionBackend, MemorySessionBackend, Session, SessionBackend, SessionStore};
use parley::sync::{EngineOptions, LogoutReason, SyncEngine, SyncEvent};
use parley::transport::PushFrame;

use common::{message_json, SilentConnector};

async fn engine_for(
    server: &MockServer,
    backend: Arc<dyn SessionBackend>,
) -> (
    SyncEngine,
    tokio::sync::mpsc::UnboundedReceiver<(i64, tokio::sync::mpsc::UnboundedSender<PushFrame>)>,
) {
    let api = HttpChatApi::new(&server.uri(), 5).unwrap();
    let session = SessionStore::restore(backend).await;
    let (connector, opened) = SilentConnector::new();
    let engine = SyncEngine::new(Arc::new(api), session, connector, EngineOptions::default());
    (engine, opened)
}

#[tokio::test]
async fn test_login_open_push_and_send() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/users/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "tok"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/users/me"))
        .and(header("authorization", "Bearer tok"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 1, "username": "alice"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/messages/7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            message_json(2, 7, "2024-05-01T10:00:02"),
            message_json(1, 7, "2024-05-01T10:00:01"),
        ])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/messages/"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(message_json(4, 7, "2024-05-01T10:00:04")),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/chats/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": 7, "name": "general", "last_message_time": "2024-05-01T10:00:04"}
        ])))
        .mount(&server)
        .await;

    let (engine, mut opened) = engine_for(&server, Arc::new(MemorySessionBackend::default())).await;
    let _pump = engine.start();
    let mut events = engine.subscribe();

    let identity = engine.login("alice", "pw").await.unwrap();
    assert_eq!(identity.id, 1);

    engine.open(7).await.unwrap();
    let (chat_id, frames) = timeout(Duration::from_secs(5), opened.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(chat_id, 7);

    // A push that lands between history entries and the echo of our send.
    frames
        .send(PushFrame::Text(
            message_json(3, 7, "2024-05-01T10:00:03").to_string(),
        ))
        .unwrap();
    frames
        .send(PushFrame::Text(
            message_json(4, 7, "2024-05-01T10:00:04").to_string(),
        ))
        .unwrap();

    let sent = engine.send_message(7, "message 4").await.unwrap();
    assert_eq!(sent.id, 4);

    timeout(Duration::from_secs(5), async {
        loop {
            if engine.messages(7).await.len() == 4 {
                break;
            }
            let _ = events.recv().await;
        }
    })
    .await
    .unwrap();

    let ids: Vec<i64> = engine.messages(7).await.iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![1, 2, 3, 4]);
    assert_eq!(engine.conversations().await.len(), 1);
}

#[tokio::test]
async fn test_expired_session_is_cleared_from_disk() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/chats/"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"detail": "Invalid token"})))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let session_path = dir.path().join("session.json");
    let backend = Arc::new(FileSessionBackend::new(&session_path));
    backend.save(&Session::new("stale")).unwrap();

    let (engine, _opened) = engine_for(&server, backend).await;
    let mut events = engine.subscribe();
    assert!(engine.is_logged_in().await);

    let err = engine.refresh_conversations().await.unwrap_err();
    assert!(ParleyError::is_authentication(&err));
    assert!(!engine.is_logged_in().await);
    assert!(!session_path.exists());
    assert_eq!(
        events.try_recv().unwrap(),
        SyncEvent::LoggedOut {
            reason: LogoutReason::AuthenticationFailed
        }
    );

    // No further requests leave the client.
    assert!(engine.refresh_conversations().await.is_err());
}
