//! Sync engine: one consistent timeline per conversation
//!
//! [`SyncEngine`] coordinates three producers of messages:
//!
//! - history fetches issued by [`SyncEngine::open`] and
//!   [`SyncEngine::load_history`],
//! - frames from the push connection of the focused conversation,
//! - server confirmations of [`SyncEngine::send_message`].
//!
//! All three funnel through [`SyncEngine::apply_message`] (history through
//! `seed`), so the per-conversation log stays sorted and duplicate-free
//! whatever order the completions arrive in.
//!
//! # Design
//!
//! - The engine is a cheap `Clone` handle over shared state. Each piece of
//!   state sits behind its own `tokio::sync` lock and no lock is held across
//!   an HTTP request.
//! - Every `open` takes a new focus generation. A history response whose
//!   generation is no longer current is discarded instead of overwriting the
//!   newer focus.
//! - Transport events arrive on an mpsc channel drained by the task spawned
//!   in [`SyncEngine::start`]. The task holds only a weak reference, so it
//!   ends once every engine handle is dropped.
//! - Each binding of the push connection carries a sequence number. A
//!   session reset raises the floor below which events are ignored, so
//!   frames still queued from the previous session never reach the new
//!   caches.
//! - An authentication failure on any call tears everything down: push
//!   connection, caches, conversation list, focus and the persisted session.
//!   Subscribers see [`SyncEvent::LoggedOut`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::cache::ConversationCache;
use crate::api::{ChatApi, HttpChatApi};
use crate::config::Config;
use crate::error::{ParleyError, Result};
use crate::session::{Session, SessionStore, UserIdentity};
use crate::transport::{
    decode_frame, BindingId, BoundEvent, ConnectionInfo, ConnectionState, PushConnector,
    TransportEvent, TransportManager, WsConnector,
};
use crate::types::{ChatId, Conversation, CreateConversation, Credentials, Message, NewMessage, User};

/// Why the session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogoutReason {
    /// [`SyncEngine::logout`] was called
    UserRequested,
    /// The server rejected the token
    AuthenticationFailed,
}

/// Change notification for presentation layers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SyncEvent {
    /// The log of `chat_id` changed; re-read it with [`SyncEngine::messages`]
    MessagesChanged { chat_id: ChatId },
    /// The conversation list changed
    ConversationsChanged,
    /// The push connection for `chat_id` changed state
    Connection {
        chat_id: ChatId,
        state: ConnectionState,
    },
    /// The session ended and all cached state was dropped
    LoggedOut { reason: LogoutReason },
}

/// Result of [`SyncEngine::open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOutcome {
    /// History was applied and the push connection is bound
    Opened,
    /// Another `open` or a close happened while the history was in flight;
    /// the response was discarded
    Superseded,
}

/// Tuning knobs for [`SyncEngine`].
#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    /// Delay before reconnecting an abnormally closed push connection
    pub reconnect_delay: Duration,
    /// Capacity of the [`SyncEvent`] broadcast channel
    pub event_buffer: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(2),
            event_buffer: 256,
        }
    }
}

impl From<&Config> for EngineOptions {
    fn from(config: &Config) -> Self {
        Self {
            reconnect_delay: config.reconnect_delay(),
            event_buffer: config.sync.event_buffer,
        }
    }
}

#[derive(Debug, Default)]
struct Focus {
    chat_id: Option<ChatId>,
    generation: u64,
}

#[derive(Debug)]
struct Inner {
    api: Arc<dyn ChatApi>,
    session: SessionStore,
    cache: RwLock<ConversationCache>,
    conversations: RwLock<Vec<Conversation>>,
    focus: Mutex<Focus>,
    transport: Mutex<TransportManager>,
    transport_events: Mutex<Option<mpsc::UnboundedReceiver<BoundEvent>>>,
    /// Events from bindings below this id belong to an ended session
    binding_floor: AtomicU64,
    notifier: broadcast::Sender<SyncEvent>,
}

/// Coordinator of history, push stream and sends.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use parley::config::Config;
/// use parley::session::{MemorySessionBackend, SessionStore};
/// use parley::sync::SyncEngine;
///
/// # async fn example() -> anyhow::Result<()> {
/// let config = Config::default();
/// let session = SessionStore::new(Arc::new(MemorySessionBackend::default()));
/// let engine = SyncEngine::from_config(&config, session)?;
/// let _pump = engine.start();
///
/// engine.login("alice", "secret").await?;
/// engine.open(1).await?;
/// engine.send_message(1, "hello").await?;
/// for message in engine.messages(1).await {
///     println!("{}: {}", message.sender_id, message.content);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct SyncEngine {
    inner: Arc<Inner>,
}

impl SyncEngine {
    /// Assemble an engine from its collaborators.
    pub fn new(
        api: Arc<dyn ChatApi>,
        session: SessionStore,
        connector: Arc<dyn PushConnector>,
        options: EngineOptions,
    ) -> Self {
        let (transport, transport_events) =
            TransportManager::new(connector, options.reconnect_delay);
        let (notifier, _) = broadcast::channel(options.event_buffer.max(1));
        Self {
            inner: Arc::new(Inner {
                api,
                session,
                cache: RwLock::new(ConversationCache::new()),
                conversations: RwLock::new(Vec::new()),
                focus: Mutex::new(Focus::default()),
                transport: Mutex::new(transport),
                transport_events: Mutex::new(Some(transport_events)),
                binding_floor: AtomicU64::new(0),
                notifier,
            }),
        }
    }

    /// Engine over the HTTP API and WebSocket push stream named in `config`.
    ///
    /// # Errors
    ///
    /// Returns [`ParleyError::Config`] for unusable server URLs.
    pub fn from_config(config: &Config, session: SessionStore) -> Result<Self> {
        let api = HttpChatApi::new(
            &config.server.base_url,
            config.server.request_timeout_seconds,
        )?;
        let connector = WsConnector::new(config.ws_base()?);
        Ok(Self::new(
            Arc::new(api),
            session,
            Arc::new(connector),
            EngineOptions::from(config),
        ))
    }

    /// Spawn the task that applies transport events.
    ///
    /// Only the first call starts a pump; later calls return a handle to a
    /// task that finishes immediately.
    pub fn start(&self) -> JoinHandle<()> {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let receiver = inner.transport_events.lock().await.take();
            drop(inner);
            let Some(mut events) = receiver else {
                warn!("sync engine event pump already running");
                return;
            };
            debug!("sync engine event pump started");
            while let Some(event) = events.recv().await {
                let Some(inner) = weak.upgrade() else { break };
                SyncEngine { inner }.handle_transport_event(event).await;
            }
            debug!("sync engine event pump stopped");
        })
    }

    /// Receive change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.notifier.subscribe()
    }

    fn notify(&self, event: SyncEvent) {
        // No subscribers is fine.
        let _ = self.inner.notifier.send(event);
    }

    // -----------------------------------------------------------------------
    // Session
    // -----------------------------------------------------------------------

    /// Create an account. Does not log in.
    pub async fn register(&self, username: &str, password: &str) -> Result<User> {
        let credentials = Credentials {
            username: username.to_string(),
            password: password.to_string(),
        };
        self.inner.api.register(&credentials).await
    }

    /// Log in, persist the session and learn the user's id.
    ///
    /// Any state from a previous session is dropped first. Rejected
    /// credentials return [`ParleyError::Authentication`] without touching
    /// the current session.
    pub async fn login(&self, username: &str, password: &str) -> Result<UserIdentity> {
        let credentials = Credentials {
            username: username.to_string(),
            password: password.to_string(),
        };
        let token = self.inner.api.login(&credentials).await?;

        self.reset_state().await;
        self.inner
            .session
            .establish(Session::new(token.access_token.clone()))
            .await?;

        let user = self.guard(self.inner.api.me(&token.access_token).await).await?;
        let identity = UserIdentity::from(user);
        self.inner.session.set_identity(identity.clone()).await?;
        info!(user_id = identity.id, username = %identity.username, "session established");
        Ok(identity)
    }

    /// End the session, drop all cached state and notify subscribers.
    pub async fn logout(&self) -> Result<()> {
        self.reset_state().await;
        self.inner.session.clear().await?;
        info!("logged out");
        self.notify(SyncEvent::LoggedOut {
            reason: LogoutReason::UserRequested,
        });
        Ok(())
    }

    /// Returns `true` when a session is active.
    pub async fn is_logged_in(&self) -> bool {
        self.inner.session.is_active().await
    }

    /// Identity of the logged-in user, fetched from the server when the
    /// session does not know it yet.
    pub async fn current_user(&self) -> Result<UserIdentity> {
        if let Some(identity) = self.inner.session.identity().await {
            return Ok(identity);
        }
        let token = self.require_token().await?;
        let user = self.guard(self.inner.api.me(&token).await).await?;
        let identity = UserIdentity::from(user);
        self.inner.session.set_identity(identity.clone()).await?;
        Ok(identity)
    }

    async fn require_token(&self) -> Result<String> {
        self.inner
            .session
            .token()
            .await
            .ok_or_else(|| ParleyError::Authentication("not logged in".into()).into())
    }

    /// Pass `result` through, tearing the session down first if it is an
    /// authentication failure.
    async fn guard<T>(&self, result: Result<T>) -> Result<T> {
        let rejected = matches!(&result, Err(e) if ParleyError::is_authentication(e));
        if rejected {
            self.handle_auth_failure().await;
        }
        result
    }

    async fn handle_auth_failure(&self) {
        if !self.inner.session.invalidate().await {
            return;
        }
        warn!("server rejected the session token, logging out");
        self.reset_state().await;
        self.notify(SyncEvent::LoggedOut {
            reason: LogoutReason::AuthenticationFailed,
        });
    }

    /// Close the push connection and drop focus, caches and conversations.
    ///
    /// The binding floor is raised before the cache is cleared, and pushed
    /// frames are checked against it under the cache lock.
    async fn reset_state(&self) {
        {
            let mut transport = self.inner.transport.lock().await;
            transport.close().await;
            self.inner
                .binding_floor
                .store(transport.next_binding(), Ordering::SeqCst);
        }
        {
            let mut focus = self.inner.focus.lock().await;
            focus.chat_id = None;
            focus.generation += 1;
        }
        self.inner.cache.write().await.clear();
        self.inner.conversations.write().await.clear();
    }

    // -----------------------------------------------------------------------
    // Conversations
    // -----------------------------------------------------------------------

    /// Fetch the conversation list and replace the cached copy.
    pub async fn refresh_conversations(&self) -> Result<Vec<Conversation>> {
        let token = self.require_token().await?;
        let conversations = self
            .guard(self.inner.api.list_conversations(&token).await)
            .await?;
        *self.inner.conversations.write().await = conversations.clone();
        self.notify(SyncEvent::ConversationsChanged);
        Ok(conversations)
    }

    /// Cached conversation list, most recent activity first.
    pub async fn conversations(&self) -> Vec<Conversation> {
        let mut conversations = self.inner.conversations.read().await.clone();
        let cache = self.inner.cache.read().await;
        conversations.sort_by_cached_key(|c| {
            std::cmp::Reverse(last_activity_of(c.last_message_time, &cache, c.id))
        });
        conversations
    }

    /// Create a conversation and add it to the cached list.
    pub async fn create_conversation(&self, request: CreateConversation) -> Result<Conversation> {
        let token = self.require_token().await?;
        let created = self
            .guard(self.inner.api.create_conversation(&token, &request).await)
            .await?;
        {
            let mut conversations = self.inner.conversations.write().await;
            if !conversations.iter().any(|c| c.id == created.id) {
                conversations.insert(0, created.clone());
            }
        }
        self.notify(SyncEvent::ConversationsChanged);
        Ok(created)
    }

    /// Users whose name matches `username`.
    pub async fn search_users(&self, username: &str) -> Result<Vec<User>> {
        let token = self.require_token().await?;
        self.guard(self.inner.api.search_users(&token, username).await)
            .await
    }

    /// Create a private conversation with the user called `username`.
    ///
    /// An exact name match wins; otherwise the first search hit is used.
    ///
    /// # Errors
    ///
    /// Returns [`ParleyError::InvalidInput`] for a blank name or when the
    /// search finds nobody.
    pub async fn start_private_conversation(&self, username: &str) -> Result<Conversation> {
        let username = username.trim();
        if username.is_empty() {
            return Err(ParleyError::InvalidInput("username is empty".into()).into());
        }
        let users = self.search_users(username).await?;
        let user = users
            .iter()
            .find(|u| u.username == username)
            .or_else(|| users.first())
            .ok_or_else(|| ParleyError::InvalidInput(format!("no user named '{username}'")))?;
        debug!(user_id = user.id, username = %user.username, "resolved private peer");
        self.create_conversation(CreateConversation::WithUser(user.id))
            .await
    }

    /// Later of the server's last-message time and the newest cached
    /// message.
    pub async fn last_activity(&self, chat_id: ChatId) -> Option<DateTime<Utc>> {
        let server_time = self
            .inner
            .conversations
            .read()
            .await
            .iter()
            .find(|c| c.id == chat_id)
            .and_then(|c| c.last_message_time);
        let cache = self.inner.cache.read().await;
        last_activity_of(server_time, &cache, chat_id)
    }

    // -----------------------------------------------------------------------
    // Focus
    // -----------------------------------------------------------------------

    /// Focus `chat_id`: fetch its history, seed the cache and bind the push
    /// connection.
    ///
    /// # Errors
    ///
    /// Returns the history fetch error. Authentication failures also log
    /// the session out.
    pub async fn open(&self, chat_id: ChatId) -> Result<OpenOutcome> {
        let token = self.require_token().await?;
        let generation = {
            let mut focus = self.inner.focus.lock().await;
            focus.generation += 1;
            focus.chat_id = Some(chat_id);
            focus.generation
        };
        info!(chat_id, generation, "opening conversation");

        {
            let mut transport = self.inner.transport.lock().await;
            if transport
                .bound_conversation()
                .is_some_and(|bound| bound != chat_id)
            {
                transport.close().await;
            }
        }

        let history = self
            .guard(self.inner.api.list_messages(&token, chat_id).await)
            .await?;

        {
            let focus = self.inner.focus.lock().await;
            if focus.generation != generation {
                debug!(chat_id, generation, "discarding superseded history");
                return Ok(OpenOutcome::Superseded);
            }
            reseed(&mut *self.inner.cache.write().await, chat_id, history);
        }
        self.notify(SyncEvent::MessagesChanged { chat_id });

        let mut transport = self.inner.transport.lock().await;
        if self.inner.focus.lock().await.generation != generation {
            return Ok(OpenOutcome::Superseded);
        }
        transport.bind(chat_id, &token).await;
        Ok(OpenOutcome::Opened)
    }

    /// Fetch and cache `chat_id`'s history without focusing it or touching
    /// the push connection.
    pub async fn load_history(&self, chat_id: ChatId) -> Result<Vec<Message>> {
        let token = self.require_token().await?;
        let history = self
            .guard(self.inner.api.list_messages(&token, chat_id).await)
            .await?;
        let snapshot = {
            let mut cache = self.inner.cache.write().await;
            reseed(&mut cache, chat_id, history);
            cache.get(chat_id)
        };
        debug!(chat_id, count = snapshot.len(), "history loaded");
        self.notify(SyncEvent::MessagesChanged { chat_id });
        Ok(snapshot)
    }

    /// Drop focus and close the push connection.
    pub async fn close_conversation(&self) {
        let previous = {
            let mut focus = self.inner.focus.lock().await;
            focus.generation += 1;
            focus.chat_id.take()
        };
        self.inner.transport.lock().await.close().await;
        if let Some(chat_id) = previous {
            info!(chat_id, "conversation closed");
        }
    }

    /// Conversation that currently has focus.
    pub async fn focused_conversation(&self) -> Option<ChatId> {
        self.inner.focus.lock().await.chat_id
    }

    /// Push connection snapshot.
    pub async fn connection_info(&self) -> ConnectionInfo {
        self.inner.transport.lock().await.info()
    }

    // -----------------------------------------------------------------------
    // Messages
    // -----------------------------------------------------------------------

    /// Ordered snapshot of a conversation's log.
    pub async fn messages(&self, chat_id: ChatId) -> Vec<Message> {
        self.inner.cache.read().await.get(chat_id)
    }

    /// Send `content` to `chat_id` and merge the confirmed message.
    ///
    /// Content is trimmed; blank content is rejected with
    /// [`ParleyError::InvalidInput`] before any request is made. After a
    /// successful send the conversation list is refreshed; a refresh
    /// failure is logged and does not fail the send.
    pub async fn send_message(&self, chat_id: ChatId, content: &str) -> Result<Message> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ParleyError::InvalidInput("message content is empty".into()).into());
        }
        let token = self.require_token().await?;
        let request = NewMessage {
            chat_id,
            content: content.to_string(),
        };
        let confirmed = self
            .guard(self.inner.api.send_message(&token, &request).await)
            .await?;
        self.apply_message(confirmed.clone()).await;

        if let Err(e) = self.refresh_conversations().await {
            warn!(chat_id, error = %e, "conversation refresh after send failed");
        }
        Ok(confirmed)
    }

    /// Merge `message` into its conversation's log.
    ///
    /// Returns `false` when the message was already present.
    pub async fn apply_message(&self, message: Message) -> bool {
        let chat_id = message.chat_id;
        let message_id = message.id;
        let inserted = self.inner.cache.write().await.merge(chat_id, message);
        if inserted {
            debug!(chat_id, message_id, "message applied");
            self.notify(SyncEvent::MessagesChanged { chat_id });
        }
        inserted
    }

    fn is_stale(&self, binding: BindingId) -> bool {
        binding < self.inner.binding_floor.load(Ordering::SeqCst)
    }

    /// Merge a pushed message unless its binding predates the last reset.
    async fn apply_pushed(&self, binding: BindingId, message: Message) -> bool {
        let chat_id = message.chat_id;
        let message_id = message.id;
        let inserted = {
            let mut cache = self.inner.cache.write().await;
            if self.is_stale(binding) {
                debug!(chat_id, message_id, binding, "dropping frame from ended session");
                return false;
            }
            cache.merge(chat_id, message)
        };
        if inserted {
            debug!(chat_id, message_id, "pushed message applied");
            self.notify(SyncEvent::MessagesChanged { chat_id });
        }
        inserted
    }

    async fn handle_transport_event(&self, bound: BoundEvent) {
        let BoundEvent { binding, event } = bound;
        if self.is_stale(binding) {
            debug!(chat_id = event.chat_id(), binding, "ignoring event from ended session");
            return;
        }
        match event {
            TransportEvent::MessageReceived { chat_id, raw } => match decode_frame(&raw) {
                Ok(message) => {
                    if message.chat_id != chat_id {
                        debug!(
                            bound = chat_id,
                            chat_id = message.chat_id,
                            "push frame for another conversation"
                        );
                    }
                    self.apply_pushed(binding, message).await;
                }
                Err(e) => warn!(chat_id, error = %e, "dropping push frame"),
            },
            TransportEvent::Opened { chat_id } => {
                self.notify(SyncEvent::Connection {
                    chat_id,
                    state: ConnectionState::Open,
                });
            }
            TransportEvent::Closed {
                chat_id,
                code,
                reason,
            } => {
                debug!(chat_id, ?code, %reason, "push connection closed");
                self.notify(SyncEvent::Connection {
                    chat_id,
                    state: ConnectionState::Disconnected,
                });
            }
            TransportEvent::Error { chat_id, message } => {
                debug!(chat_id, %message, "push connection error");
            }
        }
    }
}

/// Replace `chat_id`'s log with `history`, keeping entries merged while the
/// fetch was in flight.
fn reseed(cache: &mut ConversationCache, chat_id: ChatId, history: Vec<Message>) {
    let raced = cache.get(chat_id);
    cache.seed(chat_id, history);
    for message in raced {
        cache.merge(chat_id, message);
    }
}

fn last_activity_of(
    server_time: Option<DateTime<Utc>>,
    cache: &ConversationCache,
    chat_id: ChatId,
) -> Option<DateTime<Utc>> {
    let cached = cache.latest(chat_id).map(|m| m.timestamp);
    server_time.max(cached)
}
