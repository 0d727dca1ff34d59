//! Request/response API of the chat server
//!
//! [`ChatApi`] is the seam between the sync engine and the HTTP server.
//! [`HttpChatApi`] is the production implementation; engine tests supply an
//! in-process fake.
//!
//! Every method resolves to a value or an error. Errors are
//! [`crate::error::ParleyError`] values wrapped in `anyhow::Error`:
//! `Authentication` for HTTP 401, `Api` for any other non-success status,
//! and `Network` when no response was received.

pub mod client;

pub use client::HttpChatApi;

use crate::error::Result;
use crate::types::{
    ChatId, Conversation, CreateConversation, Credentials, Message, NewMessage, TokenResponse,
    User,
};

/// Operations exposed by the chat server.
///
/// Authenticated operations take the bearer token explicitly so that a
/// single client can be shared across sessions.
#[async_trait::async_trait]
pub trait ChatApi: Send + Sync + std::fmt::Debug {
    /// Create an account.
    async fn register(&self, credentials: &Credentials) -> Result<User>;

    /// Exchange credentials for a bearer token.
    async fn login(&self, credentials: &Credentials) -> Result<TokenResponse>;

    /// Identity of the token's owner.
    async fn me(&self, token: &str) -> Result<User>;

    /// Users whose name matches `username`.
    async fn search_users(&self, token: &str, username: &str) -> Result<Vec<User>>;

    /// Conversations visible to the caller.
    async fn list_conversations(&self, token: &str) -> Result<Vec<Conversation>>;

    /// Create a named or private conversation.
    async fn create_conversation(
        &self,
        token: &str,
        request: &CreateConversation,
    ) -> Result<Conversation>;

    /// Full history of a conversation, in server order.
    async fn list_messages(&self, token: &str, chat_id: ChatId) -> Result<Vec<Message>>;

    /// Post a message and return the server-confirmed record.
    async fn send_message(&self, token: &str, message: &NewMessage) -> Result<Message>;
}
