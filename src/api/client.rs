//! HTTP implementation of [`ChatApi`]
//!
//! # Example
//!
//! ```rust,no_run
//! use parley::api::{ChatApi, HttpChatApi};
//! use parley::types::Credentials;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let api = HttpChatApi::new("http://localhost:8000", 30)?;
//!     let token = api
//!         .login(&Credentials {
//!             username: "alice".to_string(),
//!             password: "secret".to_string(),
//!         })
//!         .await?;
//!     let chats = api.list_conversations(&token.access_token).await?;
//!     println!("{} conversations", chats.len());
//!     Ok(())
//! }
//! ```

use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, info};
use url::Url;

use super::ChatApi;
use crate::error::{ParleyError, Result};
use crate::types::{
    ChatId, Conversation, CreateConversation, Credentials, Message, NewMessage, TokenResponse,
    User,
};

/// Chat server client over HTTP.
#[derive(Debug, Clone)]
pub struct HttpChatApi {
    client: Client,
    base_url: Url,
}

impl HttpChatApi {
    /// Create a client for the server at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`ParleyError::Config`] when `base_url` is not an absolute
    /// http(s) URL, or [`ParleyError::Network`] when the HTTP client cannot
    /// be built.
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ParleyError::Config(format!("Invalid server URL {base_url}: {e}")))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(ParleyError::Config(format!(
                "Server URL must use http or https, got {}",
                base_url.scheme()
            ))
            .into());
        }
        if base_url.cannot_be_a_base() {
            return Err(ParleyError::Config(format!("Invalid server URL {base_url}")).into());
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ParleyError::Network(e.to_string()))?;

        Ok(Self { client, base_url })
    }

    /// Base URL requests are resolved against.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Build `base_url` + `segments`, percent-encoding each segment.
    ///
    /// A trailing empty segment yields a trailing slash, which the server's
    /// collection routes expect.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// Builds a request, adding the bearer header when a token is given.
    fn build_request(&self, method: Method, url: Url, token: Option<&str>) -> RequestBuilder {
        let request = self.client.request(method, url);
        match token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn execute<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request
            .send()
            .await
            .map_err(|e| ParleyError::Network(e.to_string()))?;
        let response = check_status(response).await?;
        let body = response
            .bytes()
            .await
            .map_err(|e| ParleyError::Network(e.to_string()))?;
        Ok(serde_json::from_slice(&body)?)
    }
}

/// Map a non-success response to the matching error.
async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = error_detail(&body).unwrap_or_else(|| {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    });
    debug!(status = status.as_u16(), %message, "request rejected");

    match status {
        StatusCode::UNAUTHORIZED => Err(ParleyError::Authentication(message).into()),
        _ => Err(ParleyError::Api {
            status: status.as_u16(),
            message,
        }
        .into()),
    }
}

/// Extract the `detail` member of an error body, or the body itself.
fn error_detail(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }
    match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(value) => match value.get("detail") {
            Some(serde_json::Value::String(detail)) => Some(detail.clone()),
            Some(other) => Some(other.to_string()),
            None => Some(trimmed.to_string()),
        },
        Err(_) => Some(trimmed.to_string()),
    }
}

#[async_trait::async_trait]
impl ChatApi for HttpChatApi {
    async fn register(&self, credentials: &Credentials) -> Result<User> {
        let url = self.endpoint(&["api", "users", "register"]);
        let user: User = self
            .execute(self.build_request(Method::POST, url, None).json(credentials))
            .await?;
        info!(user_id = user.id, username = %user.username, "registered user");
        Ok(user)
    }

    async fn login(&self, credentials: &Credentials) -> Result<TokenResponse> {
        let url = self.endpoint(&["api", "users", "login"]);
        let token: TokenResponse = self
            .execute(self.build_request(Method::POST, url, None).json(credentials))
            .await?;
        info!(username = %credentials.username, "logged in");
        Ok(token)
    }

    async fn me(&self, token: &str) -> Result<User> {
        let url = self.endpoint(&["api", "users", "me"]);
        self.execute(self.build_request(Method::GET, url, Some(token)))
            .await
    }

    async fn search_users(&self, token: &str, username: &str) -> Result<Vec<User>> {
        let url = self.endpoint(&["api", "users", "search", username]);
        self.execute(self.build_request(Method::GET, url, Some(token)))
            .await
    }

    async fn list_conversations(&self, token: &str) -> Result<Vec<Conversation>> {
        let url = self.endpoint(&["api", "chats", ""]);
        let conversations: Vec<Conversation> = self
            .execute(self.build_request(Method::GET, url, Some(token)))
            .await?;
        debug!(count = conversations.len(), "listed conversations");
        Ok(conversations)
    }

    async fn create_conversation(
        &self,
        token: &str,
        request: &CreateConversation,
    ) -> Result<Conversation> {
        let mut url = self.endpoint(&["api", "chats", ""]);
        match request {
            CreateConversation::Named(name) => {
                url.query_pairs_mut().append_pair("name", name);
            }
            CreateConversation::WithUser(user_id) => {
                url.query_pairs_mut()
                    .append_pair("user_id", &user_id.to_string());
            }
        }
        let conversation: Conversation = self
            .execute(self.build_request(Method::POST, url, Some(token)))
            .await?;
        info!(chat_id = conversation.id, "created conversation");
        Ok(conversation)
    }

    async fn list_messages(&self, token: &str, chat_id: ChatId) -> Result<Vec<Message>> {
        let id = chat_id.to_string();
        let url = self.endpoint(&["api", "messages", id.as_str()]);
        let messages: Vec<Message> = self
            .execute(self.build_request(Method::GET, url, Some(token)))
            .await?;
        debug!(chat_id, count = messages.len(), "fetched history");
        Ok(messages)
    }

    async fn send_message(&self, token: &str, message: &NewMessage) -> Result<Message> {
        let url = self.endpoint(&["api", "messages", ""]);
        let confirmed: Message = self
            .execute(self.build_request(Method::POST, url, Some(token)).json(message))
            .await?;
        debug!(
            chat_id = confirmed.chat_id,
            message_id = confirmed.id,
            "message confirmed"
        );
        Ok(confirmed)
    }
}
