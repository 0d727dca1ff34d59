//! Wire and domain types shared by the API client, transport and engine
//!
//! The server emits timestamps either as RFC 3339 strings or as naive
//! ISO-8601 values without an offset; naive values are interpreted as UTC.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::cmp::Ordering;

/// Server-assigned conversation identifier.
pub type ChatId = i64;

/// Server-assigned message identifier, unique within its conversation.
pub type MessageId = i64;

/// A chat message as observed by the client.
///
/// Messages are immutable once received. Within a conversation log they are
/// ordered by [`Message::timeline_cmp`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Server-assigned id
    pub id: MessageId,
    /// Conversation the message belongs to
    pub chat_id: ChatId,
    /// Author of the message
    #[serde(rename = "user_id", alias = "sender_id")]
    pub sender_id: i64,
    /// Message text
    pub content: String,
    /// Server timestamp
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Timeline ordering: timestamp ascending, ties broken by id ascending.
    ///
    /// # Examples
    ///
    /// ```
    /// use chrono::{TimeZone, Utc};
    /// use parley::types::Message;
    /// use std::cmp::Ordering;
    ///
    /// let at = |id, secs| Message {
    ///     id,
    ///     chat_id: 1,
    ///     sender_id: 1,
    ///     content: String::new(),
    ///     timestamp: Utc.timestamp_opt(secs, 0).unwrap(),
    /// };
    /// assert_eq!(at(2, 10).timeline_cmp(&at(1, 20)), Ordering::Less);
    /// assert_eq!(at(2, 10).timeline_cmp(&at(1, 10)), Ordering::Greater);
    /// ```
    pub fn timeline_cmp(&self, other: &Self) -> Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// A conversation as listed by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    /// Server-assigned id
    pub id: ChatId,
    /// Optional display name
    #[serde(default)]
    pub name: Option<String>,
    /// Time of the most recent message known to the server
    #[serde(default, deserialize_with = "deserialize_optional_timestamp")]
    pub last_message_time: Option<DateTime<Utc>>,
}

impl Conversation {
    /// Name to show for the conversation, falling back to `Chat <id>`.
    pub fn display_name(&self) -> String {
        match self.name.as_deref() {
            Some(name) if !name.trim().is_empty() => name.to_string(),
            _ => format!("Chat {}", self.id),
        }
    }
}

/// A registered user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Server-assigned id
    pub id: i64,
    /// Login name
    pub username: String,
}

/// Body for register and login.
#[derive(Debug, Clone, Serialize)]
pub struct Credentials {
    /// Login name
    pub username: String,
    /// Plain-text password, only ever sent over the request body
    pub password: String,
}

/// Login response.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    /// Bearer token for subsequent calls
    pub access_token: String,
    /// Token type, `bearer` when present
    #[serde(default)]
    pub token_type: Option<String>,
}

/// Body for the send-message call.
#[derive(Debug, Clone, Serialize)]
pub struct NewMessage {
    /// Target conversation
    pub chat_id: ChatId,
    /// Message text
    pub content: String,
}

/// How a new conversation should be created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateConversation {
    /// Public conversation with a display name
    Named(String),
    /// Private conversation with another user
    WithUser(i64),
}

/// Parse a server timestamp, accepting RFC 3339 or naive ISO-8601 (UTC).
///
/// # Examples
///
/// ```
/// use parley::types::parse_timestamp;
///
/// assert!(parse_timestamp("2024-05-01T12:30:00Z").is_some());
/// assert!(parse_timestamp("2024-05-01T12:30:00.123456").is_some());
/// assert!(parse_timestamp("yesterday").is_none());
/// ```
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|naive| naive.and_utc())
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}")))
}

fn deserialize_optional_timestamp<'de, D>(
    deserializer: D,
) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        None => Ok(None),
        Some(raw) => parse_timestamp(&raw)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_message_deserializes_naive_timestamp_as_utc() {
        let json = r#"{"id":3,"chat_id":9,"user_id":4,"content":"hi","timestamp":"2024-05-01T12:30:00.250000"}"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        assert_eq!(msg.sender_id, 4);
        assert_eq!(
            msg.timestamp,
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap()
                + chrono::Duration::milliseconds(250)
        );
    }

    #[test]
    fn test_message_deserializes_offset_timestamp() {
        let json = r#"{"id":3,"chat_id":9,"user_id":4,"content":"hi","timestamp":"2024-05-01T14:30:00+02:00"}"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        assert_eq!(
            msg.timestamp,
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap()
        );
    }

    #[test]
    fn test_message_accepts_sender_id_alias() {
        let json = r#"{"id":1,"chat_id":2,"sender_id":5,"content":"x","timestamp":"2024-01-01T00:00:00Z"}"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        assert_eq!(msg.sender_id, 5);
    }

    #[test]
    fn test_message_rejects_bad_timestamp() {
        let json = r#"{"id":1,"chat_id":2,"user_id":5,"content":"x","timestamp":"soon"}"#;
        assert!(serde_json::from_str::<Message>(json).is_err());
    }

    #[test]
    fn test_message_serializes_with_wire_names() {
        let msg = Message {
            id: 1,
            chat_id: 2,
            sender_id: 3,
            content: "hello".into(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["user_id"], 3);
        assert!(value.get("sender_id").is_none());
    }

    #[test]
    fn test_conversation_without_time_or_name() {
        let conv: Conversation = serde_json::from_str(r#"{"id":12}"#).unwrap();
        assert_eq!(conv.last_message_time, None);
        assert_eq!(conv.display_name(), "Chat 12");
    }

    #[test]
    fn test_conversation_with_null_time() {
        let conv: Conversation =
            serde_json::from_str(r#"{"id":1,"name":"general","last_message_time":null}"#)
                .unwrap();
        assert_eq!(conv.display_name(), "general");
        assert!(conv.last_message_time.is_none());
    }

    #[test]
    fn test_timeline_cmp_breaks_ties_by_id() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let a = Message {
            id: 1,
            chat_id: 1,
            sender_id: 1,
            content: String::new(),
            timestamp: ts,
        };
        let b = Message { id: 2, ..a.clone() };
        assert_eq!(a.timeline_cmp(&b), Ordering::Less);
        assert_eq!(b.timeline_cmp(&a), Ordering::Greater);
        assert_eq!(a.timeline_cmp(&a), Ordering::Equal);
    }
}
