//! One-shot conversation commands

use crate::error::{ParleyError, Result};
use crate::sync::SyncEngine;
use crate::types::{ChatId, CreateConversation, Message};
use chrono::{DateTime, Local, Utc};
use colored::Colorize;
use prettytable::{format, Table};

/// Compact age label for a conversation list.
///
/// Under a minute is `now`, then minutes, then hours, then the calendar
/// date. Times in the future count as `now`.
///
/// # Examples
///
/// ```
/// use chrono::{Duration, Utc};
/// use parley::commands::chats::relative_time;
///
/// let now = Utc::now();
/// assert_eq!(relative_time(now - Duration::seconds(30), now), "now");
/// assert_eq!(relative_time(now - Duration::minutes(5), now), "5m");
/// assert_eq!(relative_time(now - Duration::hours(3), now), "3h");
/// ```
pub fn relative_time(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let age = now.signed_duration_since(then);
    if age.num_minutes() < 1 {
        "now".to_string()
    } else if age.num_hours() < 1 {
        format!("{}m", age.num_minutes())
    } else if age.num_days() < 1 {
        format!("{}h", age.num_hours())
    } else {
        then.with_timezone(&Local).format("%Y-%m-%d").to_string()
    }
}

/// One line of a conversation transcript.
///
/// Messages from `own_id` are labelled `you`.
pub fn format_message(message: &Message, own_id: Option<i64>) -> String {
    let time = message.timestamp.with_timezone(&Local).format("%H:%M");
    let author = if Some(message.sender_id) == own_id {
        "you".green().bold().to_string()
    } else {
        format!("user {}", message.sender_id).cyan().to_string()
    };
    format!("[{}] {}: {}", time, author, message.content)
}

async fn own_id(engine: &SyncEngine) -> Option<i64> {
    match engine.current_user().await {
        Ok(identity) => Some(identity.id),
        Err(e) => {
            tracing::debug!("Could not resolve current user: {}", e);
            None
        }
    }
}

/// List conversations, most recent activity first.
pub async fn list_chats(engine: &SyncEngine) -> Result<()> {
    engine.refresh_conversations().await?;
    let conversations = engine.conversations().await;

    if conversations.is_empty() {
        println!("{}", "No conversations yet.".yellow());
        println!(
            "Start one with {}",
            "parley create --name <NAME>".cyan()
        );
        return Ok(());
    }

    let now = Utc::now();
    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);
    table.add_row(prettytable::row![
        "ID".bold(),
        "Name".bold(),
        "Last Activity".bold()
    ]);

    for conversation in &conversations {
        let activity = engine
            .last_activity(conversation.id)
            .await
            .map(|at| relative_time(at, now))
            .unwrap_or_else(|| "-".to_string());
        table.add_row(prettytable::row![
            conversation.id.to_string().cyan(),
            conversation.display_name(),
            activity
        ]);
    }

    println!();
    table.printstd();
    println!();
    Ok(())
}

/// What `create` should make a conversation with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Public conversation with this display name
    Named(String),
    /// Private conversation with a known user id
    UserId(i64),
    /// Private conversation with the user of this name
    Username(String),
}

/// Create a conversation, then optionally send `message` to it.
///
/// A blank `message` is rejected before anything is created.
pub async fn create(engine: &SyncEngine, target: Target, message: Option<&str>) -> Result<()> {
    if message.is_some_and(|m| m.trim().is_empty()) {
        return Err(ParleyError::InvalidInput("message content is empty".to_string()).into());
    }
    let conversation = match target {
        Target::Named(name) if name.trim().is_empty() => {
            return Err(ParleyError::InvalidInput("conversation name is empty".to_string()).into())
        }
        Target::Named(name) => {
            engine
                .create_conversation(CreateConversation::Named(name))
                .await?
        }
        Target::UserId(user_id) => {
            engine
                .create_conversation(CreateConversation::WithUser(user_id))
                .await?
        }
        Target::Username(username) => engine.start_private_conversation(&username).await?,
    };
    println!(
        "{}",
        format!(
            "Created conversation {} ({})",
            conversation.id,
            conversation.display_name()
        )
        .green()
    );

    if let Some(content) = message {
        let sent = engine.send_message(conversation.id, content).await?;
        println!("{}", format_message(&sent, Some(sent.sender_id)));
    }
    Ok(())
}

/// Search users by name.
pub async fn search(engine: &SyncEngine, username: &str) -> Result<()> {
    let users = engine.search_users(username).await?;
    if users.is_empty() {
        println!("{}", format!("No users matching '{}'.", username).yellow());
        return Ok(());
    }

    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);
    table.add_row(prettytable::row!["ID".bold(), "Username".bold()]);
    for user in users {
        table.add_row(prettytable::row![user.id.to_string().cyan(), user.username]);
    }
    table.printstd();
    Ok(())
}

/// Print a conversation's history.
pub async fn history(engine: &SyncEngine, chat_id: ChatId) -> Result<()> {
    let messages = engine.load_history(chat_id).await?;
    if messages.is_empty() {
        println!("{}", "No messages yet.".yellow());
        return Ok(());
    }
    let own = own_id(engine).await;
    for message in &messages {
        println!("{}", format_message(message, own));
    }
    Ok(())
}

/// Send a single message.
pub async fn send(engine: &SyncEngine, chat_id: ChatId, words: &[String]) -> Result<()> {
    let message = engine.send_message(chat_id, &words.join(" ")).await?;
    tracing::debug!(message_id = message.id, "message sent");
    println!("{}", format_message(&message, Some(message.sender_id)));
    Ok(())
}
