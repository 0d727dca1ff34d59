//! Interactive chat view.
//!
//! Opens a conversation, prints its history, then prints new messages as
//! they arrive while reading lines from the terminal. Lines starting with
//! `/` are view commands; anything else is sent.

use std::collections::HashSet;

use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tokio::sync::{broadcast, mpsc};

use super::chats::format_message;
use crate::error::{ParleyError, Result};
use crate::sync::{OpenOutcome, SyncEngine, SyncEvent};
use crate::transport::ConnectionState;
use crate::types::{ChatId, MessageId};

/// Commands understood by the chat view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewCommand {
    /// Leave the view
    Quit,
    /// Focus another conversation
    Switch(ChatId),
    /// Show the command list
    Help,
    /// Send the text to the focused conversation
    Say(String),
    /// Blank line
    Empty,
}

/// Parse one input line.
///
/// # Errors
///
/// Returns [`ParleyError::InvalidInput`] for unknown commands or a bad
/// `/switch` argument.
///
/// # Examples
///
/// ```
/// use parley::commands::chat::{parse_input, ViewCommand};
///
/// assert_eq!(parse_input("/switch 4").unwrap(), ViewCommand::Switch(4));
/// assert_eq!(parse_input("hi").unwrap(), ViewCommand::Say("hi".into()));
/// ```
pub fn parse_input(line: &str) -> Result<ViewCommand> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(ViewCommand::Empty);
    }
    let Some(command) = trimmed.strip_prefix('/') else {
        return Ok(ViewCommand::Say(trimmed.to_string()));
    };

    let mut parts = command.split_whitespace();
    match parts.next().unwrap_or_default() {
        "quit" | "exit" | "q" => Ok(ViewCommand::Quit),
        "help" | "h" => Ok(ViewCommand::Help),
        "switch" | "s" => {
            let raw = parts.next().ok_or_else(|| {
                ParleyError::InvalidInput("usage: /switch <chat_id>".to_string())
            })?;
            let chat_id = raw.parse().map_err(|_| {
                ParleyError::InvalidInput(format!("not a conversation id: {}", raw))
            })?;
            Ok(ViewCommand::Switch(chat_id))
        }
        other => Err(ParleyError::InvalidInput(format!(
            "unknown command /{} (try /help)",
            other
        ))
        .into()),
    }
}

fn print_help() {
    println!("{}", "Commands:".bold());
    println!("  /switch <id>  focus another conversation");
    println!("  /help         show this list");
    println!("  /quit         leave");
    println!("Anything else is sent to the current conversation.");
}

/// Read terminal lines on a dedicated thread.
///
/// The channel closes on EOF, Ctrl-C or `/quit`.
fn spawn_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        let mut rl = match DefaultEditor::new() {
            Ok(rl) => rl,
            Err(e) => {
                tracing::error!("Failed to initialize line editor: {}", e);
                return;
            }
        };
        loop {
            match rl.readline("> ") {
                Ok(line) => {
                    let _ = rl.add_history_entry(line.as_str());
                    let quitting = matches!(parse_input(&line), Ok(ViewCommand::Quit));
                    if tx.send(line).is_err() || quitting {
                        break;
                    }
                }
                Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
                Err(e) => {
                    tracing::error!("Readline error: {}", e);
                    break;
                }
            }
        }
    });
    rx
}

/// Transcript state for the focused conversation.
struct View {
    chat_id: ChatId,
    own_id: Option<i64>,
    printed: HashSet<MessageId>,
}

impl View {
    /// Print every message of the log not printed yet.
    async fn catch_up(&mut self, engine: &SyncEngine) {
        for message in engine.messages(self.chat_id).await {
            if self.printed.insert(message.id) {
                println!("{}", format_message(&message, self.own_id));
            }
        }
    }

    async fn focus(&mut self, engine: &SyncEngine, chat_id: ChatId) -> Result<()> {
        self.chat_id = chat_id;
        self.printed.clear();
        if engine.open(chat_id).await? == OpenOutcome::Superseded {
            return Ok(());
        }
        println!(
            "{}",
            format!("--- conversation {} ---", chat_id).bold()
        );
        self.catch_up(engine).await;
        Ok(())
    }
}

/// Follow `chat_id` interactively until the user quits.
pub async fn run_chat(engine: &SyncEngine, chat_id: ChatId) -> Result<()> {
    tracing::info!("Starting interactive chat for conversation {}", chat_id);
    let pump = engine.start();
    let mut events = engine.subscribe();

    let own_id = Some(engine.current_user().await?.id);
    let mut view = View {
        chat_id,
        own_id,
        printed: HashSet::new(),
    };
    view.focus(engine, chat_id).await?;
    println!("{}", "Type /help for commands.".dimmed());

    let mut lines = spawn_reader();
    loop {
        tokio::select! {
            line = lines.recv() => {
                let Some(line) = line else { break };
                match parse_input(&line) {
                    Ok(ViewCommand::Quit) => break,
                    Ok(ViewCommand::Empty) => {}
                    Ok(ViewCommand::Help) => print_help(),
                    Ok(ViewCommand::Switch(next)) => {
                        if let Err(e) = view.focus(engine, next).await {
                            if ParleyError::is_authentication(&e) {
                                return Err(e);
                            }
                            eprintln!("{}", format!("Could not open {}: {}", next, e).red());
                        }
                    }
                    Ok(ViewCommand::Say(text)) => {
                        match engine.send_message(view.chat_id, &text).await {
                            Ok(_) => view.catch_up(engine).await,
                            Err(e) if ParleyError::is_authentication(&e) => return Err(e),
                            Err(e) => eprintln!("{}", format!("Send failed: {}", e).red()),
                        }
                    }
                    Err(e) => eprintln!("{}", e.to_string().yellow()),
                }
            }
            event = events.recv() => match event {
                Ok(SyncEvent::MessagesChanged { chat_id }) if chat_id == view.chat_id => {
                    view.catch_up(engine).await;
                }
                Ok(SyncEvent::Connection { chat_id, state }) if chat_id == view.chat_id => {
                    match state {
                        ConnectionState::Open => println!("{}", "(live)".dimmed()),
                        ConnectionState::Disconnected => {
                            println!("{}", "(connection lost, reconnecting)".dimmed())
                        }
                        _ => {}
                    }
                }
                Ok(SyncEvent::LoggedOut { .. }) => {
                    return Err(ParleyError::Authentication("session expired".to_string()).into());
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!("Event stream lagged by {}", skipped);
                    view.catch_up(engine).await;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    engine.close_conversation().await;
    pump.abort();
    println!("{}", "Goodbye!".green());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_input_plain_text_is_trimmed() {
        assert_eq!(
            parse_input("  hello there \n").unwrap(),
            ViewCommand::Say("hello there".into())
        );
    }

    #[test]
    fn test_parse_input_blank() {
        assert_eq!(parse_input("   ").unwrap(), ViewCommand::Empty);
    }

    #[test]
    fn test_parse_input_commands() {
        assert_eq!(parse_input("/quit").unwrap(), ViewCommand::Quit);
        assert_eq!(parse_input("/q").unwrap(), ViewCommand::Quit);
        assert_eq!(parse_input("/help").unwrap(), ViewCommand::Help);
        assert_eq!(parse_input("/s 12").unwrap(), ViewCommand::Switch(12));
    }

    #[test]
    fn test_parse_input_rejects_bad_switch() {
        assert!(parse_input("/switch").is_err());
        assert!(parse_input("/switch abc").is_err());
    }

    #[test]
    fn test_parse_input_rejects_unknown_command() {
        let err = parse_input("/dance").unwrap_err();
        assert!(err.to_string().contains("/dance"));
    }
}
