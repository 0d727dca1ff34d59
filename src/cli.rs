//! Command-line interface definition for Parley
//!
//! This module defines the CLI structure using clap's derive API,
//! providing commands for authentication, conversation management and
//! the interactive chat view.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Parley - chat client with live message sync
///
/// Reads and sends messages on a chat server, keeping each conversation's
/// timeline consistent across history fetches and live pushes.
#[derive(Parser, Debug, Clone)]
#[command(name = "parley")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "config/parley.yaml")]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Override the server base URL
    #[arg(long, global = true)]
    pub server: Option<String>,

    /// Override the session file location
    #[arg(long, global = true)]
    pub session_path: Option<PathBuf>,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for Parley
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Create an account
    Register {
        /// Login name
        username: String,

        /// Password
        #[arg(short, long, env = "PARLEY_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Log in and persist the session
    Login {
        /// Login name
        username: String,

        /// Password
        #[arg(short, long, env = "PARLEY_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Forget the persisted session
    Logout,

    /// Show the logged-in user
    Whoami,

    /// List conversations, most recent activity first
    Chats,

    /// Create a conversation
    Create {
        /// Display name for a public conversation
        #[arg(
            short,
            long,
            conflicts_with_all = ["user_id", "with"],
            required_unless_present_any = ["user_id", "with"]
        )]
        name: Option<String>,

        /// Start a private conversation with this user id
        #[arg(short, long, conflicts_with = "with")]
        user_id: Option<i64>,

        /// Start a private conversation with the user of this name
        #[arg(short, long)]
        with: Option<String>,

        /// Send this message once the conversation exists
        #[arg(short, long)]
        message: Option<String>,
    },

    /// Search users by name
    Search {
        /// Name to look up
        username: String,
    },

    /// Print a conversation's history
    History {
        /// Conversation id
        chat_id: i64,
    },

    /// Send a single message
    Send {
        /// Conversation id
        chat_id: i64,

        /// Message text
        #[arg(required = true, num_args = 1..)]
        content: Vec<String>,
    },

    /// Open a conversation and follow it live
    Chat {
        /// Conversation id
        chat_id: i64,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            config: Some("config/parley.yaml".to_string()),
            verbose: false,
            server: None,
            session_path: None,
            command: Commands::Whoami,
        }
    }
}
