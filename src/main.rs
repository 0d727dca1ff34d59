//! Parley - chat client with live message sync
//!
#![doc = "Parley - chat client with live message sync"]
#![doc = "Main entry point for the Parley command-line client."]

use anyhow::Result;
use colored::Colorize;

use parley::cli::{Cli, Commands};
use parley::commands;
use parley::config::Config;
use parley::error::ParleyError;
use parley::logging::init_logging;
use parley::session::{create_backend, SessionStore};
use parley::sync::SyncEngine;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    // Load configuration
    let config_path = cli.config.as_deref().unwrap_or("config/parley.yaml");
    let config = Config::load(config_path, &cli)?;

    // Initialize tracing before anything talks to the network
    init_logging(&config.logging, cli.verbose)?;

    // Validate configuration
    config.validate()?;

    match run(cli, config).await {
        Ok(()) => Ok(()),
        Err(e) if ParleyError::is_authentication(&e) => {
            eprintln!("{}", format!("Authentication failed: {}", e).red());
            eprintln!(
                "Your session is missing or expired. Log in again with {}",
                "parley login <username>".cyan()
            );
            std::process::exit(1);
        }
        Err(e) => Err(e),
    }
}

async fn run(cli: Cli, config: Config) -> Result<()> {
    let session = SessionStore::restore(create_backend(&config.session)?).await;
    let engine = SyncEngine::from_config(&config, session)?;

    match cli.command {
        Commands::Register { username, password } => {
            commands::auth::register(&engine, &username, &password).await
        }
        Commands::Login { username, password } => {
            commands::auth::login(&engine, &username, &password).await
        }
        Commands::Logout => commands::auth::logout(&engine).await,
        Commands::Whoami => commands::auth::whoami(&engine).await,
        Commands::Chats => commands::chats::list_chats(&engine).await,
        Commands::Create {
            name,
            user_id,
            with,
            message,
        } => {
            let target = match (name, user_id, with) {
                (_, Some(user_id), _) => commands::chats::Target::UserId(user_id),
                (_, _, Some(username)) => commands::chats::Target::Username(username),
                (name, None, None) => commands::chats::Target::Named(name.unwrap_or_default()),
            };
            commands::chats::create(&engine, target, message.as_deref()).await
        }
        Commands::Search { username } => commands::chats::search(&engine, &username).await,
        Commands::History { chat_id } => commands::chats::history(&engine, chat_id).await,
        Commands::Send { chat_id, content } => {
            commands::chats::send(&engine, chat_id, &content).await
        }
        Commands::Chat { chat_id } => {
            tracing::info!("Starting interactive chat mode");
            commands::chat::run_chat(&engine, chat_id).await
        }
    }
}
