//! Parley - chat client library with live message sync
//!
//! This library keeps a client-side view of a chat server consistent while
//! messages arrive from three directions: history fetched over HTTP, live
//! pushes over a WebSocket, and confirmations of the user's own sends.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `api`: HTTP client for the chat server's REST API
//! - `transport`: single push connection with automatic reconnect
//! - `sync`: conversation cache and the sync engine that ties everything together
//! - `session`: authentication session and its persistence backends
//! - `config`: Configuration management and validation
//! - `error`: Error types and result aliases
//! - `cli`: Command-line interface definition
//!
//! # Example
//!
//! ```no_run
//! use parley::{Config, SessionStore, SyncEngine};
//! use parley::session::create_backend;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config/parley.yaml", &Default::default())?;
//!     config.validate()?;
//!
//!     let session = SessionStore::restore(create_backend(&config.session)?).await;
//!     let engine = SyncEngine::from_config(&config, session)?;
//!     let _pump = engine.start();
//!
//!     for conversation in engine.refresh_conversations().await? {
//!         println!("{}", conversation.display_name());
//!     }
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod logging;
pub mod session;
pub mod sync;
pub mod transport;
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use error::{ParleyError, Result};
pub use session::{Session, SessionStore};
pub use sync::{ConversationCache, SyncEngine, SyncEvent};
pub use types::{ChatId, Conversation, Message, MessageId};
