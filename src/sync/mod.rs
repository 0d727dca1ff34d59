//! Message synchronization
//!
//! - [`cache`]: per-conversation ordered, duplicate-free message logs
//! - [`engine`]: coordination of history, push stream, sends and session

pub mod cache;
pub mod engine;

pub use cache::ConversationCache;
pub use engine::{EngineOptions, LogoutReason, OpenOutcome, SyncEngine, SyncEvent};
