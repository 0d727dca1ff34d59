//! Authentication session lifecycle
//!
//! A [`Session`] holds the bearer token plus the identity of the logged-in
//! user. [`SessionStore`] keeps the current session in memory and mirrors
//! every change to a pluggable [`SessionBackend`] so the session survives
//! process restarts:
//!
//! - [`FileSessionBackend`] -- JSON file in the user data directory
//! - [`KeyringSessionBackend`] -- OS credential store
//! - [`MemorySessionBackend`] -- no persistence (tests, one-shot use)
//!
//! The store is created once at startup with [`SessionStore::restore`],
//! handed to the sync engine, and cleared on logout or on the first
//! authentication failure.

pub mod backend;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::config::{SessionBackendKind, SessionConfig};
use crate::error::Result;
use crate::types::User;

pub use backend::{
    FileSessionBackend, KeyringSessionBackend, MemorySessionBackend, SessionBackend,
};

/// Minimal identity of the authenticated user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    /// Server-assigned user id
    pub id: i64,
    /// Login name
    pub username: String,
}

impl From<User> for UserIdentity {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
        }
    }
}

/// Token plus identity for the logged-in user.
///
/// The `Debug` representation never includes the token.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Bearer token sent with every authenticated request
    pub token: String,
    /// Identity, once known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserIdentity>,
}

impl Session {
    /// Create a session that has a token but no identity yet.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            user: None,
        }
    }

    /// Attach the authenticated identity.
    pub fn with_user(mut self, user: UserIdentity) -> Self {
        self.user = Some(user);
        self
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("token", &"<redacted>")
            .field("user", &self.user)
            .finish()
    }
}

/// Build the backend selected in configuration.
///
/// # Errors
///
/// Returns [`crate::error::ParleyError::Storage`] when the file backend has
/// no configured path and no user data directory can be determined.
pub fn create_backend(config: &SessionConfig) -> Result<Arc<dyn SessionBackend>> {
    let backend: Arc<dyn SessionBackend> = match config.backend {
        SessionBackendKind::File => match &config.path {
            Some(path) => Arc::new(FileSessionBackend::new(path)),
            None => Arc::new(FileSessionBackend::default_location()?),
        },
        SessionBackendKind::Keyring => Arc::new(KeyringSessionBackend::new()),
        SessionBackendKind::Memory => Arc::new(MemorySessionBackend::default()),
    };
    tracing::debug!(backend = ?config.backend, "session backend selected");
    Ok(backend)
}

/// In-memory session mirrored to a persistent backend.
///
/// Cloning yields another handle to the same session.
#[derive(Debug, Clone)]
pub struct SessionStore {
    backend: Arc<dyn SessionBackend>,
    current: Arc<RwLock<Option<Session>>>,
}

impl SessionStore {
    /// Create an empty store over `backend` without loading anything.
    pub fn new(backend: Arc<dyn SessionBackend>) -> Self {
        Self {
            backend,
            current: Arc::new(RwLock::new(None)),
        }
    }

    /// Create a store and load any persisted session from `backend`.
    ///
    /// A persisted session that cannot be read back is discarded and the
    /// backend is cleared, leaving the store logged out.
    pub async fn restore(backend: Arc<dyn SessionBackend>) -> Self {
        let store = Self::new(backend);
        match store.backend.load() {
            Ok(Some(session)) => {
                tracing::info!(
                    user = session.user.as_ref().map(|u| u.username.as_str()),
                    "restored session"
                );
                *store.current.write().await = Some(session);
            }
            Ok(None) => tracing::debug!("no persisted session"),
            Err(e) => {
                tracing::warn!(error = %e, "discarding unreadable session");
                if let Err(e) = store.backend.clear() {
                    tracing::warn!(error = %e, "failed to clear unreadable session");
                }
            }
        }
        store
    }

    /// Replace the current session and persist it.
    pub async fn establish(&self, session: Session) -> Result<()> {
        self.backend.save(&session)?;
        *self.current.write().await = Some(session);
        Ok(())
    }

    /// Record the identity for the current session and persist it.
    ///
    /// Does nothing when no session is active.
    pub async fn set_identity(&self, user: UserIdentity) -> Result<()> {
        let mut current = self.current.write().await;
        if let Some(session) = current.as_mut() {
            session.user = Some(user);
            self.backend.save(session)?;
        }
        Ok(())
    }

    /// Current bearer token, if logged in.
    pub async fn token(&self) -> Option<String> {
        self.current.read().await.as_ref().map(|s| s.token.clone())
    }

    /// Identity of the logged-in user, if known.
    pub async fn identity(&self) -> Option<UserIdentity> {
        self.current
            .read()
            .await
            .as_ref()
            .and_then(|s| s.user.clone())
    }

    /// Snapshot of the whole session.
    pub async fn current(&self) -> Option<Session> {
        self.current.read().await.clone()
    }

    /// Returns `true` when a session is active.
    pub async fn is_active(&self) -> bool {
        self.current.read().await.is_some()
    }

    /// Drop the session from memory and from the backend.
    ///
    /// Memory is cleared even when the backend fails; the backend error is
    /// returned afterwards.
    pub async fn clear(&self) -> Result<()> {
        self.current.write().await.take();
        self.backend.clear()
    }

    /// Drop the session after the server rejected it.
    ///
    /// Returns `true` only for the call that actually removed an active
    /// session, so concurrent failures invalidate once. Backend errors are
    /// logged.
    pub async fn invalidate(&self) -> bool {
        let previous = self.current.write().await.take();
        if let Err(e) = self.backend.clear() {
            tracing::warn!(error = %e, "failed to clear persisted session");
        }
        previous.is_some()
    }
}
