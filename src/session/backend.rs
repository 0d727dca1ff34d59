//! Session persistence backends
//!
//! Backends are synchronous: each call is a single small read or write and
//! is made outside any network await.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Context;
use directories::ProjectDirs;

use super::Session;
use crate::error::{ParleyError, Result};

/// Storage for the persisted session.
///
/// `load` returns `Ok(None)` when nothing has been saved, and an error when
/// something was saved but cannot be read back.
pub trait SessionBackend: Send + Sync + std::fmt::Debug {
    /// Read the persisted session, if any.
    fn load(&self) -> Result<Option<Session>>;

    /// Persist `session`, replacing any previous one.
    fn save(&self, session: &Session) -> Result<()>;

    /// Remove the persisted session. Succeeds when nothing is stored.
    fn clear(&self) -> Result<()>;
}

// ---------------------------------------------------------------------------
// File
// ---------------------------------------------------------------------------

/// JSON file backend, by default `<data_dir>/session.json`.
#[derive(Debug, Clone)]
pub struct FileSessionBackend {
    path: PathBuf,
}

impl FileSessionBackend {
    /// Use the file at `path`.
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    /// Use `session.json` in the platform data directory.
    ///
    /// # Errors
    ///
    /// Returns [`ParleyError::Storage`] if no home directory can be found.
    pub fn default_location() -> Result<Self> {
        let dirs = ProjectDirs::from("com", "parley", "parley")
            .ok_or_else(|| ParleyError::Storage("Could not determine data directory".into()))?;
        Ok(Self::new(dirs.data_dir().join("session.json")))
    }

    /// Location of the session file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionBackend for FileSessionBackend {
    fn load(&self) -> Result<Option<Session>> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ParleyError::Io(e).into()),
        };
        let session: Session = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse session file {}", self.path.display()))?;
        Ok(Some(session))
    }

    fn save(&self, session: &Session) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .context("Failed to create session directory")
                .map_err(|e| ParleyError::Storage(e.to_string()))?;
        }
        let json = serde_json::to_string_pretty(session)?;
        std::fs::write(&self.path, json)
            .with_context(|| format!("Failed to write session file {}", self.path.display()))
            .map_err(|e| ParleyError::Storage(e.to_string()))?;
        restrict_permissions(&self.path)?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ParleyError::Io(e).into()),
        }
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Keyring
// ---------------------------------------------------------------------------

const KEYRING_SERVICE: &str = "parley-session";
const KEYRING_ACCOUNT: &str = "default";

/// OS credential store backend.
///
/// The session is serialized to JSON and stored as the password of a
/// single keyring entry.
#[derive(Debug, Clone)]
pub struct KeyringSessionBackend {
    account: String,
}

impl KeyringSessionBackend {
    /// Use the default account name.
    pub fn new() -> Self {
        Self::for_account(KEYRING_ACCOUNT)
    }

    /// Use a specific account name, e.g. one per server.
    pub fn for_account(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
        }
    }

    fn entry(&self) -> Result<keyring::Entry> {
        Ok(keyring::Entry::new(KEYRING_SERVICE, &self.account).map_err(ParleyError::Keyring)?)
    }
}

impl Default for KeyringSessionBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionBackend for KeyringSessionBackend {
    fn load(&self) -> Result<Option<Session>> {
        match self.entry()?.get_password() {
            Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(ParleyError::Keyring(e).into()),
        }
    }

    fn save(&self, session: &Session) -> Result<()> {
        let json = serde_json::to_string(session)?;
        self.entry()?
            .set_password(&json)
            .map_err(ParleyError::Keyring)?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match self.entry()?.delete_password() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(ParleyError::Keyring(e).into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Memory
// ---------------------------------------------------------------------------

/// Backend that keeps the session only for the life of the process.
#[derive(Debug, Default)]
pub struct MemorySessionBackend {
    slot: Mutex<Option<Session>>,
}

impl MemorySessionBackend {
    /// Start with `session` already stored.
    pub fn with_session(session: Session) -> Self {
        Self {
            slot: Mutex::new(Some(session)),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Option<Session>>> {
        self.slot
            .lock()
            .map_err(|_| ParleyError::Storage("session slot poisoned".into()).into())
    }
}

impl SessionBackend for MemorySessionBackend {
    fn load(&self) -> Result<Option<Session>> {
        Ok(self.lock()?.clone())
    }

    fn save(&self, session: &Session) -> Result<()> {
        *self.lock()? = Some(session.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.lock()?.take();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::UserIdentity;
    use tempfile::TempDir;

    fn sample() -> Session {
        Session::new("abc").with_user(UserIdentity {
            id: 1,
            username: "carol".into(),
        })
    }

    #[test]
    fn test_file_backend_missing_file_is_none() {
        let dir = TempDir::new().unwrap();
        let backend = FileSessionBackend::new(dir.path().join("session.json"));
        assert!(backend.load().unwrap().is_none());
    }

    #[test]
    fn test_file_backend_save_load_clear() {
        let dir = TempDir::new().unwrap();
        let backend = FileSessionBackend::new(dir.path().join("nested").join("session.json"));

        backend.save(&sample()).unwrap();
        assert_eq!(backend.load().unwrap(), Some(sample()));

        backend.clear().unwrap();
        assert!(backend.load().unwrap().is_none());
        backend.clear().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_file_backend_restricts_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let backend = FileSessionBackend::new(dir.path().join("session.json"));
        backend.save(&sample()).unwrap();
        let mode = std::fs::metadata(backend.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_file_backend_corrupt_file_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "[]").unwrap();
        let backend = FileSessionBackend::new(&path);
        assert!(backend.load().is_err());
    }

    #[test]
    fn test_memory_backend_round_trip() {
        let backend = MemorySessionBackend::default();
        assert!(backend.load().unwrap().is_none());
        backend.save(&sample()).unwrap();
        assert_eq!(backend.load().unwrap(), Some(sample()));
        backend.clear().unwrap();
        assert!(backend.load().unwrap().is_none());
    }

    #[test]
    fn test_default_location_ends_with_session_json() {
        if let Ok(backend) = FileSessionBackend::default_location() {
            assert!(backend.path().ends_with("session.json"));
        }
    }
}
