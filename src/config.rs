//! Configuration management for Parley
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files, environment variables, and CLI overrides.

use crate::error::{ParleyError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use url::Url;

/// Main configuration structure for Parley
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Chat server endpoints
    #[serde(default)]
    pub server: ServerConfig,
    /// Sync engine tuning
    #[serde(default)]
    pub sync: SyncConfig,
    /// Session persistence
    #[serde(default)]
    pub session: SessionConfig,
    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Chat server endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Base URL of the HTTP API
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Push stream base URL; derived from `base_url` when unset
    #[serde(default)]
    pub ws_url: Option<String>,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            ws_url: None,
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

/// Sync engine tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Fixed delay before reconnecting an abnormally closed push connection
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Capacity of the change-notification broadcast channel
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_reconnect_delay_ms() -> u64 {
    2000
}

fn default_event_buffer() -> usize {
    256
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: default_reconnect_delay_ms(),
            event_buffer: default_event_buffer(),
        }
    }
}

/// Where the session is persisted
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionBackendKind {
    /// JSON file in the data directory
    #[default]
    File,
    /// OS credential store
    Keyring,
    /// Not persisted
    Memory,
}

impl FromStr for SessionBackendKind {
    type Err = ParleyError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "file" => Ok(Self::File),
            "keyring" => Ok(Self::Keyring),
            "memory" => Ok(Self::Memory),
            other => Err(ParleyError::Config(format!(
                "Invalid session backend: {}. Must be one of: file, keyring, memory",
                other
            ))),
        }
    }
}

/// Session persistence
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Backend kind
    #[serde(default)]
    pub backend: SessionBackendKind,

    /// Session file for the `file` backend; defaults to the data directory
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Log output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,

    /// Also append logs to this file
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            file: None,
        }
    }
}

impl Config {
    /// Load configuration from file with environment and CLI overrides
    ///
    /// A missing file is not an error; defaults are used instead.
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ParleyError::Config(format!("Failed to read config file: {}", e)))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| ParleyError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self) {
        if let Ok(url) = std::env::var("PARLEY_SERVER_URL") {
            self.server.base_url = url;
        }

        if let Ok(url) = std::env::var("PARLEY_WS_URL") {
            self.server.ws_url = Some(url);
        }

        if let Ok(timeout) = std::env::var("PARLEY_REQUEST_TIMEOUT_SECONDS") {
            if let Ok(value) = timeout.parse() {
                self.server.request_timeout_seconds = value;
            } else {
                tracing::warn!("Invalid PARLEY_REQUEST_TIMEOUT_SECONDS: {}", timeout);
            }
        }

        if let Ok(delay) = std::env::var("PARLEY_RECONNECT_DELAY_MS") {
            if let Ok(value) = delay.parse() {
                self.sync.reconnect_delay_ms = value;
            } else {
                tracing::warn!("Invalid PARLEY_RECONNECT_DELAY_MS: {}", delay);
            }
        }

        if let Ok(backend) = std::env::var("PARLEY_SESSION_BACKEND") {
            match backend.parse() {
                Ok(kind) => self.session.backend = kind,
                Err(e) => tracing::warn!("Ignoring PARLEY_SESSION_BACKEND: {}", e),
            }
        }

        if let Ok(path) = std::env::var("PARLEY_SESSION_PATH") {
            self.session.path = Some(PathBuf::from(path));
        }

        if let Ok(json) = std::env::var("PARLEY_LOG_JSON") {
            self.logging.json = matches!(json.to_lowercase().as_str(), "1" | "true" | "yes");
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if let Some(server) = &cli.server {
            self.server.base_url = server.clone();
        }
        if let Some(path) = &cli.session_path {
            self.session.path = Some(path.clone());
        }
        if cli.verbose {
            tracing::debug!("Verbose mode enabled");
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns error if any validation check fails
    pub fn validate(&self) -> Result<()> {
        let base = Url::parse(&self.server.base_url).map_err(|e| {
            ParleyError::Config(format!(
                "Invalid server.base_url {}: {}",
                self.server.base_url, e
            ))
        })?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(ParleyError::Config(format!(
                "server.base_url must use http or https, got {}",
                base.scheme()
            ))
            .into());
        }

        if let Some(ws_url) = &self.server.ws_url {
            let ws = Url::parse(ws_url).map_err(|e| {
                ParleyError::Config(format!("Invalid server.ws_url {}: {}", ws_url, e))
            })?;
            if !matches!(ws.scheme(), "ws" | "wss") {
                return Err(ParleyError::Config(format!(
                    "server.ws_url must use ws or wss, got {}",
                    ws.scheme()
                ))
                .into());
            }
        }

        if self.server.request_timeout_seconds == 0 {
            return Err(ParleyError::Config(
                "server.request_timeout_seconds must be greater than 0".to_string(),
            )
            .into());
        }

        if self.sync.reconnect_delay_ms == 0 {
            return Err(ParleyError::Config(
                "sync.reconnect_delay_ms must be greater than 0".to_string(),
            )
            .into());
        }

        if self.sync.event_buffer == 0 {
            return Err(
                ParleyError::Config("sync.event_buffer must be greater than 0".to_string()).into(),
            );
        }

        if tracing_subscriber::EnvFilter::try_new(&self.logging.level).is_err() {
            return Err(ParleyError::Config(format!(
                "Invalid logging.level: {}",
                self.logging.level
            ))
            .into());
        }

        Ok(())
    }

    /// Reconnect delay as a [`Duration`].
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.sync.reconnect_delay_ms)
    }

    /// Push stream base URL: `server.ws_url`, or `server.base_url` with
    /// `http` mapped to `ws` and `https` to `wss`.
    pub fn ws_base(&self) -> Result<Url> {
        match &self.server.ws_url {
            Some(ws_url) => Ok(Url::parse(ws_url)
                .map_err(|e| ParleyError::Config(format!("Invalid server.ws_url: {}", e)))?),
            None => {
                let base = Url::parse(&self.server.base_url)
                    .map_err(|e| ParleyError::Config(format!("Invalid server.base_url: {}", e)))?;
                crate::transport::ws::ws_base_from_http(&base)
            }
        }
    }
}
