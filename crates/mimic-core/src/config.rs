//! Worker session configuration.
//!
//! The worker is started with one JSON object describing the whole session.
//! It is loaded once and never changes afterwards.
//!
//! ## Usage
//!
//! ```
//! use mimic_core::config::{Mode, SessionConfig};
//!
//! let config = SessionConfig::from_json(
//!     r#"{"mode":"certs","ipcSocketPath":"/tmp/mimic.sock","storageDir":"/tmp/mimic"}"#,
//! )
//! .unwrap();
//! assert_eq!(config.mode, Mode::Certs);
//! assert!(config.reject_unauthorized);
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration could not be parsed.
    #[error("Invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),

    /// A required field is missing or empty.
    #[error("Missing configuration field: {0}")]
    Missing(&'static str),

    /// No storage directory was given and none could be derived.
    #[error("No storage directory available")]
    NoStorageDir,
}

/// Result type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// What the worker does with inbound requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Open proxied connections.
    #[default]
    #[serde(alias = "proxy")]
    Connect,

    /// Issue leaf certificates.
    Certs,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Certs => "certs",
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Process-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    #[serde(default)]
    pub mode: Mode,

    /// Control channel endpoint.
    pub ipc_socket_path: String,

    /// Directory holding CA material and logs.
    #[serde(default)]
    pub storage_dir: Option<PathBuf>,

    /// Default TLS profile id.
    #[serde(default)]
    pub client_hello_id: Option<String>,

    /// Verify server certificates.
    #[serde(default = "default_true")]
    pub reject_unauthorized: bool,

    /// IP TTL for outbound sockets.
    #[serde(default)]
    pub tcp_ttl: Option<u32>,

    /// Receive buffer size for outbound sockets.
    #[serde(default)]
    pub tcp_window_size: Option<u32>,

    #[serde(default)]
    pub debug: bool,

    /// Trace every forwarded chunk.
    #[serde(default)]
    pub debug_data: bool,
}

fn default_true() -> bool {
    true
}

impl SessionConfig {
    /// Creates a config with defaults for everything but the control endpoint.
    pub fn new(ipc_socket_path: impl Into<String>) -> Self {
        Self {
            mode: Mode::default(),
            ipc_socket_path: ipc_socket_path.into(),
            storage_dir: None,
            client_hello_id: None,
            reject_unauthorized: true,
            tcp_ttl: None,
            tcp_window_size: None,
            debug: false,
            debug_data: false,
        }
    }

    /// Parses and validates a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks required fields.
    pub fn validate(&self) -> Result<()> {
        if self.ipc_socket_path.trim().is_empty() {
            return Err(ConfigError::Missing("ipcSocketPath"));
        }
        Ok(())
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.storage_dir = Some(dir.into());
        self
    }

    pub fn with_client_hello_id(mut self, id: impl Into<String>) -> Self {
        self.client_hello_id = Some(id.into());
        self
    }

    pub fn with_reject_unauthorized(mut self, reject: bool) -> Self {
        self.reject_unauthorized = reject;
        self
    }

    pub fn with_tcp_ttl(mut self, ttl: u32) -> Self {
        self.tcp_ttl = Some(ttl);
        self
    }

    pub fn with_tcp_window_size(mut self, size: u32) -> Self {
        self.tcp_window_size = Some(size);
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_debug_data(mut self, debug_data: bool) -> Self {
        self.debug_data = debug_data;
        self
    }

    /// Returns the storage directory, falling back to the platform data dir.
    pub fn resolved_storage_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.storage_dir {
            return Ok(dir.clone());
        }
        directories::ProjectDirs::from("com", "mimic", "Mimic")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .ok_or(ConfigError::NoStorageDir)
    }
}
