//! Error types for the worker.

use mimic_core::protocol::ErrorStep;
use mimic_core::ConfigError;
use thiserror::Error;

/// Worker error type.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// CA certificate error.
    #[error("CA error: {0}")]
    Ca(#[from] CaManagerError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS error.
    #[error("TLS error: {0}")]
    Tls(String),

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Connection error.
    #[error(transparent)]
    Connect(#[from] ConnectError),
}

/// CA manager error type.
#[derive(Debug, Error)]
pub enum CaManagerError {
    /// Failed to generate a key or certificate.
    #[error("Failed to generate CA: {0}")]
    Generation(String),

    /// Failed to read CA material.
    #[error("Failed to read CA: {0}")]
    Read(#[from] std::io::Error),

    /// Failed to parse CA material.
    #[error("Failed to parse CA: {0}")]
    Parse(String),

    /// Failed to write CA material.
    #[error("Failed to write CA: {0}")]
    Write(String),
}

/// How the outbound transport was being established.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialPhase {
    Direct,
    HttpProxy,
    Socks5,
}

impl DialPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::HttpProxy => "http-proxy",
            Self::Socks5 => "socks5",
        }
    }

    /// Prefix the controller matches on to classify dial failures.
    fn marker(&self) -> &'static str {
        match self {
            Self::Direct => "Dial (proxy/remote)",
            Self::HttpProxy => "HTTP_PROXY_ERR",
            Self::Socks5 => "SOCKS5_PROXY_ERR",
        }
    }
}

impl std::fmt::Display for DialPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Pipe direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToRemote,
    RemoteToClient,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClientToRemote => "client->remote",
            Self::RemoteToClient => "remote->client",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which half of a pipe transfer failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportOp {
    Read,
    Write,
}

/// Connection-local failures, each reported once on the control channel.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("{} {}", .phase.marker(), .detail)]
    Dial { phase: DialPhase, detail: String },

    #[error("tlsConn.Handshake error: {detail}")]
    Handshake { detail: String },

    #[error("{direction} {op:?} error: {detail}")]
    Transport {
        direction: Direction,
        op: TransportOp,
        detail: String,
    },

    #[error("IPC failed: {detail}")]
    Ipc { detail: String },

    #[error("Certificate issuance failed: {detail}")]
    CertIssuance { detail: String },
}

impl ConnectError {
    pub fn dial(phase: DialPhase, detail: impl Into<String>) -> Self {
        Self::Dial {
            phase,
            detail: detail.into(),
        }
    }

    pub fn handshake(detail: impl Into<String>) -> Self {
        Self::Handshake {
            detail: detail.into(),
        }
    }

    pub fn ipc(detail: impl Into<String>) -> Self {
        Self::Ipc {
            detail: detail.into(),
        }
    }

    /// The control-plane step this error is reported under.
    pub fn step(&self) -> Option<ErrorStep> {
        match self {
            Self::Dial { .. } => Some(ErrorStep::Dial),
            Self::Handshake { .. } => Some(ErrorStep::EmulateTls),
            Self::Transport {
                op: TransportOp::Read,
                ..
            } => Some(ErrorStep::ReadErr),
            Self::Transport {
                op: TransportOp::Write,
                ..
            } => Some(ErrorStep::WriteErr),
            Self::Ipc { .. } => Some(ErrorStep::IpcConnect),
            Self::CertIssuance { .. } => None,
        }
    }
}

/// Result type for worker operations.
pub type Result<T> = std::result::Result<T, ProxyError>;
