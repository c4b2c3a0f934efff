//! Control-plane message types.
//!
//! The controller and the worker exchange one JSON object per line. Inbound
//! lines are either a [`ConnectionRequest`] (connect mode) or a
//! [`CertRequest`] (certs mode). Every outbound line is an
//! [`OutboundMessage`]: a connection id plus a `status`-tagged [`Outcome`].
//!
//! ## Usage
//!
//! ```
//! use mimic_core::protocol::{ErrorStep, OutboundMessage, Outcome};
//!
//! let msg = OutboundMessage::new(7, Outcome::error(Some(ErrorStep::Dial), "connection refused"));
//! let line = msg.to_line().unwrap();
//! assert!(line.ends_with('\n'));
//! assert!(line.contains(r#""error-step":"dial""#));
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize};

use crate::alps::AlpsFrames;

/// Step at which a connection failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorStep {
    #[serde(rename = "ipc-connect")]
    IpcConnect,
    #[serde(rename = "dial")]
    Dial,
    #[serde(rename = "emulateTls")]
    EmulateTls,
    #[serde(rename = "readErr")]
    ReadErr,
    #[serde(rename = "writeErr")]
    WriteErr,
}

impl ErrorStep {
    /// Returns the wire name of the step.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IpcConnect => "ipc-connect",
            Self::Dial => "dial",
            Self::EmulateTls => "emulateTls",
            Self::ReadErr => "readErr",
            Self::WriteErr => "writeErr",
        }
    }
}

impl std::fmt::Display for ErrorStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One settings pair as sent to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingEntry {
    pub id: u16,
    pub value: u32,
}

/// Decoded ALPS frames in their wire form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlpsSummary {
    /// Base64 of the raw ACCEPT_CH payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accept_ch_payload: Option<String>,
    pub settings: Vec<SettingEntry>,
}

impl From<&AlpsFrames> for AlpsSummary {
    fn from(frames: &AlpsFrames) -> Self {
        Self {
            accept_ch_payload: frames.accept_ch_payload.as_ref().map(|p| BASE64.encode(p)),
            settings: frames
                .settings
                .iter()
                .map(|s| SettingEntry {
                    id: s.id,
                    value: s.value,
                })
                .collect(),
        }
    }
}

/// Details reported when a connection is established.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedInfo {
    /// Negotiated ALPN protocol, empty when none was agreed.
    pub alpn: String,
    /// Base64 of the peer's raw application settings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_application_settings: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alps: Option<AlpsSummary>,
    pub remote_address: String,
    pub local_address: String,
}

impl ConnectedInfo {
    /// Attaches a raw application settings payload and its decoded frames.
    pub fn with_application_settings(mut self, raw: &[u8]) -> Self {
        self.raw_application_settings = Some(BASE64.encode(raw));
        let frames = AlpsFrames::decode(raw);
        if !frames.is_empty() {
            self.alps = Some(AlpsSummary::from(&frames));
        }
        self
    }
}

/// The status-tagged body of an outbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Outcome {
    /// Certs mode start-up: the leaf-signing key as PEM.
    Init {
        #[serde(rename = "privateKey")]
        private_key: String,
    },
    Connected(ConnectedInfo),
    Certs {
        cert: String,
        /// Expiry as seconds since the Unix epoch.
        #[serde(rename = "expireDate")]
        expire_date: i64,
    },
    /// The remote finished sending; the connection stays open.
    Eof,
    Error {
        #[serde(rename = "error-step", skip_serializing_if = "Option::is_none")]
        step: Option<ErrorStep>,
        error: String,
    },
    Closing,
}

impl Outcome {
    pub fn error(step: Option<ErrorStep>, error: impl Into<String>) -> Self {
        Self::Error {
            step,
            error: error.into(),
        }
    }

    /// Returns true for outcomes that end a connection.
    ///
    /// An `error` only ends a connection that never reached `connected`;
    /// callers track that themselves.
    pub fn is_closing(&self) -> bool {
        matches!(self, Self::Closing)
    }

    pub fn status(&self) -> &'static str {
        match self {
            Self::Init { .. } => "init",
            Self::Connected(_) => "connected",
            Self::Certs { .. } => "certs",
            Self::Eof => "eof",
            Self::Error { .. } => "error",
            Self::Closing => "closing",
        }
    }
}

/// One outbound control-plane line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub id: u64,
    #[serde(flatten)]
    pub outcome: Outcome,
}

impl OutboundMessage {
    pub fn new(id: u64, outcome: Outcome) -> Self {
        Self { id, outcome }
    }

    /// Encodes the message as a single newline-terminated JSON line.
    pub fn to_line(&self) -> serde_json::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// Request to open one proxied connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionRequest {
    pub id: u64,
    /// Local data-plane endpoint for this connection.
    pub socket_path: String,
    pub host: String,
    #[serde(deserialize_with = "port_from_number_or_string")]
    pub port: u16,
    #[serde(default = "default_true")]
    pub is_ssl: bool,
    /// SNI override; defaults to `host`.
    #[serde(default)]
    pub servername: Option<String>,
    #[serde(default)]
    pub proxy_url: Option<String>,
    /// Explicit `user:password`, preferred over credentials in `proxy_url`.
    #[serde(default)]
    pub proxy_auth: Option<String>,
    /// User-Agent sent on proxy CONNECT requests.
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub keep_alive: bool,
    #[serde(default)]
    pub is_websocket: bool,
    #[serde(default)]
    pub keylog_path: Option<PathBuf>,
    /// ALPN protocol -> base64 application settings payload.
    #[serde(default)]
    pub application_settings: BTreeMap<String, String>,
    /// Per-connection override of the session's profile id.
    #[serde(default)]
    pub client_hello_id: Option<String>,
}

impl ConnectionRequest {
    /// Server name to present in the handshake.
    pub fn server_name(&self) -> &str {
        self.servername
            .as_deref()
            .filter(|name| !name.is_empty())
            .unwrap_or(&self.host)
    }

    /// `host:port` of the target.
    pub fn target(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Decoded application settings payload for a protocol.
    ///
    /// Returns `None` when absent or not valid base64.
    pub fn application_settings_for(&self, protocol: &str) -> Option<Vec<u8>> {
        let encoded = self.application_settings.get(protocol)?;
        BASE64.decode(encoded).ok()
    }
}

/// Certs mode request for a leaf certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertRequest {
    pub id: u64,
    pub host: String,
}

fn default_true() -> bool {
    true
}

fn port_from_number_or_string<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Port {
        Number(u16),
        Text(String),
    }

    match Port::deserialize(deserializer)? {
        Port::Number(port) => Ok(port),
        Port::Text(text) => text
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid port: {:?}", text))),
    }
}
