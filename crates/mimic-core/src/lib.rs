//! Mimic Core - fingerprint profiles, ALPS decoding and control-plane types.
//!
//! This crate holds the I/O-free half of the Mimic worker: everything here is
//! deterministic and safe to share between connection tasks.
//!
//! ## Modules
//!
//! - [`config`]: session configuration loaded at start-up
//! - [`fingerprint`]: browser TLS profiles and the version-bucket resolver
//! - [`alps`]: application settings frame decoding
//! - [`protocol`]: line-JSON control-plane messages

pub mod alps;
pub mod config;
pub mod fingerprint;
pub mod protocol;

pub use alps::{AcceptCh, AlpsFrames, Setting};
pub use config::{ConfigError, Mode, SessionConfig};
pub use fingerprint::{resolve, Resolver, TlsFingerprintProfile};
pub use protocol::{
    CertRequest, ConnectedInfo, ConnectionRequest, ErrorStep, OutboundMessage, Outcome,
};
