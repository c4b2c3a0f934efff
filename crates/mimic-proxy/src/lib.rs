//! Mimic Proxy - connection worker.
//!
//! Takes connection requests from a controller over a local control channel
//! and, for each one, joins a local data-plane endpoint to a remote host
//! using a browser-shaped TLS handshake.
//!
//! ## Features
//!
//! - Direct, HTTP(S) CONNECT and SOCKS5 dialing
//! - TLS handshakes driven by fingerprint profiles, with NSS key logging
//! - Bidirectional pipe with half-close and backpressure handling
//! - Certificate authority issuing leaf certificates on demand (certs mode)
//! - Line-delimited JSON control protocol with a single serialized writer
//!
//! ## Architecture
//!
//! ```text
//! controller ──line JSON──► WorkerServer ──► Connection (one task each)
//!                                              │
//!        local endpoint ◄── Pipe ◄── TLS ◄── Dialer ──► remote / proxy
//! ```
//!
//! ## Usage
//!
//! ```no_run
//! use mimic_core::SessionConfig;
//! use mimic_proxy::WorkerServer;
//!
//! # async fn run() -> mimic_proxy::Result<()> {
//! let config = SessionConfig::new("/tmp/mimic-control.sock");
//! let handle = WorkerServer::new(config)?.start();
//! // ...
//! handle.stop().await
//! # }
//! ```

pub mod ca;
mod connection;
pub mod dialer;
mod error;
pub mod ipc;
mod pipe;
mod server;
mod stream;
pub mod tls;

pub use ca::{CertificateAuthority, IssuedCertificate, RootMaterial};
pub use connection::{Connection, ConnectionContext};
pub use dialer::{Credentials, DialTarget, Dialer, ProxyEndpoint, ProxyScheme};
pub use error::{CaManagerError, ConnectError, DialPhase, Direction, ProxyError, Result, TransportOp};
pub use ipc::{LocalConnector, SocketConnector};
pub use pipe::{Pipe, PipeExit, BUFFER_SIZE};
pub use server::{WorkerHandle, WorkerServer};
pub use stream::{AsyncStream, BoxedStream, DialedStream};
pub use tls::{HandshakeParams, KeyLogFile, NegotiatedTls, TlsNegotiator};
