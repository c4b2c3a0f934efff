//! Type-erased byte streams.

use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncWrite};

/// Any bidirectional async byte stream.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

/// Owned, type-erased stream: plain TCP, TLS over TCP, or a local IPC pipe.
pub type BoxedStream = Box<dyn AsyncStream>;

/// An established outbound transport and the socket addresses behind it.
pub struct DialedStream {
    pub stream: BoxedStream,
    /// Peer of the underlying TCP socket (the proxy when one is used).
    pub remote_addr: Option<SocketAddr>,
    pub local_addr: Option<SocketAddr>,
}

impl DialedStream {
    pub fn new(stream: BoxedStream) -> Self {
        Self {
            stream,
            remote_addr: None,
            local_addr: None,
        }
    }

    pub fn with_addrs(mut self, remote: Option<SocketAddr>, local: Option<SocketAddr>) -> Self {
        self.remote_addr = remote;
        self.local_addr = local;
        self
    }

    pub fn remote_address(&self) -> String {
        self.remote_addr.map(|a| a.to_string()).unwrap_or_default()
    }

    pub fn local_address(&self) -> String {
        self.local_addr.map(|a| a.to_string()).unwrap_or_default()
    }
}

impl std::fmt::Debug for DialedStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DialedStream")
            .field("remote_addr", &self.remote_addr)
            .field("local_addr", &self.local_addr)
            .finish()
    }
}
