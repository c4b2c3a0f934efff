//! Plain TCP connects with socket tuning.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};
use tokio::net::{lookup_host, TcpSocket, TcpStream};
use tracing::{debug, warn};

use crate::error::{ConnectError, DialPhase};

/// Connect timeout, covering name resolution and every address tried.
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(15);

const KEEPALIVE_IDLE: Duration = Duration::from_secs(60);

/// Advisory socket settings. Failures to apply them are logged only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SocketTuning {
    pub ttl: Option<u32>,
    pub recv_window: Option<u32>,
    pub keep_alive: bool,
}

/// Resolves `host` and connects to the first address that accepts.
pub async fn connect_tcp(
    host: &str,
    port: u16,
    tuning: &SocketTuning,
    phase: DialPhase,
) -> Result<TcpStream, ConnectError> {
    let attempt = async {
        let addrs: Vec<SocketAddr> = lookup_host((host, port)).await?.collect();
        let mut last_err = io::Error::new(io::ErrorKind::NotFound, "no such host");
        for addr in addrs {
            match connect_addr(addr, tuning).await {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    debug!("Connect to {} failed: {}", addr, e);
                    last_err = e;
                }
            }
        }
        Err(last_err)
    };

    match tokio::time::timeout(DIAL_TIMEOUT, attempt).await {
        Ok(Ok(stream)) => {
            apply_tuning(&stream, tuning);
            Ok(stream)
        }
        Ok(Err(e)) => Err(ConnectError::dial(phase, format!("{}:{}: {}", host, port, e))),
        Err(_) => Err(ConnectError::dial(
            phase,
            format!("{}:{}: connect timed out after {:?}", host, port, DIAL_TIMEOUT),
        )),
    }
}

async fn connect_addr(addr: SocketAddr, tuning: &SocketTuning) -> io::Result<TcpStream> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    if let Some(window) = tuning.recv_window {
        if let Err(e) = socket.set_recv_buffer_size(window) {
            warn!("Failed to set receive window {}: {}", window, e);
        }
    }
    socket.connect(addr).await
}

fn apply_tuning(stream: &TcpStream, tuning: &SocketTuning) {
    if let Some(ttl) = tuning.ttl {
        if let Err(e) = stream.set_ttl(ttl) {
            warn!("Failed to set TTL {}: {}", ttl, e);
        }
    }
    if let Err(e) = stream.set_nodelay(true) {
        warn!("Failed to disable Nagle: {}", e);
    }
    if tuning.keep_alive {
        let keepalive = TcpKeepalive::new().with_time(KEEPALIVE_IDLE);
        if let Err(e) = SockRef::from(stream).set_tcp_keepalive(&keepalive) {
            warn!("Failed to enable keep-alive: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn connects_and_applies_tuning() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let tuning = SocketTuning {
            ttl: Some(64),
            recv_window: Some(65536),
            keep_alive: true,
        };
        let stream = connect_tcp("127.0.0.1", port, &tuning, DialPhase::Direct)
            .await
            .unwrap();

        assert_eq!(stream.ttl().unwrap(), 64);
        assert!(stream.nodelay().unwrap());
        assert!(SockRef::from(&stream).keepalive().unwrap());
    }

    #[tokio::test]
    async fn refused_connect_is_a_dial_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = connect_tcp("127.0.0.1", port, &SocketTuning::default(), DialPhase::Socks5)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ConnectError::Dial {
                phase: DialPhase::Socks5,
                ..
            }
        ));
    }
}
