//! Local byte-stream endpoints: the control channel and per-connection pipes.
//!
//! On Unix an endpoint path names a Unix domain socket; on Windows it names
//! a named pipe.

use std::io;

use async_trait::async_trait;
use tracing::debug;

use crate::error::ConnectError;
use crate::stream::BoxedStream;

/// Opens local endpoints by path.
#[async_trait]
pub trait LocalConnector: Send + Sync {
    async fn connect(&self, path: &str) -> io::Result<BoxedStream>;
}

/// Connector for the platform's native local sockets.
#[derive(Debug, Clone, Copy, Default)]
pub struct SocketConnector;

#[async_trait]
impl LocalConnector for SocketConnector {
    #[cfg(unix)]
    async fn connect(&self, path: &str) -> io::Result<BoxedStream> {
        let stream = tokio::net::UnixStream::connect(path).await?;
        Ok(Box::new(stream))
    }

    #[cfg(windows)]
    async fn connect(&self, path: &str) -> io::Result<BoxedStream> {
        use tokio::net::windows::named_pipe::ClientOptions;

        let client = ClientOptions::new().open(path)?;
        Ok(Box::new(client))
    }
}

/// Connects to a local endpoint, reporting failures as `ipc-connect` errors.
pub async fn connect_local(
    connector: &dyn LocalConnector,
    path: &str,
) -> Result<BoxedStream, ConnectError> {
    if path.is_empty() {
        return Err(ConnectError::ipc("empty socket path"));
    }
    let stream = connector
        .connect(path)
        .await
        .map_err(|e| ConnectError::ipc(format!("{}: {}", path, e)))?;
    debug!("Connected to local endpoint {}", path);
    Ok(stream)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::UnixListener;

    #[tokio::test]
    async fn connects_to_unix_socket() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("conn.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(b"hello").await.unwrap();
        });

        let mut stream = connect_local(&SocketConnector, path.to_str().unwrap())
            .await
            .unwrap();
        let mut buf = [0u8; 5];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn missing_socket_is_ipc_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing.sock");

        let err = connect_local(&SocketConnector, path.to_str().unwrap())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ConnectError::Ipc { .. }));
        assert!(matches!(
            connect_local(&SocketConnector, "").await,
            Err(ConnectError::Ipc { .. })
        ));
    }
}
