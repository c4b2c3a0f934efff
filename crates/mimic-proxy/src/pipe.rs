//! Bidirectional pipe between the local client endpoint and the remote.
//!
//! Each direction runs as its own task. The two share a cancellation token
//! and a one-slot gate the client→remote side signals after every write.
//!
//! End-of-stream handling:
//!
//! - client closes: the whole connection ends
//! - remote closes before sending anything: the whole connection ends
//! - remote closes after sending data: an `eof` message goes out and the
//!   remote→client side parks until the client sends more or the
//!   connection is cancelled
//!
//! The first fault or close decides how the pipe exits; both writers are
//! shut down once after both directions have stopped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mimic_core::protocol::{OutboundMessage, Outcome};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::{ConnectError, Direction, TransportOp};
use crate::stream::BoxedStream;

/// Per-read buffer size.
pub const BUFFER_SIZE: usize = 32 * 1024;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Why a pipe stopped.
#[derive(Debug)]
pub enum PipeExit {
    ClientClosed,
    /// The remote closed without ever sending a byte.
    RemoteClosedEmpty,
    Cancelled,
    Failed(ConnectError),
}

struct Shared {
    id: u64,
    cancel: CancellationToken,
    gate: Notify,
    forwarded_to_client: AtomicU64,
    exit: Mutex<Option<PipeExit>>,
    outbound: mpsc::Sender<OutboundMessage>,
    debug_data: bool,
}

impl Shared {
    /// Records the first exit reason and stops both directions.
    fn finish(&self, exit: PipeExit) {
        {
            let mut slot = self.exit.lock();
            if slot.is_none() {
                debug!("[{}] pipe finishing: {:?}", self.id, exit);
                *slot = Some(exit);
            }
        }
        self.cancel.cancel();
    }

    fn fail(&self, direction: Direction, op: TransportOp, e: std::io::Error) {
        self.finish(PipeExit::Failed(ConnectError::Transport {
            direction,
            op,
            detail: e.to_string(),
        }));
    }
}

/// A pipe for one connection.
pub struct Pipe {
    id: u64,
    cancel: CancellationToken,
    outbound: mpsc::Sender<OutboundMessage>,
    debug_data: bool,
}

impl Pipe {
    pub fn new(id: u64, cancel: CancellationToken, outbound: mpsc::Sender<OutboundMessage>) -> Self {
        Self {
            id,
            cancel,
            outbound,
            debug_data: false,
        }
    }

    /// Logs every forwarded chunk at trace level.
    pub fn with_debug_data(mut self, debug_data: bool) -> Self {
        self.debug_data = debug_data;
        self
    }

    /// Forwards bytes both ways until one side ends the connection.
    pub async fn run(self, client: BoxedStream, remote: BoxedStream) -> PipeExit {
        let (client_rd, client_wr) = tokio::io::split(client);
        let (remote_rd, remote_wr) = tokio::io::split(remote);

        let shared = Arc::new(Shared {
            id: self.id,
            cancel: self.cancel,
            gate: Notify::new(),
            forwarded_to_client: AtomicU64::new(0),
            exit: Mutex::new(None),
            outbound: self.outbound,
            debug_data: self.debug_data,
        });

        let upstream = tokio::spawn(client_to_remote(shared.clone(), client_rd, remote_wr));
        let downstream = tokio::spawn(remote_to_client(shared.clone(), remote_rd, client_wr));
        let (remote_wr, client_wr) = tokio::join!(upstream, downstream);

        if let Ok(mut writer) = remote_wr {
            close_writer(shared.id, Direction::ClientToRemote, &mut writer).await;
        }
        if let Ok(mut writer) = client_wr {
            close_writer(shared.id, Direction::RemoteToClient, &mut writer).await;
        }

        let exit = shared.exit.lock().take();
        exit.unwrap_or(PipeExit::Cancelled)
    }
}

async fn close_writer<W: AsyncWrite + Unpin>(id: u64, direction: Direction, writer: &mut W) {
    match tokio::time::timeout(SHUTDOWN_TIMEOUT, writer.shutdown()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!("[{}] {} shutdown: {}", id, direction, e),
        Err(_) => debug!("[{}] {} shutdown timed out", id, direction),
    }
}

/// Writes one chunk, returning false once the pipe has been cancelled.
async fn forward<W: AsyncWrite + Unpin>(
    shared: &Shared,
    direction: Direction,
    writer: &mut W,
    chunk: &[u8],
) -> bool {
    let write = async {
        writer.write_all(chunk).await?;
        writer.flush().await
    };
    tokio::select! {
        _ = shared.cancel.cancelled() => false,
        result = write => match result {
            Ok(()) => {
                if shared.debug_data {
                    trace!("[{}] {} {} bytes", shared.id, direction, chunk.len());
                }
                true
            }
            Err(e) => {
                shared.fail(direction, TransportOp::Write, e);
                false
            }
        },
    }
}

async fn client_to_remote(
    shared: Arc<Shared>,
    mut reader: ReadHalf<BoxedStream>,
    mut writer: WriteHalf<BoxedStream>,
) -> WriteHalf<BoxedStream> {
    let direction = Direction::ClientToRemote;
    let mut buf = vec![0u8; BUFFER_SIZE];

    loop {
        let read = tokio::select! {
            _ = shared.cancel.cancelled() => break,
            read = reader.read(&mut buf) => read,
        };
        match read {
            Ok(0) => {
                shared.finish(PipeExit::ClientClosed);
                break;
            }
            Ok(n) => {
                if !forward(&shared, direction, &mut writer, &buf[..n]).await {
                    break;
                }
                shared.gate.notify_one();
            }
            Err(e) => {
                shared.fail(direction, TransportOp::Read, e);
                break;
            }
        }
    }
    writer
}

async fn remote_to_client(
    shared: Arc<Shared>,
    mut reader: ReadHalf<BoxedStream>,
    mut writer: WriteHalf<BoxedStream>,
) -> WriteHalf<BoxedStream> {
    let direction = Direction::RemoteToClient;
    let mut buf = vec![0u8; BUFFER_SIZE];
    let mut eof_reported = false;

    loop {
        let read = tokio::select! {
            _ = shared.cancel.cancelled() => break,
            read = reader.read(&mut buf) => read,
        };
        match read {
            Ok(0) => {
                if shared.forwarded_to_client.load(Ordering::Acquire) == 0 {
                    shared.finish(PipeExit::RemoteClosedEmpty);
                    break;
                }
                if !eof_reported {
                    eof_reported = true;
                    debug!("[{}] remote finished sending", shared.id);
                    let eof = OutboundMessage::new(shared.id, Outcome::Eof);
                    if shared.outbound.send(eof).await.is_err() {
                        shared.finish(PipeExit::Cancelled);
                        break;
                    }
                }
                tokio::select! {
                    _ = shared.cancel.cancelled() => break,
                    _ = shared.gate.notified() => {}
                }
            }
            Ok(n) => {
                eof_reported = false;
                if !forward(&shared, direction, &mut writer, &buf[..n]).await {
                    break;
                }
                shared
                    .forwarded_to_client
                    .fetch_add(n as u64, Ordering::AcqRel);
            }
            Err(e) => {
                shared.fail(direction, TransportOp::Read, e);
                break;
            }
        }
    }
    writer
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::{TcpListener, TcpStream};
    use tokio::task::JoinHandle;

    /// A connected pair of TCP sockets.
    async fn tcp_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (connected, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        (connected.unwrap(), accepted.unwrap().0)
    }

    struct Harness {
        /// Test-side end of the client endpoint.
        client: TcpStream,
        /// Test-side end of the remote.
        remote: TcpStream,
        cancel: CancellationToken,
        messages: mpsc::Receiver<OutboundMessage>,
        pipe: JoinHandle<PipeExit>,
    }

    async fn start() -> Harness {
        let (client, client_side) = tcp_pair().await;
        let (remote, remote_side) = tcp_pair().await;
        let (tx, messages) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        let pipe = Pipe::new(1, cancel.clone(), tx).with_debug_data(true);
        let pipe = tokio::spawn(pipe.run(Box::new(client_side), Box::new(remote_side)));

        Harness {
            client,
            remote,
            cancel,
            messages,
            pipe,
        }
    }

    async fn finished(pipe: &mut JoinHandle<PipeExit>) -> PipeExit {
        tokio::time::timeout(Duration::from_secs(5), pipe)
            .await
            .expect("pipe did not finish")
            .unwrap()
    }

    #[tokio::test]
    async fn forwards_both_ways() {
        let mut h = start().await;

        h.client.write_all(b"request").await.unwrap();
        let mut buf = [0u8; 7];
        h.remote.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"request");

        h.remote.write_all(b"response").await.unwrap();
        let mut buf = [0u8; 8];
        h.client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"response");

        h.cancel.cancel();
        assert!(matches!(finished(&mut h.pipe).await, PipeExit::Cancelled));
    }

    #[tokio::test]
    async fn remote_half_close_keeps_connection_open() {
        let mut h = start().await;

        h.remote.write_all(b"0123456789").await.unwrap();
        h.remote.shutdown().await.unwrap();

        let mut buf = [0u8; 10];
        h.client.read_exact(&mut buf).await.unwrap();

        let eof = h.messages.recv().await.unwrap();
        assert_eq!(eof, OutboundMessage::new(1, Outcome::Eof));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!h.pipe.is_finished());

        // More client data still reaches the remote.
        h.client.write_all(b"more").await.unwrap();
        let mut buf = [0u8; 4];
        h.remote.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"more");
        assert!(!h.pipe.is_finished());

        h.client.shutdown().await.unwrap();
        assert!(matches!(finished(&mut h.pipe).await, PipeExit::ClientClosed));
        assert!(h.messages.try_recv().is_err(), "eof is reported once");
    }

    #[tokio::test]
    async fn remote_close_without_data_ends_immediately() {
        let mut h = start().await;

        h.remote.shutdown().await.unwrap();
        assert!(matches!(
            finished(&mut h.pipe).await,
            PipeExit::RemoteClosedEmpty
        ));

        // The client endpoint is closed too.
        let mut buf = [0u8; 1];
        assert_eq!(h.client.read(&mut buf).await.unwrap(), 0);
        assert!(h.messages.try_recv().is_err());
    }

    #[tokio::test]
    async fn client_close_ends_connection() {
        let mut h = start().await;

        h.client.write_all(b"bye").await.unwrap();
        h.client.shutdown().await.unwrap();

        assert!(matches!(finished(&mut h.pipe).await, PipeExit::ClientClosed));

        let mut received = Vec::new();
        h.remote.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"bye");
    }

    #[tokio::test]
    async fn remote_read_error_is_reported_with_direction() {
        let (_client, client_side) = tcp_pair().await;
        let remote = tokio_test::io::Builder::new()
            .read_error(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "reset by peer",
            ))
            .build();
        let (tx, _rx) = mpsc::channel(4);

        let exit = Pipe::new(9, CancellationToken::new(), tx)
            .run(Box::new(client_side), Box::new(remote))
            .await;

        match exit {
            PipeExit::Failed(ConnectError::Transport { direction, op, detail }) => {
                assert_eq!(direction, Direction::RemoteToClient);
                assert_eq!(op, TransportOp::Read);
                assert!(detail.contains("reset by peer"));
            }
            other => panic!("unexpected exit: {:?}", other),
        }
    }
}
