//! Control-plane server.
//!
//! The worker connects out to the controller's socket and reads one JSON
//! request per line. In connect mode each line opens a [`Connection`]; in
//! certs mode each line asks for a leaf certificate. Every reply goes
//! through one writer task so lines from concurrent connections never
//! interleave.

use std::sync::Arc;

use mimic_core::fingerprint::Resolver;
use mimic_core::protocol::{CertRequest, ConnectionRequest, OutboundMessage, Outcome};
use mimic_core::{Mode, SessionConfig};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::ca::CertificateAuthority;
use crate::connection::{Connection, ConnectionContext};
use crate::error::{ConnectError, ProxyError, Result};
use crate::ipc::{connect_local, LocalConnector, SocketConnector};
use crate::stream::BoxedStream;
use crate::tls::TlsNegotiator;

/// Outbound messages buffered ahead of the writer.
const OUTBOUND_QUEUE: usize = 1024;

/// The worker process's control loop.
pub struct WorkerServer {
    config: SessionConfig,
    connector: Arc<dyn LocalConnector>,
    resolver: Resolver,
    negotiator: Option<TlsNegotiator>,
}

impl std::fmt::Debug for WorkerServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerServer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl WorkerServer {
    /// Creates a server for a validated session configuration.
    pub fn new(config: SessionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            connector: Arc::new(SocketConnector),
            resolver: Resolver::new(),
            negotiator: None,
        })
    }

    /// Sets how local endpoints are opened.
    pub fn with_connector(mut self, connector: Arc<dyn LocalConnector>) -> Self {
        self.connector = connector;
        self
    }

    /// Sets the fingerprint resolver, e.g. one with an external bucket table.
    pub fn with_resolver(mut self, resolver: Resolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Replaces the TLS negotiator built from the session config.
    pub fn with_negotiator(mut self, negotiator: TlsNegotiator) -> Self {
        self.negotiator = Some(negotiator);
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Runs until the control channel closes.
    pub async fn run(self) -> Result<()> {
        self.serve(CancellationToken::new()).await
    }

    /// Runs the server in the background.
    pub fn start(self) -> WorkerHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let result = self.serve(token.clone()).await;
            token.cancel();
            result
        });
        WorkerHandle { cancel, handle }
    }

    async fn serve(self, cancel: CancellationToken) -> Result<()> {
        let control = connect_local(self.connector.as_ref(), &self.config.ipc_socket_path)
            .await
            .map_err(ProxyError::Connect)?;
        info!(
            "Control channel connected: {} ({} mode)",
            self.config.ipc_socket_path,
            self.config.mode.as_str()
        );

        let (reader, writer) = tokio::io::split(control);
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE);
        let writer = tokio::spawn(write_messages(writer, rx));
        let tasks = TaskTracker::new();

        let served = match self.config.mode {
            Mode::Connect => self.serve_connections(reader, &tx, &tasks, &cancel).await,
            Mode::Certs => self.serve_certs(reader, &tx, &tasks, &cancel).await,
        };

        cancel.cancel();
        tasks.close();
        tasks.wait().await;
        drop(tx);

        match writer.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Control channel write failed: {}", e),
            Err(e) => error!("Writer task failed: {}", e),
        }
        info!("Worker stopped");
        served
    }

    async fn serve_connections(
        &self,
        reader: ReadHalf<BoxedStream>,
        tx: &mpsc::Sender<OutboundMessage>,
        tasks: &TaskTracker,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut ctx = ConnectionContext::new(&self.config)
            .with_resolver(self.resolver.clone())
            .with_connector(self.connector.clone());
        if let Some(negotiator) = &self.negotiator {
            ctx = ctx.with_negotiator(negotiator.clone());
        }
        let ctx = Arc::new(ctx);

        let mut lines = BufReader::new(reader).lines();
        while let Some(line) = next_line(&mut lines, cancel).await {
            let request: ConnectionRequest = match serde_json::from_str(&line) {
                Ok(request) => request,
                Err(e) => {
                    warn!("Ignoring malformed request: {}", e);
                    continue;
                }
            };
            let conn = Connection::new(ctx.clone(), request, cancel, tx.clone());
            tasks.spawn(conn.run());
        }
        Ok(())
    }

    async fn serve_certs(
        &self,
        reader: ReadHalf<BoxedStream>,
        tx: &mpsc::Sender<OutboundMessage>,
        tasks: &TaskTracker,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let storage_dir = self.config.resolved_storage_dir()?;
        let ca = tokio::task::spawn_blocking(move || CertificateAuthority::init(storage_dir))
            .await
            .map_err(|e| ProxyError::Tls(format!("CA initialisation panicked: {}", e)))??;
        let ca = Arc::new(ca);
        info!("Certificate authority ready in {:?}", ca.storage_dir());

        let init = Outcome::Init {
            private_key: ca.leaf_key_pem(),
        };
        if tx.send(OutboundMessage::new(0, init)).await.is_err() {
            return Ok(());
        }

        let mut lines = BufReader::new(reader).lines();
        while let Some(line) = next_line(&mut lines, cancel).await {
            let request: CertRequest = match serde_json::from_str(&line) {
                Ok(request) => request,
                Err(e) => {
                    warn!("Ignoring malformed cert request: {}", e);
                    continue;
                }
            };
            let ca = ca.clone();
            let tx = tx.clone();
            tasks.spawn(async move {
                let outcome = issue(ca, request.host).await;
                let _ = tx.send(OutboundMessage::new(request.id, outcome)).await;
            });
        }
        Ok(())
    }
}

async fn issue(ca: Arc<CertificateAuthority>, host: String) -> Outcome {
    let issued = tokio::task::spawn_blocking(move || {
        ca.issue_leaf(&host).map_err(|e| ConnectError::CertIssuance {
            detail: format!("{}: {}", host, e),
        })
    })
    .await;

    match issued {
        Ok(Ok(cert)) => Outcome::Certs {
            cert: cert.pem,
            expire_date: cert.expire_date,
        },
        Ok(Err(e)) => {
            warn!("{}", e);
            Outcome::error(e.step(), e.to_string())
        }
        Err(e) => Outcome::error(None, format!("Certificate issuance failed: {}", e)),
    }
}

/// Next non-empty line, or `None` on EOF, read error or cancellation.
async fn next_line(
    lines: &mut tokio::io::Lines<BufReader<ReadHalf<BoxedStream>>>,
    cancel: &CancellationToken,
) -> Option<String> {
    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Control loop cancelled");
                return None;
            }
            line = lines.next_line() => line,
        };
        match line {
            Ok(Some(line)) if line.trim().is_empty() => continue,
            Ok(Some(line)) => return Some(line),
            Ok(None) => {
                info!("Control channel closed");
                return None;
            }
            Err(e) => {
                warn!("Control channel read failed: {}", e);
                return None;
            }
        }
    }
}

/// Writes each message as one flushed line, in queue order.
async fn write_messages(
    mut writer: WriteHalf<BoxedStream>,
    mut rx: mpsc::Receiver<OutboundMessage>,
) -> std::io::Result<()> {
    while let Some(message) = rx.recv().await {
        let line = match message.to_line() {
            Ok(line) => line,
            Err(e) => {
                error!("Failed to encode message {}: {}", message.id, e);
                continue;
            }
        };
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
    }
    writer.shutdown().await
}

/// Handle for controlling a running worker.
pub struct WorkerHandle {
    cancel: CancellationToken,
    handle: JoinHandle<Result<()>>,
}

impl WorkerHandle {
    /// Signals the worker and every connection to shut down.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Resolves once shutdown has begun, whether requested or because the
    /// control channel ended.
    pub async fn stopping(&self) {
        self.cancel.cancelled().await;
    }

    /// Waits for the worker to finish.
    pub async fn wait(self) -> Result<()> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) => Err(ProxyError::Io(std::io::Error::other(e))),
        }
    }

    /// Shuts down the worker and waits for it to finish.
    pub async fn stop(self) -> Result<()> {
        self.shutdown();
        self.wait().await
    }
}
