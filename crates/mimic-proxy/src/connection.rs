//! Per-connection lifecycle.
//!
//! A connection moves through local endpoint connect, dial, optional TLS,
//! `connected`, then the pipe. Outcomes reported on the control channel:
//!
//! - failure before `connected`: one `error`, nothing else
//! - after `connected`: one `error` if the pipe failed, otherwise one
//!   `closing`
//! - cancelled before `connected`: one `closing`
//!
//! Exactly one of these ends every connection id.

use std::sync::Arc;

use mimic_core::fingerprint::Resolver;
use mimic_core::protocol::{ConnectedInfo, ConnectionRequest, OutboundMessage, Outcome};
use mimic_core::SessionConfig;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dialer::{DialTarget, Dialer};
use crate::error::ConnectError;
use crate::ipc::{connect_local, LocalConnector, SocketConnector};
use crate::pipe::{Pipe, PipeExit};
use crate::stream::BoxedStream;
use crate::tls::{HandshakeParams, TlsNegotiator};

/// Everything connections share within one worker.
pub struct ConnectionContext {
    dialer: Dialer,
    negotiator: TlsNegotiator,
    resolver: Resolver,
    connector: Arc<dyn LocalConnector>,
    default_profile: Option<String>,
    debug_data: bool,
}

impl ConnectionContext {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            dialer: Dialer::new(config),
            negotiator: TlsNegotiator::new(config.reject_unauthorized),
            resolver: Resolver::new(),
            connector: Arc::new(SocketConnector),
            default_profile: config.client_hello_id.clone(),
            debug_data: config.debug_data,
        }
    }

    pub fn with_resolver(mut self, resolver: Resolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_negotiator(mut self, negotiator: TlsNegotiator) -> Self {
        self.negotiator = negotiator;
        self
    }

    pub fn with_connector(mut self, connector: Arc<dyn LocalConnector>) -> Self {
        self.connector = connector;
        self
    }
}

impl std::fmt::Debug for ConnectionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionContext")
            .field("dialer", &self.dialer)
            .field("negotiator", &self.negotiator)
            .field("default_profile", &self.default_profile)
            .field("debug_data", &self.debug_data)
            .finish()
    }
}

struct Established {
    client: BoxedStream,
    remote: BoxedStream,
    info: ConnectedInfo,
}

/// One proxied connection.
pub struct Connection {
    ctx: Arc<ConnectionContext>,
    request: ConnectionRequest,
    cancel: CancellationToken,
    outbound: mpsc::Sender<OutboundMessage>,
}

impl Connection {
    /// `cancel` is the worker-wide token; the connection derives its own.
    pub fn new(
        ctx: Arc<ConnectionContext>,
        request: ConnectionRequest,
        cancel: &CancellationToken,
        outbound: mpsc::Sender<OutboundMessage>,
    ) -> Self {
        Self {
            ctx,
            request,
            cancel: cancel.child_token(),
            outbound,
        }
    }

    async fn emit(&self, outcome: Outcome) {
        let id = self.request.id;
        debug!("[{}] -> {}", id, outcome.status());
        if self.outbound.send(OutboundMessage::new(id, outcome)).await.is_err() {
            debug!("[{}] control channel gone", id);
        }
    }

    async fn emit_error(&self, err: &ConnectError) {
        self.emit(Outcome::error(err.step(), err.to_string())).await;
    }

    /// Runs the connection to completion.
    pub async fn run(self) {
        let id = self.request.id;
        debug!("[{}] opening {}", id, self.request.target());

        let established = tokio::select! {
            _ = self.cancel.cancelled() => {
                debug!("[{}] cancelled before connect", id);
                self.emit(Outcome::Closing).await;
                return;
            }
            result = self.establish() => result,
        };

        let Established {
            client,
            remote,
            info,
        } = match established {
            Ok(established) => established,
            Err(e) => {
                warn!("[{}] {}", id, e);
                self.emit_error(&e).await;
                return;
            }
        };

        info!(
            "[{}] connected to {} (alpn {:?})",
            id,
            self.request.target(),
            info.alpn
        );
        self.emit(Outcome::Connected(info)).await;

        let exit = Pipe::new(id, self.cancel.clone(), self.outbound.clone())
            .with_debug_data(self.ctx.debug_data)
            .run(client, remote)
            .await;

        debug!("[{}] pipe ended: {:?}", id, exit);
        match exit {
            PipeExit::Failed(e) => {
                warn!("[{}] {}", id, e);
                self.emit_error(&e).await;
            }
            _ => self.emit(Outcome::Closing).await,
        }
    }

    async fn establish(&self) -> Result<Established, ConnectError> {
        let req = &self.request;

        let client = connect_local(self.ctx.connector.as_ref(), &req.socket_path).await?;

        let dialed = self.ctx.dialer.dial(&DialTarget::from(req)).await?;
        let mut info = ConnectedInfo {
            remote_address: dialed.remote_address(),
            local_address: dialed.local_address(),
            ..ConnectedInfo::default()
        };

        if !req.is_ssl {
            return Ok(Established {
                client,
                remote: dialed.stream,
                info,
            });
        }

        let profile_id = req
            .client_hello_id
            .as_deref()
            .or(self.ctx.default_profile.as_deref());
        let mut profile = self.ctx.resolver.resolve(profile_id, req.is_websocket);
        profile.application_settings = profile
            .alpn_protocols()
            .iter()
            .find_map(|proto| req.application_settings_for(proto));

        let params = HandshakeParams {
            connection_id: req.id,
            server_name: req.server_name(),
            profile: &profile,
            keylog_path: req.keylog_path.as_deref(),
        };
        let negotiated = self.ctx.negotiator.negotiate(dialed.stream, &params).await?;

        info.alpn = negotiated.alpn;
        if let Some(raw) = negotiated.peer_application_settings.as_deref() {
            info = info.with_application_settings(raw);
        }

        Ok(Established {
            client,
            remote: negotiated.stream,
            info,
        })
    }
}
