//! TLS handshake negotiation driven by a fingerprint profile.
//!
//! The resolved profile is applied to a BoringSSL client, the same TLS stack
//! Chromium ships, so the ClientHello matches the browser it describes:
//!
//! - TLS 1.2 cipher suites in profile order (TLS 1.3 suites are always offered
//!   in BoringSSL's built-in order)
//! - supported groups, signature algorithms and the version range
//! - GREASE and per-handshake extension permutation
//! - status request, signed certificate timestamps, session tickets and
//!   certificate compression as the profile lists them
//! - ALPN and ALPS (application settings), dropped for websocket profiles
//! - SNI on or off depending on the profile's server name extension
//!
//! Non-Chromium profiles keep their cipher, group and sigalg order, but their
//! extensions go out in BoringSSL's order.
//!
//! Each handshake runs once with a bounded timeout. The negotiated ALPN and
//! the peer's application settings are handed back for the `connected`
//! message.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use boring::error::ErrorStack;
use boring::ssl::{
    CertificateCompressionAlgorithm, CertificateCompressor, SslConnector, SslMethod, SslOptions,
    SslRef, SslVerifyMode, SslVersion,
};
use boring::x509::X509;
use boring_sys as ffi;
use foreign_types::ForeignTypeRef;
use mimic_core::fingerprint::{
    cipher, group, sigalg, version, Extension, ExtensionKind, ExtensionOrder, PaddingPolicy,
    TlsFingerprintProfile,
};
use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::error::ConnectError;
use crate::stream::BoxedStream;

/// Upper bound on one handshake.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(15);

/// Certificate compression algorithm codes.
const CERT_COMPRESSION_ZLIB: u16 = 1;
const CERT_COMPRESSION_BROTLI: u16 = 2;

/// Appends session secrets in NSS key log format.
pub struct KeyLogFile {
    file: Mutex<File>,
}

impl KeyLogFile {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    /// Writes one key log line as produced by the TLS stack.
    pub fn append(&self, line: &str) {
        let mut file = self.file.lock();
        if let Err(e) = writeln!(file, "{}", line) {
            warn!("Failed to write key log: {}", e);
        }
    }
}

impl std::fmt::Debug for KeyLogFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyLogFile").finish_non_exhaustive()
    }
}

/// Decompresses brotli certificate chains. Never compresses.
struct BrotliCertificates;

impl CertificateCompressor for BrotliCertificates {
    const ALGORITHM: CertificateCompressionAlgorithm = CertificateCompressionAlgorithm::BROTLI;
    const CAN_COMPRESS: bool = false;
    const CAN_DECOMPRESS: bool = true;

    fn compress<W>(&self, _input: &[u8], _output: &mut W) -> io::Result<()>
    where
        W: Write,
    {
        Err(io::Error::new(io::ErrorKind::Unsupported, "client never compresses"))
    }

    fn decompress<W>(&self, input: &[u8], output: &mut W) -> io::Result<()>
    where
        W: Write,
    {
        let mut reader = brotli::Decompressor::new(input, 4096);
        io::copy(&mut reader, output)?;
        Ok(())
    }
}

/// Decompresses zlib certificate chains. Never compresses.
struct ZlibCertificates;

impl CertificateCompressor for ZlibCertificates {
    const ALGORITHM: CertificateCompressionAlgorithm = CertificateCompressionAlgorithm::ZLIB;
    const CAN_COMPRESS: bool = false;
    const CAN_DECOMPRESS: bool = true;

    fn compress<W>(&self, _input: &[u8], _output: &mut W) -> io::Result<()>
    where
        W: Write,
    {
        Err(io::Error::new(io::ErrorKind::Unsupported, "client never compresses"))
    }

    fn decompress<W>(&self, input: &[u8], output: &mut W) -> io::Result<()>
    where
        W: Write,
    {
        let mut decoded = Vec::new();
        flate2::read::ZlibDecoder::new(input).read_to_end(&mut decoded)?;
        output.write_all(&decoded)
    }
}

fn cipher_name(code: u16) -> Option<&'static str> {
    let name = match code {
        cipher::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256 => "ECDHE-ECDSA-AES128-GCM-SHA256",
        cipher::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256 => "ECDHE-RSA-AES128-GCM-SHA256",
        cipher::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384 => "ECDHE-ECDSA-AES256-GCM-SHA384",
        cipher::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384 => "ECDHE-RSA-AES256-GCM-SHA384",
        cipher::TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256 => "ECDHE-ECDSA-CHACHA20-POLY1305",
        cipher::TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256 => "ECDHE-RSA-CHACHA20-POLY1305",
        cipher::TLS_ECDHE_ECDSA_WITH_AES_128_CBC_SHA => "ECDHE-ECDSA-AES128-SHA",
        cipher::TLS_ECDHE_ECDSA_WITH_AES_256_CBC_SHA => "ECDHE-ECDSA-AES256-SHA",
        cipher::TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA => "ECDHE-RSA-AES128-SHA",
        cipher::TLS_ECDHE_RSA_WITH_AES_256_CBC_SHA => "ECDHE-RSA-AES256-SHA",
        cipher::TLS_RSA_WITH_AES_128_GCM_SHA256 => "AES128-GCM-SHA256",
        cipher::TLS_RSA_WITH_AES_256_GCM_SHA384 => "AES256-GCM-SHA384",
        cipher::TLS_RSA_WITH_AES_128_CBC_SHA => "AES128-SHA",
        cipher::TLS_RSA_WITH_AES_256_CBC_SHA => "AES256-SHA",
        cipher::TLS_RSA_WITH_3DES_EDE_CBC_SHA => "DES-CBC3-SHA",
        _ => return None,
    };
    Some(name)
}

fn is_tls13_suite(code: u16) -> bool {
    matches!(
        code,
        cipher::TLS_AES_128_GCM_SHA256
            | cipher::TLS_AES_256_GCM_SHA384
            | cipher::TLS_CHACHA20_POLY1305_SHA256
    )
}

fn curve_name(code: u16) -> Option<&'static str> {
    let name = match code {
        group::X25519_MLKEM768 => "X25519MLKEM768",
        group::X25519 => "X25519",
        group::SECP256R1 => "P-256",
        group::SECP384R1 => "P-384",
        group::SECP521R1 => "P-521",
        _ => return None,
    };
    Some(name)
}

fn sigalg_name(code: u16) -> Option<&'static str> {
    let name = match code {
        sigalg::RSA_PKCS1_SHA1 => "rsa_pkcs1_sha1",
        sigalg::ECDSA_SHA1 => "ecdsa_sha1",
        sigalg::RSA_PKCS1_SHA256 => "rsa_pkcs1_sha256",
        sigalg::ECDSA_SECP256R1_SHA256 => "ecdsa_secp256r1_sha256",
        sigalg::RSA_PKCS1_SHA384 => "rsa_pkcs1_sha384",
        sigalg::ECDSA_SECP384R1_SHA384 => "ecdsa_secp384r1_sha384",
        sigalg::RSA_PKCS1_SHA512 => "rsa_pkcs1_sha512",
        sigalg::ECDSA_SECP521R1_SHA512 => "ecdsa_secp521r1_sha512",
        sigalg::RSA_PSS_RSAE_SHA256 => "rsa_pss_rsae_sha256",
        sigalg::RSA_PSS_RSAE_SHA384 => "rsa_pss_rsae_sha384",
        sigalg::RSA_PSS_RSAE_SHA512 => "rsa_pss_rsae_sha512",
        _ => return None,
    };
    Some(name)
}

fn ssl_version(code: u16) -> Option<SslVersion> {
    match code {
        version::TLS10 => Some(SslVersion::TLS1),
        version::TLS11 => Some(SslVersion::TLS1_1),
        version::TLS12 => Some(SslVersion::TLS1_2),
        version::TLS13 => Some(SslVersion::TLS1_3),
        _ => None,
    }
}

/// Joins the names of the codes that have one, logging the ones dropped.
fn name_list(
    profile: &TlsFingerprintProfile,
    what: &str,
    codes: impl IntoIterator<Item = u16>,
    name: fn(u16) -> Option<&'static str>,
) -> String {
    let mut names = Vec::new();
    for code in codes {
        match name(code) {
            Some(n) => names.push(n),
            None => debug!("Profile {}: {} {:#06x} not offered by the TLS stack", profile.id, what, code),
        }
    }
    names.join(":")
}

/// ALPN protocols in wire format (length-prefixed).
fn alpn_wire(protocols: &[String]) -> Vec<u8> {
    let mut wire = Vec::new();
    for proto in protocols {
        if let Ok(len) = u8::try_from(proto.len()) {
            wire.push(len);
            wire.extend_from_slice(proto.as_bytes());
        }
    }
    wire
}

/// Offers application settings for `protocol` on this connection.
pub(crate) fn add_application_settings(
    ssl: &mut SslRef,
    protocol: &[u8],
    settings: &[u8],
) -> Result<(), ErrorStack> {
    // SAFETY: `ssl` is a live handle and BoringSSL copies both buffers.
    let ok = unsafe {
        ffi::SSL_add_application_settings(
            ssl.as_ptr(),
            protocol.as_ptr(),
            protocol.len(),
            settings.as_ptr(),
            settings.len(),
        )
    };
    if ok == 1 {
        Ok(())
    } else {
        Err(ErrorStack::get())
    }
}

/// The peer's application settings, if ALPS was negotiated.
fn peer_application_settings(ssl: &SslRef) -> Option<Vec<u8>> {
    // SAFETY: `ssl` is a live handle; the returned buffer is owned by the
    // connection and copied before `ssl` is released.
    unsafe {
        if ffi::SSL_has_application_settings(ssl.as_ptr()) != 1 {
            return None;
        }
        let mut data: *const u8 = std::ptr::null();
        let mut len: usize = 0;
        ffi::SSL_get0_peer_application_settings(ssl.as_ptr(), &mut data, &mut len);
        if data.is_null() || len == 0 {
            return Some(Vec::new());
        }
        Some(std::slice::from_raw_parts(data, len).to_vec())
    }
}

/// Outcome of a successful handshake.
pub struct NegotiatedTls {
    pub stream: BoxedStream,
    /// Negotiated ALPN protocol, empty when none.
    pub alpn: String,
    /// Raw application settings sent by the peer, if any.
    pub peer_application_settings: Option<Vec<u8>>,
}

impl std::fmt::Debug for NegotiatedTls {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NegotiatedTls")
            .field("alpn", &self.alpn)
            .field(
                "peer_application_settings",
                &self.peer_application_settings.as_ref().map(Vec::len),
            )
            .finish()
    }
}

/// Per-handshake inputs.
#[derive(Debug, Clone, Copy)]
pub struct HandshakeParams<'a> {
    /// Control-plane id, for logging.
    pub connection_id: u64,
    pub server_name: &'a str,
    pub profile: &'a TlsFingerprintProfile,
    pub keylog_path: Option<&'a Path>,
}

/// Performs fingerprinted TLS handshakes.
#[derive(Clone)]
pub struct TlsNegotiator {
    reject_unauthorized: bool,
    extra_roots: Arc<Vec<X509>>,
}

impl std::fmt::Debug for TlsNegotiator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsNegotiator")
            .field("reject_unauthorized", &self.reject_unauthorized)
            .field("extra_roots", &self.extra_roots.len())
            .finish()
    }
}

impl TlsNegotiator {
    pub fn new(reject_unauthorized: bool) -> Self {
        Self {
            reject_unauthorized,
            extra_roots: Arc::new(Vec::new()),
        }
    }

    /// Also trusts the DER encoded root `der`.
    pub fn with_root_der(mut self, der: &[u8]) -> Result<Self, ErrorStack> {
        let root = X509::from_der(der)?;
        Arc::make_mut(&mut self.extra_roots).push(root);
        Ok(self)
    }

    /// Builds the connector for one handshake.
    pub fn connector(
        &self,
        profile: &TlsFingerprintProfile,
        keylog: Option<Arc<KeyLogFile>>,
    ) -> Result<SslConnector, ErrorStack> {
        let mut builder = SslConnector::builder(SslMethod::tls())?;

        if self.reject_unauthorized {
            for root in self.extra_roots.iter() {
                builder.cert_store_mut().add_cert(root.clone())?;
            }
        } else {
            builder.set_verify(SslVerifyMode::NONE);
        }

        let versions: Vec<u16> = profile
            .supported_versions()
            .into_iter()
            .filter(|v| ssl_version(*v).is_some())
            .collect();
        builder.set_min_proto_version(versions.iter().min().copied().and_then(ssl_version))?;
        builder.set_max_proto_version(versions.iter().max().copied().and_then(ssl_version))?;

        let ciphers = name_list(
            profile,
            "cipher suite",
            profile.real_cipher_suites().into_iter().filter(|c| !is_tls13_suite(*c)),
            cipher_name,
        );
        if !ciphers.is_empty() {
            builder.set_cipher_list(&ciphers)?;
        }

        let curves = name_list(profile, "group", profile.supported_groups(), curve_name);
        if !curves.is_empty() {
            if let Err(e) = builder.set_curves_list(&curves) {
                let classical = curves
                    .split(':')
                    .filter(|c| *c != "X25519MLKEM768")
                    .collect::<Vec<_>>()
                    .join(":");
                warn!("Profile {}: groups {} rejected ({}), using {}", profile.id, curves, e, classical);
                builder.set_curves_list(&classical)?;
            }
        }

        let sigalgs = name_list(
            profile,
            "signature algorithm",
            profile.signature_algorithms(),
            sigalg_name,
        );
        if !sigalgs.is_empty() {
            builder.set_sigalgs_list(&sigalgs)?;
        }

        builder.set_grease_enabled(profile.grease);
        builder.set_permute_extensions(profile.extension_order == ExtensionOrder::Shuffled);

        if profile.has_extension(ExtensionKind::StatusRequest) {
            builder.enable_ocsp_stapling();
        }
        if profile.has_extension(ExtensionKind::SignedCertificateTimestamp) {
            builder.enable_signed_cert_timestamps();
        }
        if !profile.has_extension(ExtensionKind::SessionTicket) {
            builder.set_options(SslOptions::NO_TICKET);
        }
        if let Some(Extension::CompressCertificate(algorithms)) =
            profile.extension(ExtensionKind::CompressCertificate)
        {
            for algorithm in algorithms {
                match *algorithm {
                    CERT_COMPRESSION_BROTLI => {
                        builder.add_certificate_compression_algorithm(BrotliCertificates)?
                    }
                    CERT_COMPRESSION_ZLIB => {
                        builder.add_certificate_compression_algorithm(ZlibCertificates)?
                    }
                    other => debug!("Profile {}: certificate compression {} not offered", profile.id, other),
                }
            }
        }
        if let Some(Extension::Padding(PaddingPolicy::Fixed(len))) =
            profile.extension(ExtensionKind::Padding)
        {
            debug!("Profile {}: fixed padding of {} bytes sent as boring-style padding", profile.id, len);
        }

        let alpn = profile.alpn_protocols();
        if !alpn.is_empty() {
            builder.set_alpn_protos(&alpn_wire(&alpn))?;
        }

        if let Some(keylog) = keylog {
            builder.set_keylog_callback(move |_, line| keylog.append(line));
        }

        Ok(builder.build())
    }

    /// Runs the handshake over `stream`.
    pub async fn negotiate(
        &self,
        stream: BoxedStream,
        params: &HandshakeParams<'_>,
    ) -> Result<NegotiatedTls, ConnectError> {
        let profile = params.profile;

        let keylog = match params.keylog_path {
            Some(path) => match KeyLogFile::open(path) {
                Ok(keylog) => Some(Arc::new(keylog)),
                Err(e) => {
                    error!(
                        "[{}] Failed to open key log {:?}: {}",
                        params.connection_id, path, e
                    );
                    return Err(ConnectError::handshake(format!(
                        "cannot open key log {:?}: {}",
                        path, e
                    )));
                }
            },
            None => None,
        };

        let handshake_error = |e: ErrorStack| ConnectError::handshake(e.to_string());
        let connector = self.connector(profile, keylog).map_err(handshake_error)?;
        let mut config = connector.configure().map_err(handshake_error)?;
        config.set_use_server_name_indication(profile.has_extension(ExtensionKind::ServerName));
        if !self.reject_unauthorized {
            config.set_verify_hostname(false);
        }

        let alpn = profile.alpn_protocols();
        if let Some(Extension::ApplicationSettings(protocols)) =
            profile.extension(ExtensionKind::ApplicationSettings)
        {
            let settings = profile.application_settings.as_deref().unwrap_or_default();
            for proto in protocols.iter().filter(|p| alpn.contains(p)) {
                add_application_settings(&mut config, proto.as_bytes(), settings)
                    .map_err(handshake_error)?;
            }
        }

        debug!(
            "[{}] TLS handshake with {} using profile {}",
            params.connection_id, params.server_name, profile.id
        );

        let connect = tokio_boring::connect(config, params.server_name, stream);
        let tls = match tokio::time::timeout(HANDSHAKE_TIMEOUT, connect).await {
            Ok(Ok(tls)) => tls,
            Ok(Err(e)) => return Err(ConnectError::handshake(e.to_string())),
            Err(_) => {
                return Err(ConnectError::handshake(format!(
                    "timed out after {:?}",
                    HANDSHAKE_TIMEOUT
                )))
            }
        };

        let alpn = tls
            .ssl()
            .selected_alpn_protocol()
            .map(|p| String::from_utf8_lossy(p).into_owned())
            .unwrap_or_default();
        let peer_application_settings = peer_application_settings(tls.ssl());

        Ok(NegotiatedTls {
            stream: Box::new(tls),
            alpn,
            peer_application_settings,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::ca::CertificateAuthority;
    use boring::pkey::PKey;
    use boring::ssl::{select_next_proto, AlpnError, SslAcceptor};
    use mimic_core::alps::{FRAME_ACCEPT_CH, FRAME_SETTINGS};
    use mimic_core::fingerprint::{resolve, GREASE};
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    /// A local TLS echo server with a certificate for `localhost`.
    pub(crate) struct TestServer {
        pub port: u16,
        pub root_der: Vec<u8>,
        _dir: TempDir,
    }

    /// Settings frame then ACCEPT_CH frame, as an `h2` server would send.
    pub(crate) fn server_alps_payload() -> Vec<u8> {
        fn frame(frame_type: u8, payload: &[u8]) -> Vec<u8> {
            let len = payload.len() as u32;
            let mut out = vec![(len >> 16) as u8, (len >> 8) as u8, len as u8, frame_type, 0];
            out.extend_from_slice(&0u32.to_be_bytes());
            out.extend_from_slice(payload);
            out
        }
        let mut settings = Vec::new();
        for (id, value) in [(0x1u16, 65536u32), (0x3, 100)] {
            settings.extend_from_slice(&id.to_be_bytes());
            settings.extend_from_slice(&value.to_be_bytes());
        }
        let mut payload = frame(FRAME_SETTINGS, &settings);
        payload.extend(frame(FRAME_ACCEPT_CH, b"ch-payload"));
        payload
    }

    /// Starts the server. `alps` is sent for `h2` when the client offers it.
    pub(crate) async fn tls_server(alpn: &'static [u8], alps: Option<Vec<u8>>) -> TestServer {
        let dir = TempDir::new().unwrap();
        let ca = CertificateAuthority::init(dir.path()).unwrap();
        let issued = ca.issue_leaf("localhost").unwrap();
        let cert = X509::from_pem(issued.pem.as_bytes()).unwrap();
        let key = PKey::private_key_from_pem(ca.leaf_key_pem().as_bytes()).unwrap();

        let mut builder = SslAcceptor::mozilla_intermediate_v5(SslMethod::tls()).unwrap();
        builder.set_certificate(&cert).unwrap();
        builder.set_private_key(&key).unwrap();
        builder.set_alpn_select_callback(move |ssl, client| {
            let selected = select_next_proto(alpn, client).ok_or(AlpnError::NOACK)?;
            if let Some(settings) = &alps {
                let _ = add_application_settings(ssl, selected, settings);
            }
            Ok(selected)
        });
        let acceptor = Arc::new(builder.build());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((sock, _)) = listener.accept().await {
                let acceptor = acceptor.clone();
                tokio::spawn(async move {
                    if let Ok(mut tls) = tokio_boring::accept(&acceptor, sock).await {
                        let mut buf = [0u8; 64];
                        if let Ok(n) = tls.read(&mut buf).await {
                            let _ = tls.write_all(&buf[..n]).await;
                        }
                    }
                });
            }
        });

        TestServer {
            port,
            root_der: ca.root_cert_der().to_vec(),
            _dir: dir,
        }
    }

    async fn connect(port: u16) -> BoxedStream {
        Box::new(TcpStream::connect(("127.0.0.1", port)).await.unwrap())
    }

    fn is_grease(v: u16) -> bool {
        v & 0x0f0f == 0x0a0a && v >> 8 == v & 0xff
    }

    /// Cipher suites and extension types of a ClientHello message.
    struct ClientHello {
        ciphers: Vec<u16>,
        extensions: Vec<u16>,
    }

    impl ClientHello {
        fn parse(msg: &[u8]) -> Self {
            let be16 = |at: usize| u16::from_be_bytes([msg[at], msg[at + 1]]);
            assert_eq!(msg[0], 1, "not a ClientHello");

            // type(1) length(3) version(2) random(32)
            let mut pos = 4 + 2 + 32;
            pos += 1 + msg[pos] as usize;

            let cipher_len = be16(pos) as usize;
            pos += 2;
            let ciphers = msg[pos..pos + cipher_len]
                .chunks(2)
                .map(|c| u16::from_be_bytes([c[0], c[1]]))
                .collect();
            pos += cipher_len;
            pos += 1 + msg[pos] as usize;

            let end = pos + 2 + be16(pos) as usize;
            pos += 2;
            let mut extensions = Vec::new();
            while pos < end {
                extensions.push(be16(pos));
                pos += 4 + be16(pos + 2) as usize;
            }
            Self { ciphers, extensions }
        }

        fn real_extensions(&self) -> Vec<u16> {
            self.extensions.iter().copied().filter(|e| !is_grease(*e)).collect()
        }
    }

    /// Captures the first ClientHello sent for `profile`.
    async fn captured_hello(profile: &TlsFingerprintProfile) -> ClientHello {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let profile = profile.clone();
        let client = tokio::spawn(async move {
            let params = HandshakeParams {
                connection_id: 1,
                server_name: "example.com",
                profile: &profile,
                keylog_path: None,
            };
            let _ = TlsNegotiator::new(false)
                .negotiate(connect(port).await, &params)
                .await;
        });

        let (mut sock, _) = listener.accept().await.unwrap();
        let mut header = [0u8; 5];
        sock.read_exact(&mut header).await.unwrap();
        assert_eq!(header[0], 0x16, "not a handshake record");
        let len = u16::from_be_bytes([header[3], header[4]]) as usize;
        let mut body = vec![0u8; len];
        sock.read_exact(&mut body).await.unwrap();
        drop(sock);
        let _ = client.await;

        ClientHello::parse(&body)
    }

    /// Profile extension codes, minus padding when the stack did not need it.
    fn expected_extensions(profile: &TlsFingerprintProfile, hello: &ClientHello) -> Vec<u16> {
        let padding = ExtensionKind::Padding.code();
        let sent_padding = hello.extensions.contains(&padding);
        profile
            .extension_codes()
            .into_iter()
            .filter(|code| sent_padding || *code != padding)
            .collect()
    }

    fn assert_cipher_order(profile: &TlsFingerprintProfile, hello: &ClientHello) {
        assert_eq!(hello.ciphers.first().copied().map(is_grease), Some(profile.grease));

        let wire: Vec<u16> = hello.ciphers.iter().copied().filter(|c| !is_grease(*c)).collect();
        let (wire13, wire12): (Vec<u16>, Vec<u16>) = wire.iter().partition(|c| is_tls13_suite(**c));
        let (want13, want12): (Vec<u16>, Vec<u16>) = profile
            .real_cipher_suites()
            .into_iter()
            .partition(|c| is_tls13_suite(*c));

        // TLS 1.3 suites lead, in the stack's order.
        assert_eq!(&wire[..wire13.len()], wire13.as_slice());
        let mut sorted13 = wire13.clone();
        sorted13.sort_unstable();
        let mut want_sorted13 = want13;
        want_sorted13.sort_unstable();
        assert_eq!(sorted13, want_sorted13);

        assert_eq!(wire12, want12);
    }

    #[tokio::test]
    async fn fixed_order_hello_matches_profile_on_the_wire() {
        let profile = resolve(Some("chrome-87"), false);
        let hello = captured_hello(&profile).await;

        assert_cipher_order(&profile, &hello);
        assert!(is_grease(hello.extensions[0]));
        assert_eq!(hello.real_extensions(), expected_extensions(&profile, &hello));
    }

    #[tokio::test]
    async fn shuffled_hello_sends_the_profile_extension_set() {
        let profile = resolve(Some("chrome-106"), false);
        assert_eq!(profile.extension_order, ExtensionOrder::Shuffled);
        let hello = captured_hello(&profile).await;

        assert_cipher_order(&profile, &hello);

        let mut wire = hello.real_extensions();
        let mut want = expected_extensions(&profile, &hello);
        wire.sort_unstable();
        want.sort_unstable();
        assert_eq!(wire, want);

        for kind in [
            ExtensionKind::ApplicationSettings,
            ExtensionKind::CompressCertificate,
            ExtensionKind::SignedCertificateTimestamp,
            ExtensionKind::RenegotiationInfo,
        ] {
            assert!(hello.extensions.contains(&kind.code()), "{:?} missing", kind);
        }
    }

    #[tokio::test]
    async fn websocket_hello_offers_no_alpn_or_alps() {
        let profile = resolve(Some("chrome-106"), true);
        let hello = captured_hello(&profile).await;

        assert!(!hello.extensions.contains(&ExtensionKind::Alpn.code()));
        assert!(!hello.extensions.contains(&ExtensionKind::ApplicationSettings.code()));
        assert!(hello.extensions.contains(&ExtensionKind::ServerName.code()));
    }

    #[tokio::test]
    async fn greaseless_profile_sends_no_grease() {
        let profile = resolve(Some("firefox-78"), false);
        assert!(!profile.grease);
        let hello = captured_hello(&profile).await;

        assert!(!hello.ciphers.iter().any(|c| is_grease(*c)));
        assert!(!hello.extensions.iter().any(|e| is_grease(*e)));
        assert!(!hello.ciphers.contains(&GREASE));
    }

    #[tokio::test]
    async fn handshake_negotiates_alpn_and_logs_keys() {
        let server = tls_server(b"\x02h2", None).await;
        let keylog_dir = TempDir::new().unwrap();
        let keylog_path = keylog_dir.path().join("keys.log");

        let profile = resolve(Some("chrome-87"), false);
        let params = HandshakeParams {
            connection_id: 1,
            server_name: "localhost",
            profile: &profile,
            keylog_path: Some(&keylog_path),
        };
        let mut negotiated = TlsNegotiator::new(false)
            .negotiate(connect(server.port).await, &params)
            .await
            .unwrap();
        assert_eq!(negotiated.alpn, "h2");
        assert!(negotiated.peer_application_settings.is_none());

        negotiated.stream.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        negotiated.stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        let log = std::fs::read_to_string(&keylog_path).unwrap();
        assert!(log.lines().any(|l| l.starts_with("CLIENT_TRAFFIC_SECRET_0 ")));
    }

    #[tokio::test]
    async fn peer_application_settings_are_returned() {
        let payload = server_alps_payload();
        let server = tls_server(b"\x02h2", Some(payload.clone())).await;

        let profile = resolve(Some("chrome-106"), false);
        let params = HandshakeParams {
            connection_id: 1,
            server_name: "localhost",
            profile: &profile,
            keylog_path: None,
        };
        let negotiated = TlsNegotiator::new(false)
            .negotiate(connect(server.port).await, &params)
            .await
            .unwrap();

        assert_eq!(negotiated.alpn, "h2");
        assert_eq!(negotiated.peer_application_settings, Some(payload));
    }

    #[tokio::test]
    async fn unopenable_key_log_fails_handshake() {
        let server = tls_server(b"\x02h2", None).await;
        let missing = Path::new("/nonexistent/dir/keys.log");

        let profile = resolve(Some("chrome-87"), false);
        let params = HandshakeParams {
            connection_id: 1,
            server_name: "localhost",
            profile: &profile,
            keylog_path: Some(missing),
        };
        let err = TlsNegotiator::new(false)
            .negotiate(connect(server.port).await, &params)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("key log"), "{}", err);
    }

    #[tokio::test]
    async fn trusted_root_verifies() {
        let server = tls_server(b"", None).await;

        let profile = resolve(Some("chrome-106"), true);
        let params = HandshakeParams {
            connection_id: 1,
            server_name: "localhost",
            profile: &profile,
            keylog_path: None,
        };
        let negotiated = TlsNegotiator::new(true)
            .with_root_der(&server.root_der)
            .unwrap()
            .negotiate(connect(server.port).await, &params)
            .await
            .unwrap();
        assert_eq!(negotiated.alpn, "");
    }

    #[tokio::test]
    async fn untrusted_certificate_fails_handshake() {
        let server = tls_server(b"", None).await;

        let profile = resolve(None, false);
        let params = HandshakeParams {
            connection_id: 1,
            server_name: "localhost",
            profile: &profile,
            keylog_path: None,
        };
        let err = TlsNegotiator::new(true)
            .negotiate(connect(server.port).await, &params)
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectError::Handshake { .. }));
    }
}
