//! TLS fingerprint profiles.
//!
//! A fingerprint profile is the ordered shape of a ClientHello that a real
//! browser release sends: cipher suite order, compression methods and an
//! ordered list of typed extensions. Profiles are looked up by id:
//!
//! - `chrome-96`, `Chrome96`, `edge-110`, `firefox-102` are bucketed by
//!   browser version into the nearest canonical profile at or below that
//!   version (see [`BucketTable`]).
//! - Literal ids such as `safari-13` return a hand-authored profile.
//! - Anything else falls back to the latest canonical profile.
//!
//! Resolution is pure: the same id and websocket flag always produce the same
//! profile, so it is safe to call from any number of connection tasks.
//!
//! ## Usage
//!
//! ```
//! use mimic_core::fingerprint::{resolve, ExtensionKind};
//!
//! let profile = resolve(Some("chrome-96"), false);
//! assert!(profile.has_extension(ExtensionKind::Alpn));
//!
//! // Websockets never negotiate ALPN.
//! let ws = resolve(Some("chrome-96"), true);
//! assert!(!ws.has_extension(ExtensionKind::Alpn));
//! ```

mod buckets;
mod profiles;

use once_cell::sync::Lazy;

pub use buckets::{BucketRule, BucketTable, ProfileSource};
pub use profiles::{CanonicalProfile, LiteralProfile};

/// Reserved GREASE placeholder (RFC 8701).
///
/// The concrete GREASE value is chosen per handshake; profiles only record
/// where one goes.
pub const GREASE: u16 = 0x0a0a;

/// Cipher suite code points.
pub mod cipher {
    pub const TLS_AES_128_GCM_SHA256: u16 = 0x1301;
    pub const TLS_AES_256_GCM_SHA384: u16 = 0x1302;
    pub const TLS_CHACHA20_POLY1305_SHA256: u16 = 0x1303;

    pub const TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256: u16 = 0xc02b;
    pub const TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256: u16 = 0xc02f;
    pub const TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384: u16 = 0xc02c;
    pub const TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384: u16 = 0xc030;
    pub const TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256: u16 = 0xcca9;
    pub const TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256: u16 = 0xcca8;

    pub const TLS_ECDHE_ECDSA_WITH_AES_128_CBC_SHA: u16 = 0xc009;
    pub const TLS_ECDHE_ECDSA_WITH_AES_256_CBC_SHA: u16 = 0xc00a;
    pub const TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA: u16 = 0xc013;
    pub const TLS_ECDHE_RSA_WITH_AES_256_CBC_SHA: u16 = 0xc014;
    pub const TLS_ECDHE_ECDSA_WITH_3DES_EDE_CBC_SHA: u16 = 0xc008;
    pub const TLS_ECDHE_RSA_WITH_3DES_EDE_CBC_SHA: u16 = 0xc012;

    pub const TLS_RSA_WITH_AES_128_GCM_SHA256: u16 = 0x009c;
    pub const TLS_RSA_WITH_AES_256_GCM_SHA384: u16 = 0x009d;
    pub const TLS_RSA_WITH_AES_128_CBC_SHA: u16 = 0x002f;
    pub const TLS_RSA_WITH_AES_256_CBC_SHA: u16 = 0x0035;
    pub const TLS_RSA_WITH_3DES_EDE_CBC_SHA: u16 = 0x000a;
}

/// Named group (curve) code points.
pub mod group {
    pub const SECP256R1: u16 = 0x0017;
    pub const SECP384R1: u16 = 0x0018;
    pub const SECP521R1: u16 = 0x0019;
    pub const X25519: u16 = 0x001d;
    pub const FFDHE2048: u16 = 0x0100;
    pub const FFDHE3072: u16 = 0x0101;
    pub const X25519_MLKEM768: u16 = 0x11ec;
}

/// Signature scheme code points.
pub mod sigalg {
    pub const RSA_PKCS1_SHA1: u16 = 0x0201;
    pub const ECDSA_SHA1: u16 = 0x0203;
    pub const RSA_PKCS1_SHA256: u16 = 0x0401;
    pub const ECDSA_SECP256R1_SHA256: u16 = 0x0403;
    pub const RSA_PKCS1_SHA384: u16 = 0x0501;
    pub const ECDSA_SECP384R1_SHA384: u16 = 0x0503;
    pub const RSA_PKCS1_SHA512: u16 = 0x0601;
    pub const ECDSA_SECP521R1_SHA512: u16 = 0x0603;
    pub const RSA_PSS_RSAE_SHA256: u16 = 0x0804;
    pub const RSA_PSS_RSAE_SHA384: u16 = 0x0805;
    pub const RSA_PSS_RSAE_SHA512: u16 = 0x0806;
}

/// Protocol version code points.
pub mod version {
    pub const TLS10: u16 = 0x0301;
    pub const TLS11: u16 = 0x0302;
    pub const TLS12: u16 = 0x0303;
    pub const TLS13: u16 = 0x0304;
}

/// How the padding extension sizes itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaddingPolicy {
    /// Pad ClientHellos between 256 and 511 bytes up to 512 (BoringSSL style).
    BoringStyle,
    /// Always pad with a fixed number of zero bytes.
    Fixed(u16),
}

/// Whether extensions go on the wire in list order or permuted per handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtensionOrder {
    Fixed,
    Shuffled,
}

/// Extension type tag, used to filter an extension list without inspecting
/// payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ExtensionKind {
    ServerName,
    StatusRequest,
    SupportedGroups,
    EcPointFormats,
    SignatureAlgorithms,
    Alpn,
    SignedCertificateTimestamp,
    Padding,
    ExtendedMasterSecret,
    CompressCertificate,
    SessionTicket,
    PskKeyExchangeModes,
    SupportedVersions,
    KeyShare,
    ApplicationSettings,
    RenegotiationInfo,
}

impl ExtensionKind {
    /// IANA extension type code.
    pub fn code(&self) -> u16 {
        match self {
            Self::ServerName => 0,
            Self::StatusRequest => 5,
            Self::SupportedGroups => 10,
            Self::EcPointFormats => 11,
            Self::SignatureAlgorithms => 13,
            Self::Alpn => 16,
            Self::SignedCertificateTimestamp => 18,
            Self::Padding => 21,
            Self::ExtendedMasterSecret => 23,
            Self::CompressCertificate => 27,
            Self::SessionTicket => 35,
            Self::PskKeyExchangeModes => 45,
            Self::SupportedVersions => 43,
            Self::KeyShare => 51,
            Self::ApplicationSettings => 17513,
            Self::RenegotiationInfo => 65281,
        }
    }
}

/// A typed ClientHello extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extension {
    ServerName,
    StatusRequest,
    SupportedGroups(Vec<u16>),
    EcPointFormats(Vec<u8>),
    SignatureAlgorithms(Vec<u16>),
    Alpn(Vec<String>),
    SignedCertificateTimestamp,
    Padding(PaddingPolicy),
    ExtendedMasterSecret,
    /// Certificate compression algorithms (1 = zlib, 2 = brotli).
    CompressCertificate(Vec<u16>),
    SessionTicket,
    PskKeyExchangeModes(Vec<u8>),
    SupportedVersions(Vec<u16>),
    /// Groups a key share is generated for, in order.
    KeyShare(Vec<u16>),
    /// Protocols the client offers application settings (ALPS) for.
    ApplicationSettings(Vec<String>),
    RenegotiationInfo,
}

impl Extension {
    pub fn kind(&self) -> ExtensionKind {
        match self {
            Self::ServerName => ExtensionKind::ServerName,
            Self::StatusRequest => ExtensionKind::StatusRequest,
            Self::SupportedGroups(_) => ExtensionKind::SupportedGroups,
            Self::EcPointFormats(_) => ExtensionKind::EcPointFormats,
            Self::SignatureAlgorithms(_) => ExtensionKind::SignatureAlgorithms,
            Self::Alpn(_) => ExtensionKind::Alpn,
            Self::SignedCertificateTimestamp => ExtensionKind::SignedCertificateTimestamp,
            Self::Padding(_) => ExtensionKind::Padding,
            Self::ExtendedMasterSecret => ExtensionKind::ExtendedMasterSecret,
            Self::CompressCertificate(_) => ExtensionKind::CompressCertificate,
            Self::SessionTicket => ExtensionKind::SessionTicket,
            Self::PskKeyExchangeModes(_) => ExtensionKind::PskKeyExchangeModes,
            Self::SupportedVersions(_) => ExtensionKind::SupportedVersions,
            Self::KeyShare(_) => ExtensionKind::KeyShare,
            Self::ApplicationSettings(_) => ExtensionKind::ApplicationSettings,
            Self::RenegotiationInfo => ExtensionKind::RenegotiationInfo,
        }
    }
}

/// A fully resolved ClientHello shape.
///
/// Never mutated once a handshake starts; the negotiator only reads it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsFingerprintProfile {
    /// Canonical id of the profile this was resolved to (e.g. `chrome-106`).
    pub id: String,
    pub cipher_suites: Vec<u16>,
    pub compression_methods: Vec<u8>,
    pub extensions: Vec<Extension>,
    /// Insert GREASE values into ciphers, groups and versions.
    pub grease: bool,
    pub extension_order: ExtensionOrder,
    /// Application settings payload sent for the negotiated protocol, if any.
    pub application_settings: Option<Vec<u8>>,
}

impl TlsFingerprintProfile {
    /// Returns true if an extension of the given kind is present.
    pub fn has_extension(&self, kind: ExtensionKind) -> bool {
        self.extensions.iter().any(|ext| ext.kind() == kind)
    }

    /// Returns the extension of the given kind.
    pub fn extension(&self, kind: ExtensionKind) -> Option<&Extension> {
        self.extensions.iter().find(|ext| ext.kind() == kind)
    }

    /// Removes every extension of the given kind.
    pub fn remove_extension(&mut self, kind: ExtensionKind) {
        self.extensions.retain(|ext| ext.kind() != kind);
    }

    /// Extension type codes in list order.
    pub fn extension_codes(&self) -> Vec<u16> {
        self.extensions.iter().map(|ext| ext.kind().code()).collect()
    }

    /// ALPN protocols offered, empty when ALPN is not sent.
    pub fn alpn_protocols(&self) -> Vec<String> {
        match self.extension(ExtensionKind::Alpn) {
            Some(Extension::Alpn(protocols)) => protocols.clone(),
            _ => Vec::new(),
        }
    }

    /// Offered protocol versions without GREASE, highest first.
    pub fn supported_versions(&self) -> Vec<u16> {
        match self.extension(ExtensionKind::SupportedVersions) {
            Some(Extension::SupportedVersions(versions)) => {
                versions.iter().copied().filter(|v| *v != GREASE).collect()
            }
            _ => vec![version::TLS12],
        }
    }

    /// Supported groups without GREASE, in preference order.
    pub fn supported_groups(&self) -> Vec<u16> {
        match self.extension(ExtensionKind::SupportedGroups) {
            Some(Extension::SupportedGroups(groups)) => {
                groups.iter().copied().filter(|g| *g != GREASE).collect()
            }
            _ => Vec::new(),
        }
    }

    /// Groups a key share is generated for, without GREASE.
    pub fn key_share_groups(&self) -> Vec<u16> {
        match self.extension(ExtensionKind::KeyShare) {
            Some(Extension::KeyShare(groups)) => {
                groups.iter().copied().filter(|g| *g != GREASE).collect()
            }
            _ => Vec::new(),
        }
    }

    /// Signature schemes offered, in order.
    pub fn signature_algorithms(&self) -> Vec<u16> {
        match self.extension(ExtensionKind::SignatureAlgorithms) {
            Some(Extension::SignatureAlgorithms(schemes)) => schemes.clone(),
            _ => Vec::new(),
        }
    }

    /// Cipher suites without GREASE, in order.
    pub fn real_cipher_suites(&self) -> Vec<u16> {
        self.cipher_suites
            .iter()
            .copied()
            .filter(|c| *c != GREASE)
            .collect()
    }
}

/// Resolves profile ids against a bucket table.
#[derive(Debug, Clone, Default)]
pub struct Resolver {
    table: BucketTable,
}

impl Resolver {
    /// Creates a resolver using the built-in bucket table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a resolver with an externally supplied bucket table.
    pub fn with_table(table: BucketTable) -> Self {
        Self { table }
    }

    /// Returns the bucket table in use.
    pub fn table(&self) -> &BucketTable {
        &self.table
    }

    /// Resolves a profile id into a normalized profile.
    ///
    /// Unknown or missing ids resolve to the table's default profile. When
    /// `websocket` is set the ALPN extension is dropped.
    pub fn resolve(&self, profile_id: Option<&str>, websocket: bool) -> TlsFingerprintProfile {
        let source = profile_id
            .and_then(|id| self.table.lookup(id))
            .unwrap_or(ProfileSource::Canonical(self.table.default_profile));

        let mut profile = source.build();
        if websocket {
            profile.remove_extension(ExtensionKind::Alpn);
        }
        profile
    }
}

static DEFAULT_RESOLVER: Lazy<Resolver> = Lazy::new(Resolver::new);

/// Resolves a profile id using the built-in bucket table.
pub fn resolve(profile_id: Option<&str>, websocket: bool) -> TlsFingerprintProfile {
    DEFAULT_RESOLVER.resolve(profile_id, websocket)
}
