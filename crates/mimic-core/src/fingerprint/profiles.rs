//! Canonical browser profiles and hand-authored literal specs.
//!
//! Canonical profiles are generated from a per-family template plus a small
//! set of capability flags, so each bucket only states what changed at its
//! release boundary. Literal profiles spell every field out.

use serde::{Deserialize, Serialize};

use super::{
    cipher, group, sigalg, version, Extension, ExtensionOrder, PaddingPolicy,
    TlsFingerprintProfile, GREASE,
};

/// Canonical profiles reachable through the version-bucket table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CanonicalProfile {
    /// Chrome up to 86: still offers TLS 1.0/1.1.
    #[serde(rename = "chrome-83")]
    Chrome83,
    /// Chrome 87-105: TLS 1.2+ only, fixed extension order.
    #[serde(rename = "chrome-87")]
    Chrome87,
    /// Chrome 106-123: extension order permuted per handshake, ALPS.
    #[serde(rename = "chrome-106")]
    Chrome106,
    /// Chrome 124+: post-quantum hybrid key share.
    #[serde(rename = "chrome-124")]
    Chrome124,
    #[serde(rename = "firefox-65")]
    Firefox65,
    #[serde(rename = "firefox-78")]
    Firefox78,
    #[serde(rename = "safari-16")]
    Safari16,
}

impl CanonicalProfile {
    /// All canonical profiles, oldest first within each family.
    pub const ALL: [CanonicalProfile; 7] = [
        Self::Chrome83,
        Self::Chrome87,
        Self::Chrome106,
        Self::Chrome124,
        Self::Firefox65,
        Self::Firefox78,
        Self::Safari16,
    ];

    /// The newest known profile, used for unknown ids.
    pub const LATEST: CanonicalProfile = Self::Chrome124;

    /// Returns the profile id.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chrome83 => "chrome-83",
            Self::Chrome87 => "chrome-87",
            Self::Chrome106 => "chrome-106",
            Self::Chrome124 => "chrome-124",
            Self::Firefox65 => "firefox-65",
            Self::Firefox78 => "firefox-78",
            Self::Safari16 => "safari-16",
        }
    }

    /// Expands the profile into its ordered ClientHello shape.
    pub fn build(&self) -> TlsFingerprintProfile {
        match self {
            Self::Chrome83 => chromium(self.as_str(), ChromiumCaps::default()),
            Self::Chrome87 => chromium(
                self.as_str(),
                ChromiumCaps {
                    modern_versions_only: true,
                    ..ChromiumCaps::default()
                },
            ),
            Self::Chrome106 => chromium(
                self.as_str(),
                ChromiumCaps {
                    modern_versions_only: true,
                    shuffled: true,
                    alps: true,
                    ..ChromiumCaps::default()
                },
            ),
            Self::Chrome124 => chromium(
                self.as_str(),
                ChromiumCaps {
                    modern_versions_only: true,
                    shuffled: true,
                    alps: true,
                    post_quantum: true,
                },
            ),
            Self::Firefox65 => firefox(self.as_str(), false),
            Self::Firefox78 => firefox(self.as_str(), true),
            Self::Safari16 => safari16(),
        }
    }
}

impl std::fmt::Display for CanonicalProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Hand-authored profiles addressed by exact id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LiteralProfile {
    #[serde(rename = "safari-13")]
    Safari13,
}

impl LiteralProfile {
    pub const ALL: [LiteralProfile; 1] = [Self::Safari13];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Safari13 => "safari-13",
        }
    }

    pub fn build(&self) -> TlsFingerprintProfile {
        match self {
            Self::Safari13 => safari13(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct ChromiumCaps {
    modern_versions_only: bool,
    shuffled: bool,
    alps: bool,
    post_quantum: bool,
}

fn h2_and_http11() -> Vec<String> {
    vec!["h2".to_string(), "http/1.1".to_string()]
}

fn chromium(id: &str, caps: ChromiumCaps) -> TlsFingerprintProfile {
    let mut cipher_suites = vec![
        GREASE,
        cipher::TLS_AES_128_GCM_SHA256,
        cipher::TLS_AES_256_GCM_SHA384,
        cipher::TLS_CHACHA20_POLY1305_SHA256,
        cipher::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
        cipher::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
        cipher::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
        cipher::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
        cipher::TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256,
        cipher::TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256,
        cipher::TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA,
        cipher::TLS_ECDHE_RSA_WITH_AES_256_CBC_SHA,
        cipher::TLS_RSA_WITH_AES_128_GCM_SHA256,
        cipher::TLS_RSA_WITH_AES_256_GCM_SHA384,
        cipher::TLS_RSA_WITH_AES_128_CBC_SHA,
        cipher::TLS_RSA_WITH_AES_256_CBC_SHA,
    ];
    if !caps.modern_versions_only {
        cipher_suites.push(cipher::TLS_RSA_WITH_3DES_EDE_CBC_SHA);
    }

    let mut groups = vec![GREASE];
    let mut key_shares = vec![GREASE];
    if caps.post_quantum {
        groups.push(group::X25519_MLKEM768);
        key_shares.push(group::X25519_MLKEM768);
    }
    groups.extend([group::X25519, group::SECP256R1, group::SECP384R1]);
    key_shares.push(group::X25519);

    let versions = if caps.modern_versions_only {
        vec![GREASE, version::TLS13, version::TLS12]
    } else {
        vec![
            GREASE,
            version::TLS13,
            version::TLS12,
            version::TLS11,
            version::TLS10,
        ]
    };

    let mut extensions = vec![
        Extension::ServerName,
        Extension::ExtendedMasterSecret,
        Extension::RenegotiationInfo,
        Extension::SupportedGroups(groups),
        Extension::EcPointFormats(vec![0]),
        Extension::SessionTicket,
        Extension::Alpn(h2_and_http11()),
        Extension::StatusRequest,
        Extension::SignatureAlgorithms(vec![
            sigalg::ECDSA_SECP256R1_SHA256,
            sigalg::RSA_PSS_RSAE_SHA256,
            sigalg::RSA_PKCS1_SHA256,
            sigalg::ECDSA_SECP384R1_SHA384,
            sigalg::RSA_PSS_RSAE_SHA384,
            sigalg::RSA_PKCS1_SHA384,
            sigalg::RSA_PSS_RSAE_SHA512,
            sigalg::RSA_PKCS1_SHA512,
        ]),
        Extension::SignedCertificateTimestamp,
        Extension::KeyShare(key_shares),
        Extension::PskKeyExchangeModes(vec![1]),
        Extension::SupportedVersions(versions),
        Extension::CompressCertificate(vec![2]),
    ];
    if caps.alps {
        extensions.push(Extension::ApplicationSettings(vec!["h2".to_string()]));
    }
    extensions.push(Extension::Padding(PaddingPolicy::BoringStyle));

    TlsFingerprintProfile {
        id: id.to_string(),
        cipher_suites,
        compression_methods: vec![0],
        extensions,
        grease: true,
        extension_order: if caps.shuffled {
            ExtensionOrder::Shuffled
        } else {
            ExtensionOrder::Fixed
        },
        application_settings: None,
    }
}

fn firefox(id: &str, modern_versions_only: bool) -> TlsFingerprintProfile {
    let mut cipher_suites = vec![
        cipher::TLS_AES_128_GCM_SHA256,
        cipher::TLS_CHACHA20_POLY1305_SHA256,
        cipher::TLS_AES_256_GCM_SHA384,
        cipher::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
        cipher::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
        cipher::TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256,
        cipher::TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256,
        cipher::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
        cipher::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
        cipher::TLS_ECDHE_ECDSA_WITH_AES_256_CBC_SHA,
        cipher::TLS_ECDHE_ECDSA_WITH_AES_128_CBC_SHA,
        cipher::TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA,
        cipher::TLS_ECDHE_RSA_WITH_AES_256_CBC_SHA,
        cipher::TLS_RSA_WITH_AES_128_GCM_SHA256,
        cipher::TLS_RSA_WITH_AES_256_GCM_SHA384,
        cipher::TLS_RSA_WITH_AES_128_CBC_SHA,
        cipher::TLS_RSA_WITH_AES_256_CBC_SHA,
    ];
    let versions = if modern_versions_only {
        vec![version::TLS13, version::TLS12]
    } else {
        cipher_suites.push(cipher::TLS_RSA_WITH_3DES_EDE_CBC_SHA);
        vec![
            version::TLS13,
            version::TLS12,
            version::TLS11,
            version::TLS10,
        ]
    };

    TlsFingerprintProfile {
        id: id.to_string(),
        cipher_suites,
        compression_methods: vec![0],
        extensions: vec![
            Extension::ServerName,
            Extension::ExtendedMasterSecret,
            Extension::RenegotiationInfo,
            Extension::SupportedGroups(vec![
                group::X25519,
                group::SECP256R1,
                group::SECP384R1,
                group::SECP521R1,
                group::FFDHE2048,
                group::FFDHE3072,
            ]),
            Extension::EcPointFormats(vec![0]),
            Extension::SessionTicket,
            Extension::Alpn(h2_and_http11()),
            Extension::StatusRequest,
            Extension::KeyShare(vec![group::X25519, group::SECP256R1]),
            Extension::SupportedVersions(versions),
            Extension::SignatureAlgorithms(vec![
                sigalg::ECDSA_SECP256R1_SHA256,
                sigalg::ECDSA_SECP384R1_SHA384,
                sigalg::ECDSA_SECP521R1_SHA512,
                sigalg::RSA_PSS_RSAE_SHA256,
                sigalg::RSA_PSS_RSAE_SHA384,
                sigalg::RSA_PSS_RSAE_SHA512,
                sigalg::RSA_PKCS1_SHA256,
                sigalg::RSA_PKCS1_SHA384,
                sigalg::RSA_PKCS1_SHA512,
                sigalg::ECDSA_SHA1,
                sigalg::RSA_PKCS1_SHA1,
            ]),
            Extension::PskKeyExchangeModes(vec![1]),
            Extension::Padding(PaddingPolicy::BoringStyle),
        ],
        grease: false,
        extension_order: ExtensionOrder::Fixed,
        application_settings: None,
    }
}

fn safari16() -> TlsFingerprintProfile {
    TlsFingerprintProfile {
        id: CanonicalProfile::Safari16.as_str().to_string(),
        cipher_suites: vec![
            GREASE,
            cipher::TLS_AES_128_GCM_SHA256,
            cipher::TLS_AES_256_GCM_SHA384,
            cipher::TLS_CHACHA20_POLY1305_SHA256,
            cipher::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
            cipher::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
            cipher::TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256,
            cipher::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
            cipher::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
            cipher::TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256,
            cipher::TLS_ECDHE_ECDSA_WITH_AES_256_CBC_SHA,
            cipher::TLS_ECDHE_ECDSA_WITH_AES_128_CBC_SHA,
            cipher::TLS_ECDHE_RSA_WITH_AES_256_CBC_SHA,
            cipher::TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA,
            cipher::TLS_RSA_WITH_AES_256_GCM_SHA384,
            cipher::TLS_RSA_WITH_AES_128_GCM_SHA256,
            cipher::TLS_RSA_WITH_AES_256_CBC_SHA,
            cipher::TLS_RSA_WITH_AES_128_CBC_SHA,
            cipher::TLS_ECDHE_ECDSA_WITH_3DES_EDE_CBC_SHA,
            cipher::TLS_ECDHE_RSA_WITH_3DES_EDE_CBC_SHA,
            cipher::TLS_RSA_WITH_3DES_EDE_CBC_SHA,
        ],
        compression_methods: vec![0],
        extensions: vec![
            Extension::ServerName,
            Extension::ExtendedMasterSecret,
            Extension::RenegotiationInfo,
            Extension::SupportedGroups(vec![
                GREASE,
                group::X25519,
                group::SECP256R1,
                group::SECP384R1,
                group::SECP521R1,
            ]),
            Extension::EcPointFormats(vec![0]),
            Extension::Alpn(h2_and_http11()),
            Extension::StatusRequest,
            Extension::SignatureAlgorithms(vec![
                sigalg::ECDSA_SECP256R1_SHA256,
                sigalg::RSA_PSS_RSAE_SHA256,
                sigalg::RSA_PKCS1_SHA256,
                sigalg::ECDSA_SECP384R1_SHA384,
                sigalg::ECDSA_SHA1,
                sigalg::RSA_PSS_RSAE_SHA384,
                sigalg::RSA_PKCS1_SHA384,
                sigalg::RSA_PSS_RSAE_SHA512,
                sigalg::RSA_PKCS1_SHA512,
                sigalg::RSA_PKCS1_SHA1,
            ]),
            Extension::SignedCertificateTimestamp,
            Extension::KeyShare(vec![GREASE, group::X25519]),
            Extension::PskKeyExchangeModes(vec![1]),
            Extension::SupportedVersions(vec![
                GREASE,
                version::TLS13,
                version::TLS12,
                version::TLS11,
                version::TLS10,
            ]),
            Extension::CompressCertificate(vec![1]),
            Extension::Padding(PaddingPolicy::BoringStyle),
        ],
        grease: true,
        extension_order: ExtensionOrder::Fixed,
        application_settings: None,
    }
}

/// Safari 13 on macOS, captured from a real ClientHello.
fn safari13() -> TlsFingerprintProfile {
    TlsFingerprintProfile {
        id: LiteralProfile::Safari13.as_str().to_string(),
        cipher_suites: vec![
            GREASE,
            0x1301,
            0x1302,
            0x1303,
            0xc02c,
            0xc02b,
            0xcca9,
            0xc030,
            0xc02f,
            0xcca8,
            0xc024,
            0xc023,
            0xc00a,
            0xc009,
            0xc028,
            0xc027,
            0xc014,
            0xc013,
            0x009d,
            0x009c,
            0x003d,
            0x003c,
            0x0035,
            0x002f,
            0xc008,
            0xc012,
            0x000a,
        ],
        compression_methods: vec![0],
        extensions: vec![
            Extension::ServerName,
            Extension::ExtendedMasterSecret,
            Extension::RenegotiationInfo,
            Extension::SupportedGroups(vec![GREASE, 0x001d, 0x0017, 0x0018, 0x0019]),
            Extension::EcPointFormats(vec![0]),
            Extension::Alpn(h2_and_http11()),
            Extension::StatusRequest,
            Extension::SignatureAlgorithms(vec![
                0x0403, 0x0804, 0x0401, 0x0503, 0x0203, 0x0805, 0x0501, 0x0806, 0x0601, 0x0201,
            ]),
            Extension::SignedCertificateTimestamp,
            Extension::KeyShare(vec![GREASE, 0x001d]),
            Extension::PskKeyExchangeModes(vec![1]),
            Extension::SupportedVersions(vec![GREASE, 0x0304, 0x0303, 0x0302, 0x0301]),
            Extension::Padding(PaddingPolicy::BoringStyle),
        ],
        grease: true,
        extension_order: ExtensionOrder::Fixed,
        application_settings: None,
    }
}
