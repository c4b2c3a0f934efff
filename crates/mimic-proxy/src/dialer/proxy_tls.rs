//! TLS to HTTPS proxies.
//!
//! The proxy hop is not fingerprinted, so it uses a plain rustls client with
//! the bundled web PKI roots.

use std::sync::Arc;

use once_cell::sync::OnceCell;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{aws_lc_rs, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};

static BASE_PROVIDER: OnceCell<Arc<CryptoProvider>> = OnceCell::new();
static WEBPKI_ROOTS: OnceCell<Arc<RootCertStore>> = OnceCell::new();

fn base_provider() -> Arc<CryptoProvider> {
    BASE_PROVIDER
        .get_or_init(|| Arc::new(aws_lc_rs::default_provider()))
        .clone()
}

fn webpki_roots() -> Arc<RootCertStore> {
    WEBPKI_ROOTS
        .get_or_init(|| {
            let mut roots = RootCertStore::empty();
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            Arc::new(roots)
        })
        .clone()
}

/// Client config for the proxy hop.
pub fn client_config(reject_unauthorized: bool) -> Result<Arc<ClientConfig>, rustls::Error> {
    let builder = ClientConfig::builder_with_provider(base_provider())
        .with_safe_default_protocol_versions()?;
    let config = if reject_unauthorized {
        builder
            .with_root_certificates(webpki_roots())
            .with_no_client_auth()
    } else {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerify))
            .with_no_client_auth()
    };
    Ok(Arc::new(config))
}

/// Accepts any proxy certificate. Only used when verification is disabled.
#[derive(Debug)]
struct NoVerify;

impl ServerCertVerifier for NoVerify {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        base_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verifying_config_uses_web_roots() {
        let config = client_config(true).unwrap();
        assert!(config.alpn_protocols.is_empty());
        assert!(!webpki_roots().is_empty());
    }

    #[test]
    fn insecure_config_builds() {
        assert!(client_config(false).is_ok());
    }
}
