//! rustls client configuration for origin connections

use crate::error::OriginError;
use rustls::pki_types::{CertificateDer, ServerName};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::debug;

/// TLS settings for one origin
#[derive(Clone)]
pub struct OriginTls {
    connector: TlsConnector,
    server_name: ServerName<'static>,
    handshake_timeout: Duration,
}

impl OriginTls {
    pub fn new(
        ca_pool: &str,
        verify: bool,
        server_name_override: &str,
        host: &str,
        handshake_timeout: Duration,
        alpn_protocols: Vec<Vec<u8>>,
    ) -> Result<Self, OriginError> {
        let roots = load_custom_origin_ca(ca_pool)?;
        let config = build_client_config(roots, verify, alpn_protocols);
        Ok(Self {
            connector: TlsConnector::from(config),
            server_name: server_name(server_name_override, host)?,
            handshake_timeout,
        })
    }

    /// Run the client handshake over an established TCP connection
    pub async fn handshake(
        &self,
        tcp: TcpStream,
        address: &str,
    ) -> Result<TlsStream<TcpStream>, OriginError> {
        let connect = self.connector.connect(self.server_name.clone(), tcp);
        let result = if self.handshake_timeout.is_zero() {
            connect.await
        } else {
            tokio::time::timeout(self.handshake_timeout, connect)
                .await
                .map_err(|_| OriginError::TlsHandshakeTimeout {
                    address: address.to_string(),
                    timeout: self.handshake_timeout,
                })?
        };

        result.map_err(|source| OriginError::TlsHandshake {
            address: address.to_string(),
            source,
        })
    }
}

// Initialize rustls crypto provider
static CRYPTO_PROVIDER_INIT: std::sync::Once = std::sync::Once::new();

pub(crate) fn ensure_crypto_provider() {
    CRYPTO_PROVIDER_INIT.call_once(|| {
        if rustls::crypto::ring::default_provider()
            .install_default()
            .is_err()
        {
            debug!("Rustls crypto provider already installed");
        }
    });
}

/// Root store for origin certificates: the bundled web PKI roots plus every
/// certificate in the PEM file at `ca_pool`, when one is given
pub fn load_custom_origin_ca(ca_pool: &str) -> Result<rustls::RootCertStore, OriginError> {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    if ca_pool.is_empty() {
        return Ok(roots);
    }

    let ca_error = |reason: String| OriginError::CaPool {
        path: ca_pool.to_string(),
        reason,
    };

    let certs = load_certs(Path::new(ca_pool)).map_err(ca_error)?;
    if certs.is_empty() {
        return Err(ca_error("no certificates found".to_string()));
    }
    for cert in certs {
        roots
            .add(cert)
            .map_err(|e| ca_error(format!("invalid certificate: {}", e)))?;
    }

    debug!(path = %ca_pool, roots = roots.len(), "Loaded custom origin CA pool");
    Ok(roots)
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, String> {
    let file = File::open(path).map_err(|e| format!("Failed to open cert file: {}", e))?;
    let mut reader = BufReader::new(file);

    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("Failed to parse certs: {}", e))
}

/// Build a rustls client config for an origin
///
/// `verify` is read literally: `true` checks the origin certificate against
/// `roots`, `false` accepts any certificate. Control planes that treat the
/// flag as "skip verification" must send the inverse.
pub fn build_client_config(
    roots: rustls::RootCertStore,
    verify: bool,
    alpn_protocols: Vec<Vec<u8>>,
) -> Arc<rustls::ClientConfig> {
    ensure_crypto_provider();

    let mut config = if verify {
        rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth()
    } else {
        rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(SkipVerification::new())
            .with_no_client_auth()
    };
    config.alpn_protocols = alpn_protocols;

    Arc::new(config)
}

/// Name presented in SNI and checked against the origin certificate:
/// `override_name` when set, the URL host otherwise
pub fn server_name(override_name: &str, host: &str) -> Result<ServerName<'static>, OriginError> {
    let name = if override_name.is_empty() {
        host
    } else {
        override_name
    };
    // IPv6 literals arrive bracketed from URLs
    let name = name.trim_start_matches('[').trim_end_matches(']');

    ServerName::try_from(name.to_string())
        .map_err(|_| OriginError::InvalidServerName(name.to_string()))
}

// Certificate verifier that skips verification (INSECURE)
#[derive(Debug)]
struct SkipVerification;

impl SkipVerification {
    fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

impl rustls::client::danger::ServerCertVerifier for SkipVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
