//! TLS client configuration and in-place stream upgrade.

use std::net::TcpStream;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, ClientConnection, DigitallySignedStruct, RootCertStore, StreamOwned};
use tracing::debug;

use crate::error::TransportError;

/// Build a client config trusting the Mozilla root store.
///
/// # Errors
///
/// Returns an error if the crypto provider rejects the default protocol
/// versions.
pub fn default_client_config() -> Result<Arc<ClientConfig>, TransportError> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let config = ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| TransportError::Tls(e.to_string()))?
    .with_root_certificates(roots)
    .with_no_client_auth();

    Ok(Arc::new(config))
}

/// Build a client config that accepts any server certificate.
///
/// Only for brokers with self-signed certificates in development and tests.
///
/// # Errors
///
/// Returns an error if the crypto provider rejects the default protocol
/// versions.
pub fn insecure_client_config() -> Result<Arc<ClientConfig>, TransportError> {
    let config = ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| TransportError::Tls(e.to_string()))?
    .dangerous()
    .with_custom_certificate_verifier(Arc::new(NoCertVerifier))
    .with_no_client_auth();

    Ok(Arc::new(config))
}

/// Wrap a connected TCP stream in a TLS session and drive the handshake to
/// completion.
///
/// # Errors
///
/// Returns [`TransportError::Tls`] if the server name is invalid or the
/// handshake fails. The TCP stream is dropped in that case.
pub fn upgrade(
    tcp: TcpStream,
    config: Arc<ClientConfig>,
    server_name: &str,
) -> Result<StreamOwned<ClientConnection, TcpStream>, TransportError> {
    let name = ServerName::try_from(server_name.to_string())
        .map_err(|e| TransportError::Tls(format!("invalid server name {server_name:?}: {e}")))?;

    let conn = ClientConnection::new(config, name).map_err(|e| TransportError::Tls(e.to_string()))?;
    let mut stream = StreamOwned::new(conn, tcp);

    while stream.conn.is_handshaking() {
        stream
            .conn
            .complete_io(&mut stream.sock)
            .map_err(|e| TransportError::Tls(e.to_string()))?;
    }

    debug!(
        server = %server_name,
        version = ?stream.conn.protocol_version(),
        "TLS handshake completed"
    );

    Ok(stream)
}

// Accepts every certificate; see `insecure_client_config`.
#[derive(Debug)]
struct NoCertVerifier;

impl ServerCertVerifier for NoCertVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
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

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
