//! Leaf certificate capture over a TLS handshake.
//!
//! The client never rejects a chain on its own: the verifier records the
//! presented leaf and accepts it, and the trust decision is made afterwards
//! against the federation pins. Handshake signatures are still verified.

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::debug;

use crate::address::Target;
use crate::error::{ProbeError, ProbeResult};

/// Accepts any server chain and keeps the end-entity certificate.
#[derive(Debug)]
struct CapturingVerifier {
    provider: Arc<CryptoProvider>,
    leaf: Mutex<Option<Vec<u8>>>,
}

impl CapturingVerifier {
    const fn new(provider: Arc<CryptoProvider>) -> Self {
        Self {
            provider,
            leaf: Mutex::new(None),
        }
    }

    fn take(&self) -> Option<Vec<u8>> {
        self.leaf
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl ServerCertVerifier for CapturingVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        *self.leaf.lock().unwrap_or_else(PoisonError::into_inner) = Some(end_entity.to_vec());
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Dial `target` and return the DER of the leaf certificate it presents.
///
/// `timeout` bounds the TCP connect and the handshake separately. A failed
/// handshake is not an error as long as the server sent its certificate
/// first, which covers servers that demand a client certificate.
pub async fn capture_leaf(target: &Target, timeout: Duration) -> ProbeResult<Vec<u8>> {
    let server_name = ServerName::try_from(target.host.clone())
        .map_err(|e| ProbeError::InvalidAddress(format!("invalid base_uri: {e}")))?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let verifier = Arc::new(CapturingVerifier::new(Arc::clone(&provider)));
    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| ProbeError::Tls(e.to_string()))?
        .dangerous()
        .with_custom_certificate_verifier(verifier.clone())
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(config));

    let stream = match tokio::time::timeout(
        timeout,
        TcpStream::connect((target.host.as_str(), target.port)),
    )
    .await
    {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => return Err(ProbeError::Connect(e)),
        Err(_) => return Err(ProbeError::Timeout),
    };

    match tokio::time::timeout(timeout, connector.connect(server_name, stream)).await {
        Ok(Ok(_tls)) => {}
        Ok(Err(e)) => debug!(host = %target.host, port = target.port, error = %e, "TLS handshake did not complete"),
        Err(_) => debug!(host = %target.host, port = target.port, "TLS handshake timed out"),
    }

    verifier.take().ok_or(ProbeError::NoCertificate)
}
