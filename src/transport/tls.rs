//! TLS Session (spec §4.5): the transport always negotiates TLS as the
//! client, regardless of which side initiated the underlying TCP
//! connection, and never validates the peer's certificate.
//!
//! Grounded in the teacher's `transport::client` module, which built a
//! `rustls::ClientConfig` by hand rather than taking the library default;
//! here that same hand-built config installs a verifier that accepts any
//! certificate, since the wire protocol's own framing (and, when a cipher
//! is installed, its encryption) is the actual trust boundary, not the
//! certificate chain.

use std::convert::TryFrom;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, Error as RustlsError, SignatureScheme};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_rustls::{client::TlsStream, TlsConnector};

use crate::error::TransportError;

/// The line written once, after the handshake completes, as cover traffic
/// matching a plausible unencrypted HTTP request (spec §4.5, scenario 4).
/// Exactly 27 bytes.
const COVER_TRAFFIC: &[u8] = b"GET /123456789 HTTP/1.0\r\n\r\n";

/// Accepts any server certificate and any signature over it. Peer identity
/// is not part of this transport's trust model (spec §4.5).
#[derive(Debug)]
struct AcceptAnyCert {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, RustlsError> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, RustlsError> {
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
    ) -> Result<HandshakeSignatureValid, RustlsError> {
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

fn client_config() -> ClientConfig {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let verifier = Arc::new(AcceptAnyCert {
        provider: provider.clone(),
    });
    ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .expect("default protocol versions are always valid")
        .dangerous()
        .with_custom_certificate_verifier(verifier)
        .with_no_client_auth()
}

/// Negotiates TLS as the client over `stream`, then writes the cover
/// traffic line. A write failure after a successful handshake is logged
/// but not fatal: the session is still usable (spec §4.5's "non-fatal
/// unless strictly negative" boundary behavior).
pub async fn negotiate(stream: TcpStream, server_name: &str) -> Result<TlsStream<TcpStream>, TransportError> {
    let connector = TlsConnector::from(Arc::new(client_config()));
    let name = ServerName::try_from(server_name.to_string())
        .map_err(|e| TransportError::HandshakeFailed(format!("invalid server name: {e}")))?;
    let mut tls = connector
        .connect(name, stream)
        .await
        .map_err(|e| TransportError::HandshakeFailed(e.to_string()))?;

    if let Err(e) = tls.write_all(COVER_TRAFFIC).await {
        tracing::debug!("cover traffic write failed (non-fatal): {e}");
    }
    Ok(tls)
}
