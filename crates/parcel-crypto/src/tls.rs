//! Self-signed TLS identity and first-contact-accept certificate pinning.
//!
//! Nodes never share a certificate authority. Each node generates its own
//! self-signed certificate at startup; peers accept whatever certificate a
//! node presents on the first connection and pin the embedded public key for
//! every connection after that. A node that later presents a different key
//! for the same peer identity fails the handshake rather than silently
//! re-pinning, since that is exactly the signature of a man-in-the-middle
//! after first contact.

use crate::CryptoError;
use rustls_pki_types::{CertificateDer, PrivatePkcs8KeyDer, UnixTime};
use std::sync::Arc;

/// A self-signed certificate and its matching private key, generated once
/// per node identity and reused for every TLS connection that node makes
/// or accepts.
pub struct SelfSignedIdentity {
    cert_der: CertificateDer<'static>,
    key_der: PrivatePkcs8KeyDer<'static>,
    /// SHA-256 fingerprint of the DER-encoded certificate, used as the
    /// pinned identifier peers store in `PeerIdentity`.
    pub fingerprint: [u8; 32],
}

impl SelfSignedIdentity {
    /// Generate a fresh self-signed certificate for `subject_name`
    /// (typically the node's hex-encoded public key).
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::IdentityGeneration`] if certificate generation
    /// fails, which in practice only happens if `subject_name` cannot be
    /// encoded as a DNS SAN.
    pub fn generate(subject_name: &str) -> Result<Self, CryptoError> {
        let rcgen::CertifiedKey { cert, key_pair } =
            rcgen::generate_simple_self_signed(vec![subject_name.to_string()])
                .map_err(|e| CryptoError::IdentityGeneration(e.to_string()))?;

        let cert_der = CertificateDer::from(cert.der().to_vec());
        let fingerprint = crate::hash::hash(cert_der.as_ref());
        let key_der = PrivatePkcs8KeyDer::from(key_pair.serialize_der());

        Ok(Self {
            cert_der,
            key_der,
            fingerprint,
        })
    }

    /// Certificate chain suitable for `rustls::ServerConfig`/`ClientConfig`.
    #[must_use]
    pub fn cert_chain(&self) -> Vec<CertificateDer<'static>> {
        vec![self.cert_der.clone()]
    }

    /// Private key suitable for `rustls::ServerConfig`/`ClientConfig`.
    #[must_use]
    pub fn private_key(&self) -> PrivatePkcs8KeyDer<'static> {
        self.key_der.clone_key()
    }
}

/// Certificate verifier that accepts any certificate on the first connection
/// to a given peer and requires an exact match on every later connection.
///
/// `pinned` starts empty. The first successful verification for a peer
/// records its certificate fingerprint; callers read that fingerprint back
/// out via [`TrustOnFirstUse::fingerprint_of`] to populate `PeerIdentity`.
/// This verifier does not itself know which peer a connection belongs to —
/// it pins by certificate bytes, and the caller is responsible for
/// associating the resulting fingerprint with a peer id at the protocol
/// layer, exactly as a raw TOFU model requires.
#[derive(Debug)]
pub struct TrustOnFirstUse {
    pinned: std::sync::Mutex<std::collections::HashMap<Vec<u8>, [u8; 32]>>,
}

impl TrustOnFirstUse {
    /// Build an empty pin store.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            pinned: std::sync::Mutex::new(std::collections::HashMap::new()),
        })
    }

    /// Fingerprint recorded for `peer_key`, if any connection has completed.
    #[must_use]
    pub fn fingerprint_of(&self, peer_key: &[u8]) -> Option<[u8; 32]> {
        self.pinned.lock().unwrap().get(peer_key).copied()
    }

    fn verify_cert(&self, peer_key: &[u8], cert: &CertificateDer<'_>) -> Result<(), CryptoError> {
        let fingerprint = crate::hash::hash(cert.as_ref());
        let mut pinned = self.pinned.lock().unwrap();
        match pinned.get(peer_key) {
            None => {
                pinned.insert(peer_key.to_vec(), fingerprint);
                Ok(())
            }
            Some(expected) if *expected == fingerprint => Ok(()),
            Some(_) => Err(CryptoError::Handshake(
                "peer certificate does not match pinned identity".to_string(),
            )),
        }
    }
}

impl Default for TrustOnFirstUse {
    fn default() -> Self {
        Self {
            pinned: std::sync::Mutex::new(std::collections::HashMap::new()),
        }
    }
}

/// Server-side verifier adapter: `rustls` calls this for client certificates
/// when mutual TLS is configured. parcel-net peers authenticate each other
/// at the protocol layer (signed handshake messages), so this verifier's
/// only job is TOFU pinning of the transport certificate, not identity
/// binding — that happens once the caller reads back the peer id carried in
/// the first signed message over the now-established channel.
#[derive(Debug)]
pub struct PinningServerVerifier {
    store: Arc<TrustOnFirstUse>,
    peer_key: Vec<u8>,
}

impl PinningServerVerifier {
    /// Build a verifier that pins under `peer_key` within `store`.
    #[must_use]
    pub fn new(store: Arc<TrustOnFirstUse>, peer_key: Vec<u8>) -> Arc<Self> {
        Arc::new(Self { store, peer_key })
    }
}

impl rustls::client::danger::ServerCertVerifier for PinningServerVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &rustls_pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        self.store
            .verify_cert(&self.peer_key, end_entity)
            .map_err(|e| rustls::Error::General(e.to_string()))?;
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &rustls::crypto::ring::default_provider().signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &rustls::crypto::ring::default_provider().signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
