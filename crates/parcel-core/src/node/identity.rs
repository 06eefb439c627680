//! Node identity: the long-lived Ed25519 keypair used to sign discovery
//! messages and preview manifests, and the TLS material for authenticated
//! channels.

use parcel_crypto::signatures::SigningKey;
use parcel_crypto::tls::SelfSignedIdentity;
use parcel_crypto::x25519::{PrivateKey as DhPrivateKey, PublicKey as DhPublicKey};
use parcel_discovery::PeerId;
use rand_core::OsRng;

/// A node's cryptographic identity.
///
/// Combines the Ed25519 signing key (identity, discovery, manifests), an
/// X25519 key agreement key (per-transfer relay encryption), and a
/// self-signed TLS identity (transport encryption). All three are
/// independent: losing and regenerating the TLS certificate does not
/// change `peer_id`.
pub struct Identity {
    signing_key: SigningKey,
    dh_key: DhPrivateKey,
    peer_id: PeerId,
    tls: SelfSignedIdentity,
}

impl Identity {
    /// Generate a fresh random identity.
    ///
    /// # Errors
    ///
    /// Returns an error if TLS certificate generation fails.
    pub fn generate() -> crate::node::error::Result<Self> {
        let signing_key = SigningKey::generate(&mut OsRng);
        let dh_key = DhPrivateKey::generate(&mut OsRng);
        let peer_id = PeerId::from_verifying_key(&signing_key.verifying_key());
        let tls = SelfSignedIdentity::generate(&peer_id.to_string())?;
        Ok(Self {
            signing_key,
            dh_key,
            peer_id,
            tls,
        })
    }

    /// Restore an identity from a saved Ed25519 seed, regenerating a fresh
    /// TLS certificate and X25519 key (neither is persisted across
    /// restarts; only the signing seed is).
    ///
    /// # Errors
    ///
    /// Returns an error if TLS certificate generation fails.
    pub fn from_seed(seed: &[u8; 32]) -> crate::node::error::Result<Self> {
        let signing_key = SigningKey::from_bytes(seed);
        let dh_key = DhPrivateKey::generate(&mut OsRng);
        let peer_id = PeerId::from_verifying_key(&signing_key.verifying_key());
        let tls = SelfSignedIdentity::generate(&peer_id.to_string())?;
        Ok(Self {
            signing_key,
            dh_key,
            peer_id,
            tls,
        })
    }

    /// This node's stable peer id.
    #[must_use]
    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    /// The Ed25519 signing key.
    #[must_use]
    pub fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    /// Raw Ed25519 public key bytes, as carried in `PeerIdentity.public_key`.
    #[must_use]
    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Raw X25519 public key bytes, as carried in
    /// `PeerIdentity.dh_public_key`.
    #[must_use]
    pub fn dh_public_key_bytes(&self) -> [u8; 32] {
        self.dh_key.public_key().to_bytes()
    }

    /// The self-signed TLS identity used for direct peer connections.
    #[must_use]
    pub fn tls(&self) -> &SelfSignedIdentity {
        &self.tls
    }

    /// Derive the symmetric key used to encrypt chunks of a relayed
    /// transfer with `peer`, via X25519 key agreement followed by a
    /// BLAKE3-keyed KDF. Both endpoints derive the same key from their own
    /// private key and the other's public key; the relay, never holding
    /// either private key, cannot.
    ///
    /// # Errors
    ///
    /// Returns an error if `peer_dh_public_key` is not a valid curve point
    /// or the resulting shared point is degenerate (low order).
    pub fn derive_relay_key(
        &self,
        peer_dh_public_key: &[u8; 32],
    ) -> crate::node::error::Result<parcel_crypto::aead::AeadKey> {
        let peer_key = DhPublicKey::from_bytes(*peer_dh_public_key);
        let shared = self
            .dh_key
            .exchange(&peer_key)
            .ok_or_else(|| crate::node::error::NodeError::connection("degenerate DH shared secret"))?;
        let derived = shared.derive_key("parcel-relay-chunk-key");
        Ok(parcel_crypto::aead::AeadKey::new(derived))
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity").field("peer_id", &self.peer_id).finish()
    }
}
