//! Shared discovery/search data model: peer identity, shared files, signed
//! envelopes and search request/response records.

use parcel_crypto::signatures::{Signature, VerifyingKey};
use serde::{Deserialize, Serialize};
use serde_big_array::BigArray;
use std::net::IpAddr;

/// Opaque, process-lifetime-stable peer identifier.
///
/// Derived as the hex encoding of the peer's Ed25519 public key, so it
/// doubles as a stable handle and a way to recover the verifying key
/// without a separate lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub String);

impl PeerId {
    /// Derive a peer id from a verifying key.
    #[must_use]
    pub fn from_verifying_key(key: &VerifyingKey) -> Self {
        Self(hex::encode(key.to_bytes()))
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A known peer's advertised identity.
///
/// `(peer_id, public_key)` is fixed for the life of a running process: a
/// peer claiming a known `peer_id` with a different key is rejected by
/// [`crate::membership::PeerRegistry::observe`] rather than silently
/// re-pinned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerIdentity {
    /// Opaque peer identifier.
    pub peer_id: PeerId,
    /// Human-readable display name.
    pub display_name: String,
    /// Advertised host.
    pub host: IpAddr,
    /// Advertised port.
    pub port: u16,
    /// Ed25519 public key bytes.
    pub public_key: [u8; 32],
    /// X25519 public key bytes, used to derive a per-transfer encryption
    /// key when chunks travel through an untrusted relay.
    pub dh_public_key: [u8; 32],
    /// Monotonic last-seen timestamp (seconds since node start).
    pub last_seen: u64,
}

impl PeerIdentity {
    /// Verifying key reconstructed from `public_key`.
    ///
    /// # Errors
    ///
    /// Returns an error if `public_key` is not a valid Ed25519 point.
    pub fn verifying_key(&self) -> Result<VerifyingKey, parcel_crypto::CryptoError> {
        VerifyingKey::from_bytes(&self.public_key)
    }
}

/// A file this node is sharing, indexed by logical name and content hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedFile {
    /// Absolute path on local disk.
    pub local_path: std::path::PathBuf,
    /// Name advertised to peers (may collide across owners).
    pub logical_name: String,
    /// Size in bytes.
    pub size: u64,
    /// BLAKE3 digest of the file contents. The canonical identifier for
    /// preview and remote lookup, computed lazily on first share.
    pub file_hash: [u8; 32],
    /// Peer id of the file's owner.
    pub owner_peer_id: PeerId,
}

/// Envelope type carried by a [`SignedMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    /// Initial announcement on joining the network.
    Join,
    /// Periodic liveness announcement.
    Heartbeat,
    /// Flooded file search request.
    SearchRequest,
    /// Reply to a search request.
    SearchResponse,
    /// PIN rendezvous announcement.
    PinAnnounce,
}

/// A signed discovery message: `(kind, sender_id, signature, payload)`.
///
/// The signature covers `payload` exactly. Verification uses the sender's
/// public key carried in the payload on first contact, and the pinned key
/// for that `sender_id` thereafter; callers that detect a key mismatch must
/// drop the message rather than trust it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedMessage {
    /// What kind of message this is.
    pub kind: MessageKind,
    /// Id of the sending peer.
    pub sender_id: PeerId,
    /// Raw 64-byte Ed25519 signature over `payload`.
    #[serde(with = "BigArray")]
    pub signature: [u8; 64],
    /// Serialized message body (bincode-encoded `PeerIdentity`,
    /// `SearchRequest`, etc, depending on `kind`).
    pub payload: Vec<u8>,
}

impl SignedMessage {
    /// Build and sign a new envelope.
    #[must_use]
    pub fn sign(
        kind: MessageKind,
        sender_id: PeerId,
        payload: Vec<u8>,
        signing_key: &parcel_crypto::signatures::SigningKey,
    ) -> Self {
        let signature = *signing_key.sign(&payload).as_bytes();
        Self {
            kind,
            sender_id,
            signature,
            payload,
        }
    }

    /// Verify the envelope's signature against `key`.
    ///
    /// # Errors
    ///
    /// Returns [`parcel_crypto::CryptoError::InvalidSignature`] if the
    /// signature does not verify.
    pub fn verify(&self, key: &VerifyingKey) -> Result<(), parcel_crypto::CryptoError> {
        let signature = Signature::from_bytes(self.signature);
        key.verify(&self.payload, &signature)
    }
}

/// A flooded search request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Unique id; processed at most once per node.
    pub request_id: uuid::Uuid,
    /// Peer id that originated the search.
    pub origin_peer_id: PeerId,
    /// Case-insensitive substring query against logical file names.
    pub query: String,
    /// Remaining hop count. Decremented and forwarded while positive.
    pub ttl: u8,
}

/// Reply to a [`SearchRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    /// Echoes the originating request id.
    pub request_id: uuid::Uuid,
    /// Peer id that produced the matches.
    pub source_peer: PeerId,
    /// Matching shared files.
    pub files: Vec<SharedFile>,
}
