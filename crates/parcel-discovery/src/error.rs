//! Error type for peer membership and search.

use crate::types::PeerId;
use thiserror::Error;

/// Errors raised by discovery and search operations.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// A peer claimed a known `peer_id` with a public key that does not
    /// match the one pinned for it.
    #[error("peer {0} presented a public key that does not match its pinned identity")]
    IdentityMismatch(PeerId),

    /// A signed message failed signature verification.
    #[error("signature verification failed: {0}")]
    InvalidSignature(#[from] parcel_crypto::CryptoError),

    /// The message payload could not be decoded for its declared kind.
    #[error("malformed message payload: {0}")]
    MalformedPayload(String),

    /// The peer is not known to this node.
    #[error("unknown peer {0}")]
    UnknownPeer(PeerId),
}
