//! Error types for the Node API.
//!
//! Errors are categorized to support retry logic: [`NodeError::is_transient`]
//! marks failures that may succeed if retried, [`NodeError::is_permanent`]
//! marks ones that will not.

use std::borrow::Cow;
use thiserror::Error;

/// Errors that can occur in Node operations.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Cryptographic operation failed.
    #[error("crypto error: {0}")]
    Crypto(#[from] parcel_crypto::CryptoError),

    /// Discovery/search operation failed.
    #[error("discovery error: {0}")]
    Discovery(#[from] parcel_discovery::DiscoveryError),

    /// File chunking, codec or preview operation failed.
    #[error("files error: {0}")]
    Files(#[from] parcel_files::FilesError),

    /// Direct peer connection failed.
    #[error("connection error: {0}")]
    Connection(Cow<'static, str>),

    /// TLS handshake or certificate verification failed.
    #[error("tls error: {0}")]
    Tls(Cow<'static, str>),

    /// Transfer not found for the given id.
    #[error("transfer not found: {0}")]
    TransferNotFound(uuid::Uuid),

    /// Transfer is in a state that does not permit the requested operation.
    #[error("invalid transfer state: {0}")]
    InvalidTransferState(Cow<'static, str>),

    /// Hash mismatch during chunk or file integrity verification.
    #[error("hash mismatch: integrity verification failed")]
    HashMismatch,

    /// No direct or relayed path is available for this peer/file.
    #[error("no path available to peer for this file")]
    NoPathAvailable,

    /// Relay HTTP request failed.
    #[error("relay error: {0}")]
    Relay(Cow<'static, str>),

    /// PIN not found or expired.
    #[error("pin not found or expired: {0:06}")]
    PinNotFound(u32),

    /// Preview not available or permission denied.
    #[error("preview error: {0}")]
    Preview(Cow<'static, str>),

    /// Preview manifest signature did not verify.
    #[error("manifest signature verification failed")]
    InvalidManifestSignature,

    /// File I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(Cow<'static, str>),

    /// Operation timed out.
    #[error("operation timed out: {0}")]
    Timeout(Cow<'static, str>),

    /// Wire message could not be serialized or deserialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),
}

impl NodeError {
    /// Returns true if this error is transient and may succeed on retry.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            NodeError::Timeout(_) | NodeError::Connection(_) | NodeError::Relay(_)
        )
    }

    /// Returns true if this error is permanent and will not succeed on retry.
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            NodeError::InvalidConfig(_)
                | NodeError::TransferNotFound(_)
                | NodeError::HashMismatch
                | NodeError::InvalidManifestSignature
                | NodeError::InvalidTransferState(_)
        )
    }

    /// Build a connection error with static context.
    #[must_use]
    pub const fn connection(context: &'static str) -> Self {
        NodeError::Connection(Cow::Borrowed(context))
    }

    /// Build a connection error with a dynamically-formatted message.
    #[must_use]
    pub fn connection_owned(context: impl Into<String>) -> Self {
        NodeError::Connection(Cow::Owned(context.into()))
    }

    /// Build an invalid-transfer-state error with static context.
    #[must_use]
    pub const fn invalid_state(context: &'static str) -> Self {
        NodeError::InvalidTransferState(Cow::Borrowed(context))
    }
}

/// Result type for Node operations.
pub type Result<T> = std::result::Result<T, NodeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_and_permanent_are_disjoint() {
        let transient = NodeError::connection("refused");
        assert!(transient.is_transient());
        assert!(!transient.is_permanent());

        let permanent = NodeError::HashMismatch;
        assert!(permanent.is_permanent());
        assert!(!permanent.is_transient());
    }

    #[test]
    fn transfer_not_found_is_permanent() {
        let err = NodeError::TransferNotFound(uuid::Uuid::nil());
        assert!(err.is_permanent());
    }
}
