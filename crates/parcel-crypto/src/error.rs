//! Cryptographic error types.

use thiserror::Error;

/// Cryptographic errors
#[derive(Debug, Error)]
pub enum CryptoError {
    /// AEAD encryption failed
    #[error("encryption failed")]
    EncryptionFailed,

    /// AEAD decryption failed (authentication failure)
    #[error("decryption failed: authentication failure")]
    DecryptionFailed,

    /// Invalid key length
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// Invalid nonce length
    #[error("invalid nonce length")]
    InvalidNonceLength,

    /// Signature verification failed
    #[error("signature verification failed")]
    InvalidSignature,

    /// Malformed public key bytes
    #[error("invalid public key")]
    InvalidPublicKey,

    /// TLS handshake failed, or the peer's certificate did not match its
    /// pinned public key
    #[error("handshake error: {0}")]
    Handshake(String),

    /// Self-signed identity generation failed
    #[error("identity generation failed: {0}")]
    IdentityGeneration(String),

    /// Key derivation failed
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),
}
