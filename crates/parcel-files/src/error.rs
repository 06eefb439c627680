//! Error types for chunk codec, reassembly and preview generation.

use thiserror::Error;

/// Errors raised by `parcel-files`.
#[derive(Debug, Error)]
pub enum FilesError {
    /// Decoded chunk length did not match the recorded original length.
    #[error("chunk integrity check failed: expected {expected} bytes, got {actual}")]
    Integrity {
        /// Expected decoded length.
        expected: usize,
        /// Actual decoded length.
        actual: usize,
    },

    /// AEAD decryption of a chunk failed.
    #[error("chunk decryption failed: {0}")]
    Decryption(#[from] parcel_crypto::CryptoError),

    /// DEFLATE compression or decompression failed.
    #[error("compression error: {0}")]
    Compression(String),

    /// Underlying file I/O failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Preview generation failed (unsupported or corrupt source file).
    #[error("preview generation failed: {0}")]
    Preview(String),

    /// Source file exceeds the configured preview size limit.
    #[error("file too large for preview: {size} bytes exceeds limit {limit}")]
    TooLargeForPreview {
        /// Size of the source file.
        size: u64,
        /// Configured limit.
        limit: u64,
    },
}
