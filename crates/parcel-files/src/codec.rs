//! Per-chunk compress-then-encrypt codec.
//!
//! Each chunk is optionally DEFLATE-compressed (skipped for file types that
//! are already compressed, where it would just burn CPU for no size win),
//! then sealed with the session's AEAD cipher. [`decode_chunk`] either
//! returns exactly the original plaintext length or a [`FilesError::Integrity`] —
//! a truncated or tampered chunk is never silently accepted as a short read.

use crate::FilesError;
use flate2::Compression;
use flate2::read::{DeflateDecoder, DeflateEncoder};
use parcel_crypto::aead::AeadCipher;
use serde::{Deserialize, Serialize};
use std::io::Read;

/// Extensions for formats that are already compressed, so recompressing
/// them would waste CPU without shrinking the payload.
const INCOMPRESSIBLE_EXTENSIONS: &[&str] = &[
    "zip", "gz", "xz", "zst", "bz2", "7z", "rar", "jpg", "jpeg", "png", "gif", "webp", "mp3",
    "mp4", "mkv", "mov", "avi", "flac", "ogg",
];

/// Whether `file_name`'s extension suggests the file is already compressed.
#[must_use]
pub fn is_compressible_name(file_name: &str) -> bool {
    let Some(ext) = file_name.rsplit('.').next() else {
        return true;
    };
    !INCOMPRESSIBLE_EXTENSIONS
        .iter()
        .any(|known| known.eq_ignore_ascii_case(ext))
}

/// One encoded, encrypted chunk ready to go on the wire.
///
/// Field order is the wire contract: this is `bincode`-encoded directly,
/// with no self-describing schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// Index of this chunk within the file.
    pub chunk_index: u64,
    /// Length of the plaintext chunk before compression or encryption.
    pub original_len: usize,
    /// Whether the chunk was DEFLATE-compressed before encryption.
    pub compressed: bool,
    /// Length of the encrypted payload (compressed if `compressed`).
    pub enc_len: usize,
    /// `nonce || ciphertext || tag`, as produced by [`AeadCipher::seal`].
    pub ciphertext: Vec<u8>,
}

/// Encode and encrypt one chunk.
///
/// # Errors
///
/// Returns [`FilesError::Compression`] if DEFLATE fails, or propagates AEAD
/// failures from the cipher.
pub fn encode_chunk(
    chunk_index: u64,
    plaintext: &[u8],
    compress: bool,
    cipher: &AeadCipher,
) -> Result<ChunkRecord, FilesError> {
    let original_len = plaintext.len();

    let (compressed, payload): (bool, Vec<u8>) = if compress {
        let mut encoder = DeflateEncoder::new(plaintext, Compression::default());
        let mut buf = Vec::new();
        encoder
            .read_to_end(&mut buf)
            .map_err(|e| FilesError::Compression(e.to_string()))?;
        (true, buf)
    } else {
        (false, plaintext.to_vec())
    };

    let aad = chunk_index.to_be_bytes();
    let ciphertext = cipher.seal(&payload, &aad)?;

    Ok(ChunkRecord {
        chunk_index,
        original_len,
        compressed,
        enc_len: ciphertext.len(),
        ciphertext,
    })
}

/// Decrypt and decode one chunk, returning exactly `original_len` plaintext
/// bytes.
///
/// # Errors
///
/// Returns [`FilesError::Decryption`] if the AEAD tag does not verify,
/// [`FilesError::Compression`] if DEFLATE decoding fails, or
/// [`FilesError::Integrity`] if the decoded length does not match
/// `original_len` recorded in the record.
pub fn decode_chunk(record: &ChunkRecord, cipher: &AeadCipher) -> Result<Vec<u8>, FilesError> {
    if record.ciphertext.len() != record.enc_len {
        return Err(FilesError::Integrity {
            expected: record.enc_len,
            actual: record.ciphertext.len(),
        });
    }

    let aad = record.chunk_index.to_be_bytes();
    let payload = cipher.open(&record.ciphertext, &aad)?;

    let plaintext = if record.compressed {
        let mut decoder = DeflateDecoder::new(payload.as_slice());
        let mut buf = Vec::new();
        decoder
            .read_to_end(&mut buf)
            .map_err(|e| FilesError::Compression(e.to_string()))?;
        buf
    } else {
        payload
    };

    if plaintext.len() != record.original_len {
        return Err(FilesError::Integrity {
            expected: record.original_len,
            actual: plaintext.len(),
        });
    }

    Ok(plaintext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parcel_crypto::aead::AeadKey;

    fn cipher() -> AeadCipher {
        AeadCipher::new(&AeadKey::new([0x24u8; 32]))
    }

    #[test]
    fn roundtrip_uncompressed() {
        let cipher = cipher();
        let data = b"plain chunk bytes";
        let record = encode_chunk(0, data, false, &cipher).unwrap();
        let decoded = decode_chunk(&record, &cipher).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn roundtrip_compressed() {
        let cipher = cipher();
        let data = vec![b'a'; 4096];
        let record = encode_chunk(3, &data, true, &cipher).unwrap();
        assert!(record.compressed);
        assert!(record.enc_len < data.len());
        let decoded = decode_chunk(&record, &cipher).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn truncated_ciphertext_is_integrity_error() {
        let cipher = cipher();
        let mut record = encode_chunk(0, b"hello", false, &cipher).unwrap();
        record.ciphertext.truncate(record.ciphertext.len() - 1);
        assert!(matches!(
            decode_chunk(&record, &cipher),
            Err(FilesError::Integrity { .. })
        ));
    }

    #[test]
    fn wrong_chunk_index_fails_aad_check() {
        let cipher = cipher();
        let mut record = encode_chunk(1, b"hello", false, &cipher).unwrap();
        record.chunk_index = 2;
        assert!(matches!(
            decode_chunk(&record, &cipher),
            Err(FilesError::Decryption(_))
        ));
    }

    #[test]
    fn compressible_name_heuristic() {
        assert!(is_compressible_name("notes.txt"));
        assert!(is_compressible_name("archive.tar"));
        assert!(!is_compressible_name("photo.JPG"));
        assert!(!is_compressible_name("video.mp4"));
        assert!(is_compressible_name("no_extension"));
    }
}
