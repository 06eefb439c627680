//! `XChaCha20-Poly1305` authenticated encryption for chunk payloads.
//!
//! Every ciphertext embeds its own random 24-byte nonce, so callers never
//! manage nonce state themselves: `seal` prepends the nonce, `open` reads it
//! back off the front. This matches the "per-message random nonce embedded
//! in the ciphertext" contract chunk transport relies on — there is no
//! separate out-of-band nonce channel to get out of sync.
//!
//! ## Usage
//!
//! ```ignore
//! use parcel_crypto::aead::{AeadCipher, AeadKey};
//!
//! let cipher = AeadCipher::new(&AeadKey::new(key_bytes));
//! let sealed = cipher.seal(b"secret", b"aad")?;
//! let plaintext = cipher.open(&sealed, b"aad")?;
//! ```

use crate::CryptoError;
use chacha20poly1305::{
    XChaCha20Poly1305,
    aead::{Aead, KeyInit, OsRng, rand_core::RngCore},
};

/// Raw key size for `XChaCha20Poly1305`.
pub const KEY_SIZE: usize = 32;
/// Nonce size for `XChaCha20Poly1305`.
pub const NONCE_SIZE: usize = 24;

/// Symmetric key for chunk encryption.
#[derive(Clone, zeroize::Zeroize, zeroize::ZeroizeOnDrop)]
pub struct AeadKey([u8; KEY_SIZE]);

impl AeadKey {
    /// Wrap raw key bytes.
    #[must_use]
    pub fn new(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Raw key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

/// Authenticated cipher bound to one symmetric key.
pub struct AeadCipher {
    cipher: XChaCha20Poly1305,
}

impl AeadCipher {
    /// Build a cipher from a derived chunk key.
    #[must_use]
    pub fn new(key: &AeadKey) -> Self {
        Self {
            cipher: XChaCha20Poly1305::new(key.as_bytes().into()),
        }
    }

    /// Encrypt `plaintext`, returning `nonce || ciphertext || tag`.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::EncryptionFailed`] if the underlying AEAD
    /// operation fails.
    pub fn seal(&self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut nonce = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher
            .encrypt(
                (&nonce).into(),
                chacha20poly1305::aead::Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|_| CryptoError::EncryptionFailed)?;

        let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt a `nonce || ciphertext || tag` blob produced by [`seal`](Self::seal).
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidNonceLength`] if `sealed` is shorter
    /// than the embedded nonce, or [`CryptoError::DecryptionFailed`] if the
    /// authentication tag does not verify. There is no silent-corruption
    /// fallback: a failed tag always errors.
    pub fn open(&self, sealed: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if sealed.len() < NONCE_SIZE {
            return Err(CryptoError::InvalidNonceLength);
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_SIZE);

        self.cipher
            .decrypt(
                nonce.into(),
                chacha20poly1305::aead::Payload {
                    msg: ciphertext,
                    aad,
                },
            )
            .map_err(|_| CryptoError::DecryptionFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let cipher = AeadCipher::new(&AeadKey::new([0x42u8; 32]));
        let sealed = cipher.seal(b"hello chunk", b"aad").unwrap();
        let opened = cipher.open(&sealed, b"aad").unwrap();
        assert_eq!(opened, b"hello chunk");
    }

    #[test]
    fn distinct_nonces_per_call() {
        let cipher = AeadCipher::new(&AeadKey::new([0x11u8; 32]));
        let a = cipher.seal(b"same plaintext", b"").unwrap();
        let b = cipher.seal(b"same plaintext", b"").unwrap();
        assert_ne!(a, b, "random nonce must vary call to call");
    }

    #[test]
    fn tamper_detected() {
        let cipher = AeadCipher::new(&AeadKey::new([0x99u8; 32]));
        let mut sealed = cipher.seal(b"integrity matters", b"").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0xff;
        assert!(matches!(
            cipher.open(&sealed, b""),
            Err(CryptoError::DecryptionFailed)
        ));
    }

    #[test]
    fn truncated_ciphertext_errors() {
        let cipher = AeadCipher::new(&AeadKey::new([0x07u8; 32]));
        let sealed = cipher.seal(b"data", b"").unwrap();
        let truncated = &sealed[..sealed.len() - 4];
        assert!(cipher.open(truncated, b"").is_err());
    }

    #[test]
    fn wrong_aad_rejected() {
        let cipher = AeadCipher::new(&AeadKey::new([0x55u8; 32]));
        let sealed = cipher.seal(b"payload", b"aad-1").unwrap();
        assert!(cipher.open(&sealed, b"aad-2").is_err());
    }

    #[test]
    fn too_short_for_nonce() {
        let cipher = AeadCipher::new(&AeadKey::new([0x33u8; 32]));
        assert!(matches!(
            cipher.open(&[0u8; 4], b""),
            Err(CryptoError::InvalidNonceLength)
        ));
    }
}
