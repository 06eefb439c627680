//! Passphrase-encrypted storage for a node's Ed25519 signing seed.
//!
//! The seed is the only long-lived secret `parcel_core::Identity` needs
//! (TLS certificates and the X25519 key are regenerated fresh on every
//! restart); everything else in this module exists to get that one 32-byte
//! value onto disk without writing it in the clear.
//!
//! File layout: `PARCEL1` magic, 16-byte Argon2 salt, 12-byte ChaCha20-Poly1305
//! nonce, then the ciphertext (seed + tag).

use anyhow::{bail, Context};
use argon2::Argon2;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use rand_core::{OsRng, RngCore};
use std::fs;
use std::path::Path;

const MAGIC: &[u8; 7] = b"PARCEL1";
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;

/// Derive a symmetric key from `passphrase` and `salt` with Argon2id.
fn derive_key(passphrase: &str, salt: &[u8]) -> anyhow::Result<[u8; 32]> {
    let mut key = [0u8; 32];
    Argon2::default()
        .hash_password_into(passphrase.as_bytes(), salt, &mut key)
        .map_err(|e| anyhow::anyhow!("key derivation failed: {e}"))?;
    Ok(key)
}

/// Encrypt `seed` with `passphrase` and write it to `path`.
///
/// # Errors
///
/// Returns an error if key derivation, encryption or the write fails.
pub fn save(path: &Path, seed: &[u8; 32], passphrase: &str) -> anyhow::Result<()> {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);

    let key = derive_key(passphrase, &salt)?;
    let cipher = ChaCha20Poly1305::new((&key).into());
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext = cipher
        .encrypt(nonce, seed.as_slice())
        .map_err(|e| anyhow::anyhow!("seed encryption failed: {e}"))?;

    let mut out = Vec::with_capacity(MAGIC.len() + SALT_LEN + NONCE_LEN + ciphertext.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&salt);
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("creating identity key directory")?;
    }
    fs::write(path, out).context("writing identity key file")?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))
            .context("restricting identity key file permissions")?;
    }
    Ok(())
}

/// Decrypt the seed stored at `path` with `passphrase`.
///
/// # Errors
///
/// Returns an error if the file is malformed, truncated, or the passphrase
/// is wrong (decryption authentication failure).
pub fn load(path: &Path, passphrase: &str) -> anyhow::Result<[u8; 32]> {
    let bytes = fs::read(path).with_context(|| format!("reading identity key file {}", path.display()))?;
    let min_len = MAGIC.len() + SALT_LEN + NONCE_LEN;
    if bytes.len() < min_len {
        bail!("identity key file is too short or corrupt");
    }
    if &bytes[..MAGIC.len()] != MAGIC {
        bail!("identity key file has an unrecognized header");
    }

    let salt = &bytes[MAGIC.len()..MAGIC.len() + SALT_LEN];
    let nonce_bytes = &bytes[MAGIC.len() + SALT_LEN..min_len];
    let ciphertext = &bytes[min_len..];

    let key = derive_key(passphrase, salt)?;
    let cipher = ChaCha20Poly1305::new((&key).into());
    let nonce = Nonce::from_slice(nonce_bytes);
    let plaintext = cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| anyhow::anyhow!("wrong passphrase or corrupted identity key file"))?;

    plaintext
        .try_into()
        .map_err(|_| anyhow::anyhow!("decrypted seed has the wrong length"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn round_trips_through_the_right_passphrase() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("identity.key");
        let seed = [7u8; 32];

        save(&path, &seed, "correct horse battery staple").unwrap();
        let recovered = load(&path, "correct horse battery staple").unwrap();
        assert_eq!(recovered, seed);
    }

    #[test]
    fn rejects_the_wrong_passphrase() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("identity.key");
        save(&path, &[1u8; 32], "passphrase-one").unwrap();
        assert!(load(&path, "passphrase-two").is_err());
    }

    #[test]
    fn rejects_a_truncated_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("identity.key");
        fs::write(&path, b"not a real key file").unwrap();
        assert!(load(&path, "anything").is_err());
    }
}
