//! Signed preview manifests: a small, permission-gated summary of a shared
//! file (thumbnail, text snippet, or archive listing) that a peer can
//! request and verify without first committing to a full transfer.
//!
//! A [`PreviewManifest`] is a commitment: it names which preview types exist
//! for a file and the content hash each one must match, signed as a whole so
//! a peer can reject a tampered manifest before fetching any content. The
//! actual bytes travel separately as [`PreviewContent`], checked against the
//! matching entry in an already-verified manifest rather than signed on its
//! own, the same split a TLS certificate (commitment) and the data it
//! protects (content) follow.

use crate::node::config::PreviewConfig;
use crate::node::error::{NodeError, Result};
use crate::node::identity::Identity;
use dashmap::DashMap;
use parcel_crypto::signatures::{Signature, VerifyingKey};
use parcel_discovery::{PeerId, SharedFile};
use parcel_files::preview::{self, GeneratedPreview, PreviewKind};
use serde::{Deserialize, Serialize};
use serde_big_array::BigArray;
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Wire-safe mirror of [`PreviewKind`], since the latter is not itself
/// serializable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PreviewContentKind {
    /// Downscaled JPEG thumbnail.
    Thumbnail,
    /// Leading lines of a text file.
    TextSnippet,
    /// Entry listing of a zip-family archive.
    ArchiveListing,
    /// No content preview is available, only size/name/mime metadata.
    MetadataOnly,
}

impl PreviewContentKind {
    /// Stable ordinal used to build a deterministic byte encoding of a set
    /// of kinds for signing, independent of `HashSet` iteration order.
    fn ordinal(self) -> u8 {
        match self {
            PreviewContentKind::Thumbnail => 0,
            PreviewContentKind::TextSnippet => 1,
            PreviewContentKind::ArchiveListing => 2,
            PreviewContentKind::MetadataOnly => 3,
        }
    }
}

impl From<PreviewKind> for PreviewContentKind {
    fn from(kind: PreviewKind) -> Self {
        match kind {
            PreviewKind::Thumbnail => PreviewContentKind::Thumbnail,
            PreviewKind::TextSnippet => PreviewContentKind::TextSnippet,
            PreviewKind::ArchiveListing => PreviewContentKind::ArchiveListing,
            PreviewKind::MetadataOnly => PreviewContentKind::MetadataOnly,
        }
    }
}

/// Request carried as the payload of `Command::PreviewRequest`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PreviewRequest {
    /// Fetch the signed manifest for a file, generating it on first request.
    GetManifest {
        /// BLAKE3 hash of the file to preview.
        file_hash: [u8; 32],
        /// MIME type the requester believes the file has, used only on the
        /// cache-miss path to decide what kind of preview to generate.
        mime_type: String,
        /// Peer id of the requester, checked against [`PreviewPolicy`].
        requester: PeerId,
    },
    /// Fetch one preview's content, once its manifest is already trusted.
    GetContent {
        /// BLAKE3 hash of the file to preview.
        file_hash: [u8; 32],
        /// Which of the manifest's `available_types` to fetch.
        kind: PreviewContentKind,
        /// MIME type the requester believes the file has, used only if the
        /// cache was evicted and the content must be regenerated.
        mime_type: String,
        /// Peer id of the requester, checked against [`PreviewPolicy`].
        requester: PeerId,
    },
}

/// Reply carried as the payload of `Command::PreviewResponse`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PreviewResponse {
    /// The requested manifest.
    Manifest(PreviewManifest),
    /// The requested content.
    Content(PreviewContent),
    /// No shared file matches the requested hash.
    NotFound,
    /// The requester is not permitted to preview this file.
    Forbidden,
}

/// A signed commitment to the set of preview types available for a file and
/// the content hash each one must match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewManifest {
    /// BLAKE3 hash of the file the manifest describes.
    pub file_hash: [u8; 32],
    /// Preview kinds this manifest has a hash for.
    pub available_types: HashSet<PreviewContentKind>,
    /// BLAKE3 digest of each available kind's content bytes, the values the
    /// signature actually covers.
    pub preview_hashes: HashMap<PreviewContentKind, [u8; 32]>,
    /// Thumbnail dimensions, if `Thumbnail` is among `available_types`.
    pub thumbnail_dims: Option<(u32, u32)>,
    /// Peer id of the signer (the file's owner).
    pub signer: PeerId,
    /// 64-byte Ed25519 signature over the canonical encoding of this
    /// manifest's fields.
    #[serde(with = "BigArray")]
    pub signature: [u8; 64],
}

impl PreviewManifest {
    /// Kinds in a deterministic order, for a stable signing/verification
    /// encoding regardless of `HashSet` iteration order.
    fn sorted_kinds(&self) -> Vec<PreviewContentKind> {
        let mut kinds: Vec<_> = self.available_types.iter().copied().collect();
        kinds.sort_by_key(|k| k.ordinal());
        kinds
    }

    fn signed_fields(&self) -> (Vec<u8>, Vec<u8>) {
        let kinds = self.sorted_kinds();
        let kind_bytes: Vec<u8> = kinds.iter().map(|k| k.ordinal()).collect();
        let mut hash_bytes = Vec::with_capacity(kinds.len() * 32);
        for kind in &kinds {
            hash_bytes.extend_from_slice(&self.preview_hashes[kind]);
        }
        (kind_bytes, hash_bytes)
    }

    /// Verify the manifest's signature against `signer_key`.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::InvalidManifestSignature`] if the signature does
    /// not verify over the manifest's canonical field encoding.
    pub fn verify(&self, signer_key: &VerifyingKey) -> Result<()> {
        let (kind_bytes, hash_bytes) = self.signed_fields();
        let signature = Signature::from_bytes(self.signature);
        signer_key
            .verify_fields(&[&self.file_hash, &kind_bytes, &hash_bytes, self.signer.0.as_bytes()], &signature)
            .map_err(|_| NodeError::InvalidManifestSignature)
    }

    fn sign(identity: &Identity, file_hash: [u8; 32], available_types: HashSet<PreviewContentKind>, preview_hashes: HashMap<PreviewContentKind, [u8; 32]>, thumbnail_dims: Option<(u32, u32)>) -> Self {
        let mut manifest = Self {
            file_hash,
            available_types,
            preview_hashes,
            thumbnail_dims,
            signer: identity.peer_id().clone(),
            signature: [0u8; 64],
        };
        let (kind_bytes, hash_bytes) = manifest.signed_fields();
        let signature = identity
            .signing_key()
            .sign_fields(&[&manifest.file_hash, &kind_bytes, &hash_bytes, manifest.signer.0.as_bytes()]);
        manifest.signature = *signature.as_bytes();
        manifest
    }
}

/// One fetched preview's content, verified against a manifest's
/// `preview_hashes` rather than carrying its own signature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewContent {
    /// BLAKE3 hash of the file this content previews.
    pub file_hash: [u8; 32],
    /// Which preview kind this is.
    pub kind: PreviewContentKind,
    /// Preview payload bytes (empty for `MetadataOnly`).
    pub data: Vec<u8>,
    /// Format label (`"jpeg"`, `"utf8"`, `"zip-listing"`, or empty).
    pub format: String,
    /// Thumbnail dimensions, if `kind == Thumbnail`.
    pub dims: Option<(u32, u32)>,
}

impl PreviewContent {
    /// Check this content's bytes against the hash a verified `manifest`
    /// commits to for `self.kind`.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::HashMismatch`] if `kind` is absent from the
    /// manifest or the content's hash does not match.
    pub fn verify_against(&self, manifest: &PreviewManifest) -> Result<()> {
        let expected = manifest.preview_hashes.get(&self.kind).ok_or(NodeError::HashMismatch)?;
        if parcel_crypto::hash::hash(&self.data) == *expected {
            Ok(())
        } else {
            Err(NodeError::HashMismatch)
        }
    }
}

/// Per-peer preview permission policy: whether previews are served at all,
/// and whether only peers this node has already exchanged a direct
/// connection with may request them.
#[derive(Debug, Clone)]
pub struct PreviewPolicy {
    /// Master switch; when false, every preview request is denied.
    pub allow_preview: bool,
    /// Restrict previews to peers in `trusted_peers`.
    pub trusted_peers_only: bool,
    /// Peer ids considered trusted when `trusted_peers_only` is set.
    pub trusted_peers: HashSet<PeerId>,
}

impl Default for PreviewPolicy {
    fn default() -> Self {
        Self {
            allow_preview: true,
            trusted_peers_only: false,
            trusted_peers: HashSet::new(),
        }
    }
}

impl PreviewPolicy {
    fn permits(&self, requester: &PeerId) -> bool {
        if !self.allow_preview {
            return false;
        }
        if self.trusted_peers_only {
            return self.trusted_peers.contains(requester);
        }
        true
    }
}

/// Generates and signs preview manifests for locally shared files,
/// respecting [`PreviewPolicy`], caching both the manifest and the
/// generated content so a later `GetContent` does not re-decode the file.
pub struct PreviewService {
    identity: std::sync::Arc<Identity>,
    config: PreviewConfig,
    policy: PreviewPolicy,
    cache: DashMap<[u8; 32], (PreviewManifest, GeneratedPreview)>,
}

impl PreviewService {
    /// Build a preview service bound to `identity`.
    #[must_use]
    pub fn new(identity: std::sync::Arc<Identity>, config: PreviewConfig, policy: PreviewPolicy) -> Self {
        Self { identity, config, policy, cache: DashMap::new() }
    }

    fn generate_and_cache(&self, file: &SharedFile, local_path: &Path, mime_type: &str) -> Result<(PreviewManifest, GeneratedPreview)> {
        let generated: GeneratedPreview = preview::generate(
            local_path,
            file.size,
            mime_type,
            self.config.max_file_size,
            self.config.thumbnail_size,
            self.config.text_max_lines,
            self.config.text_max_chars,
        )
        .map_err(|e| NodeError::Preview(e.to_string().into()))?;

        let kind: PreviewContentKind = generated.kind.into();
        let available_types = HashSet::from([kind]);
        let preview_hashes = HashMap::from([(kind, generated.data_hash)]);
        let dims = if kind == PreviewContentKind::Thumbnail { generated.dims } else { None };

        let manifest = PreviewManifest::sign(&self.identity, file.file_hash, available_types, preview_hashes, dims);
        self.cache.insert(file.file_hash, (manifest.clone(), generated.clone()));
        Ok((manifest, generated))
    }

    /// Fetch the cached manifest for `file`, generating it on a cache miss.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::Preview`] if the requester is denied by policy
    /// or preview generation fails.
    pub fn build_manifest(&self, file: &SharedFile, local_path: &Path, mime_type: &str, requester: &PeerId) -> Result<PreviewManifest> {
        if !self.policy.permits(requester) {
            return Err(NodeError::Preview("preview denied by policy".into()));
        }
        if let Some(entry) = self.cache.get(&file.file_hash) {
            return Ok(entry.0.clone());
        }
        let (manifest, _) = self.generate_and_cache(file, local_path, mime_type)?;
        Ok(manifest)
    }

    /// Fetch `kind`'s content for `file`, regenerating from the source file
    /// if the cache was evicted.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::Preview`] if the requester is denied by policy
    /// or `kind` is not among the file's available preview types.
    pub fn build_content(&self, file: &SharedFile, local_path: &Path, mime_type: &str, kind: PreviewContentKind, requester: &PeerId) -> Result<PreviewContent> {
        if !self.policy.permits(requester) {
            return Err(NodeError::Preview("preview denied by policy".into()));
        }

        let generated = match self.cache.get(&file.file_hash) {
            Some(entry) => entry.1.clone(),
            None => self.generate_and_cache(file, local_path, mime_type)?.1,
        };

        let actual_kind: PreviewContentKind = generated.kind.into();
        if actual_kind != kind {
            return Err(NodeError::Preview("requested preview type is not available for this file".into()));
        }

        Ok(PreviewContent {
            file_hash: file.file_hash,
            kind: actual_kind,
            data: generated.data,
            format: generated.format.to_string(),
            dims: generated.dims,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn shared_text_file(identity: &Identity) -> (tempfile::TempDir, SharedFile) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "hello world").unwrap();

        let file = SharedFile {
            local_path: path.clone(),
            logical_name: "notes.txt".to_string(),
            size: std::fs::metadata(&path).unwrap().len(),
            file_hash: [0u8; 32],
            owner_peer_id: identity.peer_id().clone(),
        };
        (dir, file)
    }

    #[test]
    fn manifest_signed_by_owner_verifies() {
        let identity = std::sync::Arc::new(Identity::generate().unwrap());
        let service = PreviewService::new(identity.clone(), PreviewConfig::default(), PreviewPolicy::default());
        let (_dir, file) = shared_text_file(&identity);

        let manifest = service.build_manifest(&file, &file.local_path, "text/plain", &PeerId("anyone".to_string())).unwrap();
        manifest.verify(&identity.signing_key().verifying_key()).unwrap();
        assert_eq!(manifest.available_types, HashSet::from([PreviewContentKind::TextSnippet]));
    }

    #[test]
    fn tampered_manifest_fails_verification() {
        let identity = std::sync::Arc::new(Identity::generate().unwrap());
        let service = PreviewService::new(identity.clone(), PreviewConfig::default(), PreviewPolicy::default());
        let (_dir, file) = shared_text_file(&identity);

        let mut manifest = service.build_manifest(&file, &file.local_path, "text/plain", &PeerId("anyone".to_string())).unwrap();
        manifest.preview_hashes.insert(PreviewContentKind::TextSnippet, [0xffu8; 32]);
        assert!(manifest.verify(&identity.signing_key().verifying_key()).is_err());
    }

    #[test]
    fn content_verifies_against_its_manifest_hash() {
        let identity = std::sync::Arc::new(Identity::generate().unwrap());
        let service = PreviewService::new(identity.clone(), PreviewConfig::default(), PreviewPolicy::default());
        let (_dir, file) = shared_text_file(&identity);
        let requester = PeerId("anyone".to_string());

        let manifest = service.build_manifest(&file, &file.local_path, "text/plain", &requester).unwrap();
        let content = service.build_content(&file, &file.local_path, "text/plain", PreviewContentKind::TextSnippet, &requester).unwrap();
        content.verify_against(&manifest).unwrap();
    }

    #[test]
    fn content_with_wrong_data_fails_manifest_check() {
        let identity = std::sync::Arc::new(Identity::generate().unwrap());
        let service = PreviewService::new(identity.clone(), PreviewConfig::default(), PreviewPolicy::default());
        let (_dir, file) = shared_text_file(&identity);
        let requester = PeerId("anyone".to_string());

        let manifest = service.build_manifest(&file, &file.local_path, "text/plain", &requester).unwrap();
        let mut content = service.build_content(&file, &file.local_path, "text/plain", PreviewContentKind::TextSnippet, &requester).unwrap();
        content.data = b"tampered".to_vec();
        assert!(content.verify_against(&manifest).is_err());
    }

    #[test]
    fn requesting_unavailable_kind_is_rejected() {
        let identity = std::sync::Arc::new(Identity::generate().unwrap());
        let service = PreviewService::new(identity.clone(), PreviewConfig::default(), PreviewPolicy::default());
        let (_dir, file) = shared_text_file(&identity);
        let requester = PeerId("anyone".to_string());

        let result = service.build_content(&file, &file.local_path, "text/plain", PreviewContentKind::Thumbnail, &requester);
        assert!(result.is_err());
    }

    #[test]
    fn untrusted_requester_denied_when_policy_restricts() {
        let identity = std::sync::Arc::new(Identity::generate().unwrap());
        let policy = PreviewPolicy {
            allow_preview: true,
            trusted_peers_only: true,
            trusted_peers: HashSet::new(),
        };
        let service = PreviewService::new(identity.clone(), PreviewConfig::default(), policy);
        let (_dir, file) = shared_text_file(&identity);

        let result = service.build_manifest(&file, &file.local_path, "text/plain", &PeerId("stranger".to_string()));
        assert!(result.is_err());
    }
}
