//! Wire DTOs shared between the relay server and client.

use parcel_discovery::PeerId;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Server-side bookkeeping for one in-progress or completed relay upload.
///
/// `stored_size` only ever increases: chunks may arrive out of order or be
/// retried, but nothing ever un-stores a byte already written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayUpload {
    /// Unique id assigned when the upload was created.
    pub upload_id: uuid::Uuid,
    /// Original file name, as supplied by the uploader.
    pub file_name: String,
    /// Declared total size in bytes.
    pub total_size: u64,
    /// Chunk size used by the uploader, for computing byte offsets.
    pub chunk_size: u64,
    /// Bytes actually written to disk so far.
    pub stored_size: u64,
    /// Indices of chunks received so far, for idempotent retry detection.
    pub received_chunk_indices: HashSet<u64>,
    /// Unix timestamp (seconds) the upload was created.
    pub created_at: u64,
    /// Unix timestamp (seconds) after which the upload is reaped.
    pub expiry_at: u64,
}

/// A shareable reference to a relay-hosted file, handed to recipients so
/// they can download without ever talking to the original sender.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayFileRef {
    /// Upload this reference points at.
    pub upload_id: uuid::Uuid,
    /// File name for display and default save name.
    pub file_name: String,
    /// Total file size in bytes.
    pub file_size: u64,
    /// BLAKE3 hash of the plaintext file contents, if known at upload time.
    pub file_hash: Option<[u8; 32]>,
    /// Path the recipient downloads from, relative to the relay base URL.
    pub download_url: String,
    /// Peer id of the sender.
    pub sender_id: PeerId,
    /// Display name of the sender, if provided.
    pub sender_name: Option<String>,
    /// Peer id this transfer is intended for, if the sender restricted it.
    pub recipient_id: Option<PeerId>,
    /// Whether chunk contents are end-to-end encrypted (the relay cannot
    /// read them either way).
    pub encrypted: bool,
    /// Name of the encryption algorithm used, if `encrypted`.
    pub encryption_algorithm: Option<String>,
    /// Best-guess MIME type, for client-side display only.
    pub mime_type: Option<String>,
    /// Unix timestamp (seconds) after which the reference is no longer
    /// resolvable.
    pub expiry_at: u64,
    /// Number of times the file has been downloaded so far.
    pub download_count: u64,
    /// Maximum number of downloads permitted, if capped.
    pub max_downloads: Option<u64>,
}

/// Peer registry entry, as advertised to the relay for discovery when LAN
/// broadcast cannot reach a peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayPeerRecord {
    /// Peer id.
    pub peer_id: PeerId,
    /// Display name.
    pub display_name: String,
    /// Advertised host (may be a NAT-visible address).
    pub host: String,
    /// Advertised port.
    pub port: u16,
    /// Ed25519 public key bytes.
    pub public_key: [u8; 32],
    /// Unix timestamp (seconds) of the last heartbeat.
    pub last_heartbeat: u64,
}

/// A file entry registered with the relay's search index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayFileEntry {
    /// Logical file name.
    pub logical_name: String,
    /// File size in bytes.
    pub size: u64,
    /// BLAKE3 hash of the file contents.
    pub file_hash: [u8; 32],
    /// Peer id of the owner.
    pub owner_peer_id: PeerId,
}

/// A PIN rendezvous record held by the relay as a fallback path when LAN
/// broadcast cannot reach the recipient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayPinRecord {
    /// The 6-digit PIN code.
    pub pin: u32,
    /// The file this PIN resolves to.
    pub file_ref: RelayFileRef,
    /// Peer id of the PIN's owner.
    pub owner_peer_id: PeerId,
    /// Unix timestamp (seconds) the PIN was created.
    pub created_at: u64,
    /// Unix timestamp (seconds) after which the PIN is no longer resolvable.
    pub expiry_at: u64,
}

/// Health check response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    /// Always `"ok"` while the server is accepting requests.
    pub status: String,
    /// Number of uploads currently tracked.
    pub active_uploads: usize,
    /// Number of peers currently tracked.
    pub active_peers: usize,
}
