//! In-memory server state: upload bookkeeping, peer registry, file search
//! index and PIN records, each behind a [`dashmap::DashMap`] so handlers
//! never hold a lock across an await point on a different key.

use crate::error::{RelayError, Result};
use crate::types::{RelayFileEntry, RelayFileRef, RelayPeerRecord, RelayPinRecord, RelayUpload};
use dashmap::DashMap;
use parcel_discovery::PeerId;
use rand::Rng;
use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Peers not heard from in this long are dropped from the registry.
pub const PEER_TIMEOUT_SECS: u64 = 60;

/// Shared server state, cloned cheaply into every handler via `axum::State`.
#[derive(Clone)]
pub struct RelayState {
    inner: Arc<Inner>,
}

struct Inner {
    data_dir: PathBuf,
    uploads: DashMap<Uuid, RelayUpload>,
    file_refs: DashMap<Uuid, RelayFileRef>,
    peers: DashMap<PeerId, RelayPeerRecord>,
    files: DashMap<PeerId, Vec<RelayFileEntry>>,
    pins: DashMap<u32, RelayPinRecord>,
}

pub(crate) fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl RelayState {
    /// Build a new, empty server state rooted at `data_dir` for uploaded
    /// file bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if `data_dir` cannot be created.
    pub fn new(data_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&data_dir)?;
        Ok(Self {
            inner: Arc::new(Inner {
                data_dir,
                uploads: DashMap::new(),
                file_refs: DashMap::new(),
                peers: DashMap::new(),
                files: DashMap::new(),
                pins: DashMap::new(),
            }),
        })
    }

    fn upload_path(&self, upload_id: Uuid) -> PathBuf {
        self.inner.data_dir.join(format!("{upload_id}.bin"))
    }

    /// Create a new upload record and pre-size its backing file.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing file cannot be created.
    pub fn create_upload(
        &self,
        file_name: String,
        total_size: u64,
        chunk_size: u64,
        expiry_secs: u64,
    ) -> Result<RelayUpload> {
        let upload_id = Uuid::new_v4();
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(self.upload_path(upload_id))?;
        file.set_len(total_size)?;

        let now = now_secs();
        let upload = RelayUpload {
            upload_id,
            file_name,
            total_size,
            chunk_size,
            stored_size: 0,
            received_chunk_indices: Default::default(),
            created_at: now,
            expiry_at: now + expiry_secs,
        };
        self.inner.uploads.insert(upload_id, upload.clone());
        Ok(upload)
    }

    /// Write one chunk's bytes at its computed offset and record receipt.
    ///
    /// Idempotent: re-uploading a chunk index already received overwrites
    /// the same bytes and does not double-count `stored_size`.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::UploadNotFound`]/[`RelayError::UploadExpired`]
    /// if the upload is unknown or expired, or propagates I/O errors.
    pub fn write_chunk(&self, upload_id: Uuid, chunk_index: u64, data: &[u8]) -> Result<RelayUpload> {
        let mut entry = self
            .inner
            .uploads
            .get_mut(&upload_id)
            .ok_or(RelayError::UploadNotFound(upload_id))?;

        if entry.expiry_at < now_secs() {
            return Err(RelayError::UploadExpired(upload_id));
        }

        let offset = chunk_index * entry.chunk_size;
        let mut file = OpenOptions::new().write(true).open(self.upload_path(upload_id))?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;

        if entry.received_chunk_indices.insert(chunk_index) {
            entry.stored_size = entry.stored_size.saturating_add(data.len() as u64).min(entry.total_size);
        }

        Ok(entry.clone())
    }

    /// Look up an upload's bookkeeping record.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::UploadNotFound`]/[`RelayError::UploadExpired`].
    pub fn get_upload(&self, upload_id: Uuid) -> Result<RelayUpload> {
        let entry = self
            .inner
            .uploads
            .get(&upload_id)
            .ok_or(RelayError::UploadNotFound(upload_id))?;
        if entry.expiry_at < now_secs() {
            return Err(RelayError::UploadExpired(upload_id));
        }
        Ok(entry.clone())
    }

    /// Absolute path to the upload's backing file, for streaming a download.
    #[must_use]
    pub fn upload_file_path(&self, upload_id: Uuid) -> PathBuf {
        self.upload_path(upload_id)
    }

    /// Register a downloadable reference for a completed (or in-progress,
    /// for streaming senders) upload.
    pub fn register_file_ref(&self, file_ref: RelayFileRef) {
        self.inner.file_refs.insert(file_ref.upload_id, file_ref);
    }

    /// Record one more completed download against a file reference's
    /// `download_count`, rejecting once `max_downloads` is reached.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::UploadNotFound`] if there is no reference for
    /// `upload_id`, or [`RelayError::BadRequest`] if the download limit has
    /// already been reached.
    pub fn record_download(&self, upload_id: Uuid) -> Result<()> {
        let mut entry = self
            .inner
            .file_refs
            .get_mut(&upload_id)
            .ok_or(RelayError::UploadNotFound(upload_id))?;
        if let Some(max) = entry.max_downloads {
            if entry.download_count >= max {
                return Err(RelayError::BadRequest("download limit reached".to_string()));
            }
        }
        entry.download_count += 1;
        Ok(())
    }

    /// Remove uploads (and their backing files) past their expiry.
    pub fn sweep_expired_uploads(&self) {
        let now = now_secs();
        let expired: Vec<Uuid> = self
            .inner
            .uploads
            .iter()
            .filter(|e| e.expiry_at < now)
            .map(|e| *e.key())
            .collect();
        for upload_id in expired {
            self.inner.uploads.remove(&upload_id);
            self.inner.file_refs.remove(&upload_id);
            let _ = std::fs::remove_file(self.upload_path(upload_id));
        }
    }

    /// Upsert a peer's registration/heartbeat.
    pub fn upsert_peer(&self, record: RelayPeerRecord) {
        self.inner.peers.insert(record.peer_id.clone(), record);
    }

    /// All peers heard from within [`PEER_TIMEOUT_SECS`], excluding
    /// `exclude_peer_id` when given.
    #[must_use]
    pub fn list_peers(&self, exclude_peer_id: Option<&PeerId>) -> Vec<RelayPeerRecord> {
        let cutoff = now_secs().saturating_sub(PEER_TIMEOUT_SECS);
        self.inner
            .peers
            .iter()
            .filter(|e| e.last_heartbeat >= cutoff)
            .filter(|e| exclude_peer_id != Some(&e.peer_id))
            .map(|e| e.value().clone())
            .collect()
    }

    /// Drop peers not heard from within [`PEER_TIMEOUT_SECS`].
    pub fn sweep_stale_peers(&self) {
        let cutoff = now_secs().saturating_sub(PEER_TIMEOUT_SECS);
        self.inner.peers.retain(|_, record| record.last_heartbeat >= cutoff);
    }

    /// Replace the set of files registered by one peer.
    pub fn register_files(&self, peer_id: PeerId, files: Vec<RelayFileEntry>) {
        self.inner.files.insert(peer_id, files);
    }

    /// Case-insensitive substring search across every registered peer's
    /// files, optionally excluding one sender.
    #[must_use]
    pub fn search_files(&self, query: &str, exclude_sender: Option<&PeerId>) -> Vec<RelayFileEntry> {
        let needle = query.to_lowercase();
        self.inner
            .files
            .iter()
            .filter(|e| exclude_sender != Some(e.key()))
            .flat_map(|e| e.value().clone())
            .filter(|f| f.logical_name.to_lowercase().contains(&needle))
            .collect()
    }

    /// Create a PIN, retrying on collision against currently-active codes.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::PinSpaceExhausted`] if no free code is found
    /// within a bounded number of attempts (practically unreachable with
    /// 900,000 codes and realistic concurrency).
    pub fn create_pin(&self, file_ref: RelayFileRef, owner_peer_id: PeerId, lifetime_secs: u64) -> Result<RelayPinRecord> {
        let now = now_secs();
        for _ in 0..32 {
            let pin = rand::thread_rng().gen_range(100_000..=999_999);
            let record = RelayPinRecord {
                pin,
                file_ref: file_ref.clone(),
                owner_peer_id: owner_peer_id.clone(),
                created_at: now,
                expiry_at: now + lifetime_secs,
            };
            // `entry().or_insert` is the atomic, single-key uniqueness check:
            // a second caller racing on the same freshly-generated pin loses
            // and retries with a new one rather than clobbering the winner.
            let mut inserted = false;
            self.inner.pins.entry(pin).or_insert_with(|| {
                inserted = true;
                record.clone()
            });
            if inserted {
                return Ok(record);
            }
        }
        Err(RelayError::PinSpaceExhausted)
    }

    /// Resolve an active PIN.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::PinNotFound`] if the PIN is unknown or expired.
    pub fn find_pin(&self, pin: u32) -> Result<RelayPinRecord> {
        let entry = self.inner.pins.get(&pin).ok_or(RelayError::PinNotFound(pin))?;
        if entry.expiry_at < now_secs() {
            return Err(RelayError::PinNotFound(pin));
        }
        Ok(entry.clone())
    }

    /// Drop PINs past their expiry.
    pub fn sweep_expired_pins(&self) {
        let now = now_secs();
        self.inner.pins.retain(|_, record| record.expiry_at >= now);
    }

    /// Snapshot counts for the health endpoint.
    #[must_use]
    pub fn counts(&self) -> (usize, usize) {
        (self.inner.uploads.len(), self.inner.peers.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> (RelayState, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let state = RelayState::new(dir.path().to_path_buf()).unwrap();
        (state, dir)
    }

    #[test]
    fn stored_size_is_monotonic_and_dedups_retries() {
        let (state, _dir) = state();
        let upload = state.create_upload("file.bin".to_string(), 20, 10, 600).unwrap();

        let after_first = state.write_chunk(upload.upload_id, 0, &[1u8; 10]).unwrap();
        assert_eq!(after_first.stored_size, 10);

        // Retry of the same chunk must not double-count.
        let after_retry = state.write_chunk(upload.upload_id, 0, &[1u8; 10]).unwrap();
        assert_eq!(after_retry.stored_size, 10);

        let after_second = state.write_chunk(upload.upload_id, 1, &[2u8; 10]).unwrap();
        assert_eq!(after_second.stored_size, 20);
    }

    #[test]
    fn pin_uniqueness_holds_under_repeated_creation() {
        let (state, _dir) = state();
        let file_ref = RelayFileRef {
            upload_id: Uuid::new_v4(),
            file_name: "a.txt".to_string(),
            file_size: 1,
            file_hash: None,
            download_url: "/api/relay/download/x".to_string(),
            sender_id: PeerId("alice".to_string()),
            sender_name: None,
            recipient_id: None,
            encrypted: false,
            encryption_algorithm: None,
            mime_type: None,
            expiry_at: now_secs() + 600,
            download_count: 0,
            max_downloads: None,
        };

        let mut seen = std::collections::HashSet::new();
        for _ in 0..200 {
            let record = state.create_pin(file_ref.clone(), PeerId("alice".to_string()), 600).unwrap();
            assert!(seen.insert(record.pin), "pin {} was issued twice", record.pin);
        }
    }

    #[test]
    fn expired_pin_is_not_resolvable() {
        let (state, _dir) = state();
        let file_ref = RelayFileRef {
            upload_id: Uuid::new_v4(),
            file_name: "a.txt".to_string(),
            file_size: 1,
            file_hash: None,
            download_url: "/api/relay/download/x".to_string(),
            sender_id: PeerId("alice".to_string()),
            sender_name: None,
            recipient_id: None,
            encrypted: false,
            encryption_algorithm: None,
            mime_type: None,
            expiry_at: now_secs() + 600,
            download_count: 0,
            max_downloads: None,
        };
        let record = state.create_pin(file_ref, PeerId("alice".to_string()), 0).unwrap();
        assert!(matches!(state.find_pin(record.pin), Err(RelayError::PinNotFound(_))));
    }
}
