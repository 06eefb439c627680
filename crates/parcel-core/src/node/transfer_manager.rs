//! Transfer dispatch: decides direct versus relayed delivery for a
//! download, then drives the chunk-by-chunk loop against whichever path
//! wins, and serves inbound chunk requests from local disk.
//!
//! A direct attempt is raced against `TransferConfig::fallback_timeout`.
//! If it does not finish within that budget (or the peer is unreachable),
//! and a relay reference exists, the remaining chunks are fetched through
//! the relay instead. Both paths write into the same [`FileReassembler`],
//! so a transfer that starts direct and falls back partway through does
//! not re-fetch chunks it already has.

use crate::node::channel::{Channel, ChunkRequest, ChunkResponse, Command};
use crate::node::config::TransferConfig;
use crate::node::error::{NodeError, Result};
use crate::node::identity::Identity;
use crate::node::progress::TransferProgress;
use crate::node::transfer::{TransferHandle, TransferState};
use dashmap::DashMap;
use parcel_crypto::aead::AeadCipher;
use parcel_discovery::{PeerIdentity, SharedFile};
use parcel_files::chunker::{FileChunker, FileReassembler};
use parcel_files::codec::{decode_chunk, encode_chunk, is_compressible_name, ChunkRecord};
use parcel_relay::{RelayClient, RelayFileRef};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Whether a download should fall through to the relay: only once a direct
/// attempt has failed or timed out, and only if a relay reference actually
/// exists to fall back to.
#[must_use]
pub fn should_use_relay(direct_attempt_failed: bool, has_relay_ref: bool) -> bool {
    direct_attempt_failed && has_relay_ref
}

fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

fn relay_err(err: parcel_relay::RelayError) -> NodeError {
    NodeError::Relay(err.to_string().into())
}

/// Owns in-flight transfer state and drives both directions of chunk
/// transfer: downloading a remote peer's file, and serving chunks of a
/// locally shared one.
pub struct TransferManager {
    identity: Arc<Identity>,
    config: TransferConfig,
    relay: Option<RelayClient>,
    active: DashMap<Uuid, TransferHandle>,
}

impl TransferManager {
    /// Build a manager bound to `identity`, with an optional relay client
    /// for the fallback path (absent when no relay server is configured).
    #[must_use]
    pub fn new(identity: Arc<Identity>, config: TransferConfig, relay: Option<RelayClient>) -> Self {
        Self {
            identity,
            config,
            relay,
            active: DashMap::new(),
        }
    }

    /// Look up the handle for an active transfer.
    #[must_use]
    pub fn handle(&self, transfer_id: Uuid) -> Option<TransferHandle> {
        self.active.get(&transfer_id).map(|entry| entry.clone())
    }

    /// Snapshot of a transfer's progress, if it is tracked.
    pub async fn progress(&self, transfer_id: Uuid) -> Option<TransferProgress> {
        let handle = self.handle(transfer_id)?;
        let state = handle.lock().await;
        Some(TransferProgress::from_state(&state))
    }

    /// All transfer ids currently tracked, regardless of status.
    #[must_use]
    pub fn active_transfers(&self) -> Vec<Uuid> {
        self.active.iter().map(|entry| *entry.key()).collect()
    }

    fn forget(&self, transfer_id: Uuid) {
        self.active.remove(&transfer_id);
    }

    /// Start downloading `file` from `peer`, racing a direct connection
    /// against `fallback_timeout` before falling back to the relay
    /// reference in `relay_ref`, if any. Returns immediately with a handle
    /// the caller can poll or cancel; the transfer runs on its own task.
    #[must_use]
    pub fn download_with_fallback(
        self: &Arc<Self>,
        peer: PeerIdentity,
        file: SharedFile,
        save_directory: PathBuf,
        relay_ref: Option<RelayFileRef>,
        verifier: Arc<dyn rustls::client::danger::ServerCertVerifier>,
    ) -> TransferHandle {
        let state = TransferState::new(peer.peer_id.clone(), file.clone(), self.config.direct_chunk_size, save_directory);
        let transfer_id = state.transfer_id;
        let handle = TransferHandle::new(state);
        self.active.insert(transfer_id, handle.clone());

        let manager = Arc::clone(self);
        let task_handle = handle.clone();
        tokio::spawn(async move {
            let outcome = manager.run_download(transfer_id, peer, file, relay_ref, verifier, &task_handle).await;
            if let Err(err) = outcome {
                tracing::warn!(%transfer_id, error = %err, "transfer failed");
                let _ = task_handle.lock().await.fail();
            }
            manager.forget(transfer_id);
        });

        handle
    }

    async fn run_download(
        &self,
        transfer_id: Uuid,
        peer: PeerIdentity,
        file: SharedFile,
        relay_ref: Option<RelayFileRef>,
        verifier: Arc<dyn rustls::client::danger::ServerCertVerifier>,
        handle: &TransferHandle,
    ) -> Result<()> {
        let part_path = handle.lock().await.part_path();
        let chunk_size = self.config.direct_chunk_size;
        let mut reassembler = FileReassembler::resume(&part_path, file.size, chunk_size)?;

        let total_chunks = handle.lock().await.total_chunks;
        for chunk_index in (0..total_chunks).filter(|i| reassembler.has_chunk(*i)) {
            handle.lock().await.mark_received(chunk_index);
        }

        handle.lock().await.start()?;

        let cipher_key = self.identity.derive_relay_key(&peer.dh_public_key)?;
        let cipher = AeadCipher::new(&cipher_key);

        let addr = SocketAddr::new(peer.host, peer.port);
        let server_name = rustls_pki_types::ServerName::IpAddress(peer.host.into());

        let direct_failed = if reassembler.is_complete() {
            false
        } else {
            let direct = self.run_direct(&mut reassembler, handle, transfer_id, &file, addr, server_name, verifier, &cipher);
            match tokio::time::timeout(self.config.fallback_timeout, direct).await {
                Ok(Ok(())) => false,
                Ok(Err(err)) => {
                    tracing::debug!(%transfer_id, error = %err, "direct transfer attempt failed");
                    true
                }
                Err(_) => {
                    tracing::debug!(%transfer_id, "direct transfer attempt timed out, considering relay");
                    true
                }
            }
        };

        if should_use_relay(direct_failed, relay_ref.is_some()) && !reassembler.is_complete() {
            let relay_ref = relay_ref.as_ref().expect("has_relay_ref implies Some");
            self.download_via_relay(relay_ref, &cipher, &mut reassembler, handle).await?;
        }

        if !reassembler.is_complete() {
            return Err(NodeError::NoPathAvailable);
        }

        let final_path = handle.lock().await.final_path();
        reassembler.finalize()?;
        let assembled = std::fs::read(&part_path)?;
        if parcel_crypto::hash::hash(&assembled) != file.file_hash {
            let _ = std::fs::remove_file(&part_path);
            return Err(NodeError::HashMismatch);
        }
        std::fs::rename(&part_path, &final_path)?;
        handle.lock().await.complete()?;
        Ok(())
    }

    async fn run_direct(
        &self,
        reassembler: &mut FileReassembler,
        handle: &TransferHandle,
        transfer_id: Uuid,
        file: &SharedFile,
        addr: SocketAddr,
        server_name: rustls_pki_types::ServerName<'static>,
        verifier: Arc<dyn rustls::client::danger::ServerCertVerifier>,
        cipher: &AeadCipher,
    ) -> Result<()> {
        let mut channel = Channel::connect(addr, server_name, verifier).await?;
        loop {
            if reassembler.is_complete() {
                return Ok(());
            }
            tokio::select! {
                () = handle.cancelled() => return Err(NodeError::invalid_state("transfer cancelled")),
                result = self.fetch_one_chunk(&mut channel, reassembler, handle, transfer_id, file, cipher) => {
                    result?;
                }
            }
        }
    }

    async fn fetch_one_chunk(
        &self,
        channel: &mut Channel,
        reassembler: &mut FileReassembler,
        handle: &TransferHandle,
        transfer_id: Uuid,
        file: &SharedFile,
        cipher: &AeadCipher,
    ) -> Result<()> {
        handle.wait_while_paused().await;
        let Some(chunk_index) = reassembler.missing_chunks().into_iter().next() else {
            return Ok(());
        };

        let request = ChunkRequest {
            transfer_id,
            file_hash: file.file_hash,
            chunk_index,
            requester: self.identity.peer_id().clone(),
        };
        channel.send(Command::ChunkRequest, &request).await?;
        let (command, payload) = channel.recv().await?;
        if command != Command::ChunkResponse {
            return Err(NodeError::connection("peer returned an unexpected response to a chunk request"));
        }
        let response: ChunkResponse = bincode::deserialize(&payload)?;
        let plaintext = decode_chunk(&response.record, cipher)?;
        reassembler.write_chunk(chunk_index, &plaintext)?;
        handle.lock().await.mark_received(chunk_index);
        Ok(())
    }

    async fn download_via_relay(
        &self,
        relay_ref: &RelayFileRef,
        cipher: &AeadCipher,
        reassembler: &mut FileReassembler,
        handle: &TransferHandle,
    ) -> Result<()> {
        let relay = self.relay.as_ref().ok_or(NodeError::NoPathAvailable)?;
        let blob = relay.download(relay_ref.upload_id, None).await.map_err(relay_err)?;
        let records: Vec<ChunkRecord> = bincode::deserialize(&blob)?;
        for record in records {
            if reassembler.has_chunk(record.chunk_index) {
                continue;
            }
            let plaintext = decode_chunk(&record, cipher)?;
            reassembler.write_chunk(record.chunk_index, &plaintext)?;
            handle.lock().await.mark_received(record.chunk_index);
        }
        Ok(())
    }

    /// Upload a locally shared file to the relay as a single opaque,
    /// already-encrypted blob, so the relay never needs to understand
    /// chunk boundaries and never sees plaintext.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::NoPathAvailable`] if no relay is configured, or
    /// propagates relay transport failures.
    pub async fn upload_via_relay(&self, file: &SharedFile, peer: &PeerIdentity, lifetime: std::time::Duration) -> Result<RelayFileRef> {
        let relay = self.relay.as_ref().ok_or(NodeError::NoPathAvailable)?;
        let cipher_key = self.identity.derive_relay_key(&peer.dh_public_key)?;
        let cipher = AeadCipher::new(&cipher_key);

        let chunk_size = self.config.relay_chunk_size;
        let compress = is_compressible_name(&file.logical_name);
        let mut chunker = FileChunker::new(&file.local_path, chunk_size)?;
        let mut records = Vec::with_capacity(chunker.num_chunks() as usize);
        let mut chunk_index = 0u64;
        while let Some(plaintext) = chunker.read_chunk()? {
            records.push(encode_chunk(chunk_index, &plaintext, compress, &cipher)?);
            chunk_index += 1;
        }
        let blob = bincode::serialize(&records)?;

        let transport_chunk = chunk_size.max(1);
        let first_len = transport_chunk.min(blob.len());
        let upload = relay
            .start_upload(&file.logical_name, blob.len() as u64, transport_chunk as u64, &file.owner_peer_id, &blob[..first_len])
            .await
            .map_err(relay_err)?;

        let mut offset = first_len;
        let mut part_index = 1u64;
        while offset < blob.len() {
            let end = (offset + transport_chunk).min(blob.len());
            relay.upload_chunk_with_retry(upload.upload_id, part_index, &blob[offset..end]).await.map_err(relay_err)?;
            offset = end;
            part_index += 1;
        }

        Ok(RelayFileRef {
            upload_id: upload.upload_id,
            file_name: file.logical_name.clone(),
            file_size: file.size,
            file_hash: Some(file.file_hash),
            download_url: format!("/api/relay/download/{}", upload.upload_id),
            sender_id: file.owner_peer_id.clone(),
            sender_name: None,
            recipient_id: Some(peer.peer_id.clone()),
            encrypted: true,
            encryption_algorithm: Some("xchacha20poly1305".to_string()),
            mime_type: None,
            expiry_at: now_secs() + lifetime.as_secs(),
            download_count: 0,
            max_downloads: None,
        })
    }

    /// Serve one inbound chunk request from a locally shared file.
    ///
    /// # Errors
    ///
    /// Propagates I/O failures reading the chunk, or codec failures
    /// encoding it.
    pub fn serve_chunk(&self, request: &ChunkRequest, local_path: &Path, peer: &PeerIdentity, chunk_size: usize, compress: bool) -> Result<ChunkResponse> {
        let cipher_key = self.identity.derive_relay_key(&peer.dh_public_key)?;
        let cipher = AeadCipher::new(&cipher_key);
        let mut chunker = FileChunker::new(local_path, chunk_size)?;
        let plaintext = chunker.read_chunk_at(request.chunk_index)?;
        let record = encode_chunk(request.chunk_index, &plaintext, compress, &cipher)?;
        Ok(ChunkResponse {
            chunk_index: request.chunk_index,
            record,
        })
    }
}
