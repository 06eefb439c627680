//! Transfer progress tracking: speed, ETA and a renderable snapshot for UI
//! callers, computed over [`TransferState`] without duplicating its FSM.

use crate::node::transfer::{TransferState, TransferStatus};
use std::time::Duration;
use uuid::Uuid;

/// A point-in-time snapshot of a transfer's progress, derived from its
/// [`TransferState`].
#[derive(Debug, Clone)]
pub struct TransferProgress {
    /// Transfer id this snapshot describes.
    pub transfer_id: Uuid,
    /// Current lifecycle status.
    pub status: TransferStatus,
    /// Bytes transferred so far.
    pub bytes_transferred: u64,
    /// Total file size.
    pub bytes_total: u64,
    /// Chunks received so far.
    pub chunks_received: u64,
    /// Total chunks.
    pub chunks_total: u64,
    /// Transfer speed in bytes/second, averaged over active time.
    pub speed_bytes_per_sec: f64,
    /// Estimated time remaining, if speed is known and positive.
    pub eta: Option<Duration>,
}

impl TransferProgress {
    /// Compute a snapshot from a transfer's current state, using active
    /// time (wall clock minus accumulated pause duration) for the speed
    /// calculation.
    #[must_use]
    pub fn from_state(state: &TransferState) -> Self {
        let active = state.active_duration().as_secs_f64();
        let speed_bytes_per_sec = if active > 0.0 {
            state.bytes_transferred as f64 / active
        } else {
            0.0
        };

        let remaining = state.file.size.saturating_sub(state.bytes_transferred);
        let eta = if speed_bytes_per_sec > 0.0 && remaining > 0 {
            Some(Duration::from_secs_f64(remaining as f64 / speed_bytes_per_sec))
        } else {
            None
        };

        Self {
            transfer_id: state.transfer_id,
            status: state.status,
            bytes_transferred: state.bytes_transferred,
            bytes_total: state.file.size,
            chunks_received: state.received.iter().filter(|r| **r).count() as u64,
            chunks_total: state.total_chunks,
            speed_bytes_per_sec,
            eta,
        }
    }

    /// Progress as a 0.0-100.0 percentage.
    #[must_use]
    pub fn percent(&self) -> f64 {
        if self.bytes_total == 0 {
            100.0
        } else {
            (self.bytes_transferred as f64 / self.bytes_total as f64) * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parcel_discovery::{PeerId, SharedFile};
    use std::path::PathBuf;

    fn shared_file(size: u64) -> SharedFile {
        SharedFile {
            local_path: PathBuf::from("notes.txt"),
            logical_name: "notes.txt".to_string(),
            size,
            file_hash: [0u8; 32],
            owner_peer_id: PeerId("owner".into()),
        }
    }

    #[test]
    fn percent_reflects_bytes_transferred() {
        let mut state = TransferState::new(
            PeerId("peer".into()),
            shared_file(131_072),
            65_536,
            PathBuf::from("/tmp"),
        );
        state.start().unwrap();
        state.mark_received(0);

        let progress = TransferProgress::from_state(&state);
        assert_eq!(progress.percent(), 50.0);
        assert_eq!(progress.chunks_received, 1);
        assert_eq!(progress.chunks_total, 2);
    }

    #[test]
    fn zero_byte_file_is_full_percent() {
        let state = TransferState::new(
            PeerId("peer".into()),
            shared_file(0),
            65_536,
            PathBuf::from("/tmp"),
        );
        let progress = TransferProgress::from_state(&state);
        assert_eq!(progress.percent(), 100.0);
    }
}
