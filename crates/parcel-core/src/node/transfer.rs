//! Transfer state and its finite state machine.
//!
//! ```text
//! Pending --start--> InProgress --complete--> Completed
//!                        |  ^
//!                  pause |  | resume
//!                        v  |
//!                      Paused
//!                        |
//!                  cancel|          cancel from any non-terminal
//!                        v
//!                    Cancelled                 Failed (on non-retryable error)
//! ```
//!
//! Pause/resume is driven by a [`tokio::sync::Notify`] rather than a sleep
//! loop: the download loop awaits the notification before reading the next
//! chunk, and `resume`/`cancel` wake it immediately.

use crate::node::error::{NodeError, Result};
use parcel_discovery::{PeerId, SharedFile};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify};
use uuid::Uuid;

/// A transfer's lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    /// Created but not yet started.
    Pending,
    /// Actively requesting/writing chunks.
    InProgress,
    /// Suspended; the `.part` file and received bitmap are untouched.
    Paused,
    /// All chunks received and the `.part` file renamed to its final name.
    Completed,
    /// Aborted by the caller; `.part` file and state removed.
    Cancelled,
    /// Aborted by a non-retryable error.
    Failed,
}

impl TransferStatus {
    /// Whether this is a terminal state (no further transitions apply).
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransferStatus::Completed | TransferStatus::Cancelled | TransferStatus::Failed
        )
    }
}

/// Full state of one in-flight or completed transfer.
pub struct TransferState {
    /// Unique id for this transfer.
    pub transfer_id: Uuid,
    /// Remote peer this transfer is with.
    pub peer: PeerId,
    /// File being transferred.
    pub file: SharedFile,
    /// Chunk size used for this transfer.
    pub chunk_size: usize,
    /// Total number of chunks.
    pub total_chunks: u64,
    /// Per-chunk received bitmap; `received[i]` is set once chunk `i` is
    /// durably written to the `.part` file.
    pub received: Vec<bool>,
    /// Bytes transferred so far (recomputed from `received` on every set).
    pub bytes_transferred: u64,
    /// Current lifecycle state.
    pub status: TransferStatus,
    /// When the transfer was started.
    pub start_time: Instant,
    /// Total time spent paused so far.
    pub accumulated_pause_duration: Duration,
    /// When the current pause began, if paused.
    pub paused_at: Option<Instant>,
    /// Directory the `.part`/final file live in.
    pub save_directory: PathBuf,
}

impl TransferState {
    /// Create a new, `Pending` transfer state.
    #[must_use]
    pub fn new(
        peer: PeerId,
        file: SharedFile,
        chunk_size: usize,
        save_directory: PathBuf,
    ) -> Self {
        let total_chunks = if file.size == 0 {
            0
        } else {
            file.size.div_ceil(chunk_size as u64)
        };
        Self {
            transfer_id: Uuid::new_v4(),
            peer,
            file,
            chunk_size,
            total_chunks,
            received: vec![false; total_chunks as usize],
            bytes_transferred: 0,
            status: TransferStatus::Pending,
            start_time: Instant::now(),
            accumulated_pause_duration: Duration::ZERO,
            paused_at: None,
            save_directory,
        }
    }

    /// Mark chunk `index` as received and recompute `bytes_transferred`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= total_chunks`, which would indicate a caller bug
    /// upstream (chunk indices come from `total_chunks`-bounded iteration).
    pub fn mark_received(&mut self, index: u64) {
        self.received[index as usize] = true;
        self.bytes_transferred = self.compute_bytes_transferred();
    }

    fn compute_bytes_transferred(&self) -> u64 {
        self.received
            .iter()
            .enumerate()
            .filter(|(_, set)| **set)
            .map(|(i, _)| {
                let offset = i as u64 * self.chunk_size as u64;
                (self.file.size - offset).min(self.chunk_size as u64)
            })
            .sum()
    }

    /// Whether every chunk has been received.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.received.iter().all(|r| *r)
    }

    /// First chunk index not yet received, if any.
    #[must_use]
    pub fn first_missing_chunk(&self) -> Option<u64> {
        self.received.iter().position(|r| !r).map(|i| i as u64)
    }

    /// `Pending -> InProgress`.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::InvalidTransferState`] unless currently `Pending`.
    pub fn start(&mut self) -> Result<()> {
        if self.status != TransferStatus::Pending {
            return Err(NodeError::invalid_state("start is only valid from Pending"));
        }
        self.status = TransferStatus::InProgress;
        Ok(())
    }

    /// `InProgress -> Paused`.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::InvalidTransferState`] unless currently
    /// `InProgress`.
    pub fn pause(&mut self) -> Result<()> {
        if self.status != TransferStatus::InProgress {
            return Err(NodeError::invalid_state("pause is only valid from InProgress"));
        }
        self.status = TransferStatus::Paused;
        self.paused_at = Some(Instant::now());
        Ok(())
    }

    /// `Paused -> InProgress`.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::InvalidTransferState`] unless currently `Paused`.
    pub fn resume(&mut self) -> Result<()> {
        if self.status != TransferStatus::Paused {
            return Err(NodeError::invalid_state("resume is only valid from Paused"));
        }
        if let Some(paused_at) = self.paused_at.take() {
            self.accumulated_pause_duration += paused_at.elapsed();
        }
        self.status = TransferStatus::InProgress;
        Ok(())
    }

    /// `InProgress -> Completed`, only once every chunk is received.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::InvalidTransferState`] unless currently
    /// `InProgress` and [`Self::is_complete`].
    pub fn complete(&mut self) -> Result<()> {
        if self.status != TransferStatus::InProgress {
            return Err(NodeError::invalid_state("complete is only valid from InProgress"));
        }
        if !self.is_complete() {
            return Err(NodeError::invalid_state("cannot complete with missing chunks"));
        }
        self.status = TransferStatus::Completed;
        Ok(())
    }

    /// Abort the transfer. Valid from any non-terminal state.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::InvalidTransferState`] if already terminal.
    pub fn cancel(&mut self) -> Result<()> {
        if self.status.is_terminal() {
            return Err(NodeError::invalid_state("cannot cancel a terminal transfer"));
        }
        self.status = TransferStatus::Cancelled;
        Ok(())
    }

    /// Fail the transfer on a non-retryable error. Valid from any
    /// non-terminal state.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::InvalidTransferState`] if already terminal.
    pub fn fail(&mut self) -> Result<()> {
        if self.status.is_terminal() {
            return Err(NodeError::invalid_state("cannot fail a terminal transfer"));
        }
        self.status = TransferStatus::Failed;
        Ok(())
    }

    /// Time the transfer has spent actively running, excluding paused time.
    #[must_use]
    pub fn active_duration(&self) -> Duration {
        let paused_so_far = self.accumulated_pause_duration
            + self
                .paused_at
                .map(|p| p.elapsed())
                .unwrap_or(Duration::ZERO);
        self.start_time.elapsed().saturating_sub(paused_so_far)
    }

    /// The `.part` file path for this transfer.
    #[must_use]
    pub fn part_path(&self) -> PathBuf {
        let mut name = self.file.logical_name.clone();
        name.push_str(".part");
        self.save_directory.join(name)
    }

    /// The final destination path once the transfer completes.
    #[must_use]
    pub fn final_path(&self) -> PathBuf {
        self.save_directory.join(&self.file.logical_name)
    }
}

/// Shared handle to a [`TransferState`], plus the notification used to wake
/// a paused download loop.
#[derive(Clone)]
pub struct TransferHandle {
    state: Arc<Mutex<TransferState>>,
    resume_notify: Arc<Notify>,
    cancel_notify: Arc<Notify>,
}

impl TransferHandle {
    /// Wrap a freshly created `TransferState`.
    #[must_use]
    pub fn new(state: TransferState) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
            resume_notify: Arc::new(Notify::new()),
            cancel_notify: Arc::new(Notify::new()),
        }
    }

    /// Lock the underlying state.
    pub async fn lock(&self) -> tokio::sync::MutexGuard<'_, TransferState> {
        self.state.lock().await
    }

    /// Resume a paused transfer and wake its download loop.
    ///
    /// # Errors
    ///
    /// Propagates [`TransferState::resume`]'s error if not currently paused.
    pub async fn resume(&self) -> Result<()> {
        self.state.lock().await.resume()?;
        self.resume_notify.notify_waiters();
        Ok(())
    }

    /// Cancel the transfer and wake anything waiting on pause or on
    /// cancellation.
    ///
    /// # Errors
    ///
    /// Propagates [`TransferState::cancel`]'s error if already terminal.
    pub async fn cancel(&self) -> Result<()> {
        self.state.lock().await.cancel()?;
        self.resume_notify.notify_waiters();
        self.cancel_notify.notify_waiters();
        Ok(())
    }

    /// Wait until the transfer leaves `Paused`, or return immediately if it
    /// is not currently paused.
    pub async fn wait_while_paused(&self) {
        loop {
            {
                let state = self.state.lock().await;
                if state.status != TransferStatus::Paused {
                    return;
                }
            }
            self.resume_notify.notified().await;
        }
    }

    /// A future that resolves when the transfer is cancelled, for use in a
    /// `tokio::select!` alongside chunk I/O.
    pub async fn cancelled(&self) {
        self.cancel_notify.notified().await;
    }
}
