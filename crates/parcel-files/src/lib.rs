//! # parcel-files
//!
//! File chunking, resumable reassembly, chunk codec and preview generation
//! for parcel-net.
//!
//! This crate provides:
//! - File chunking with configurable chunk size and positioned reads
//! - Resumable `.part` file reassembly with a bitmap sidecar
//! - Per-chunk compress-then-encrypt codec
//! - Thumbnail/text-snippet/archive-listing preview generation

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod chunker;
pub mod codec;
pub mod error;
pub mod preview;

pub use error::FilesError;

/// Default chunk size (256 KiB)
pub const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;

/// File metadata for transfers
#[derive(Debug, Clone)]
pub struct FileMetadata {
    /// File name
    pub name: String,
    /// File size in bytes
    pub size: u64,
    /// BLAKE3 hash of entire file
    pub hash: [u8; 32],
    /// Number of chunks
    pub chunk_count: u64,
}
