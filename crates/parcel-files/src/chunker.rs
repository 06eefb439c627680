//! File chunking with seek support, and resumable reassembly into `.part` files.
//!
//! [`FileReassembler`] always writes with positioned I/O into a pre-sized
//! file — chunks can arrive in any order and are never appended. Received
//! chunk indices are mirrored into a small bitmap sidecar file next to the
//! `.part` file so a killed-and-restarted transfer can resume without
//! re-fetching chunks it already committed to disk.

use crate::DEFAULT_CHUNK_SIZE;
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Reads a file chunk-by-chunk with positioned seeks, for the sending side
/// of a transfer.
pub struct FileChunker {
    file: File,
    chunk_size: usize,
    total_size: u64,
    current_offset: u64,
}

impl FileChunker {
    /// Create a new chunker for a file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or metadata cannot be read.
    pub fn new<P: AsRef<Path>>(path: P, chunk_size: usize) -> io::Result<Self> {
        let file = File::open(path)?;
        let total_size = file.metadata()?.len();

        Ok(Self {
            file,
            chunk_size,
            total_size,
            current_offset: 0,
        })
    }

    /// Create a chunker with the default chunk size.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or metadata cannot be read.
    pub fn with_default_size<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        Self::new(path, DEFAULT_CHUNK_SIZE)
    }

    /// Total number of chunks.
    #[must_use]
    pub fn num_chunks(&self) -> u64 {
        self.total_size.div_ceil(self.chunk_size as u64)
    }

    /// Chunk size in bytes.
    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Total file size in bytes.
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Read the next chunk sequentially.
    ///
    /// # Errors
    ///
    /// Returns an error if reading from the file fails.
    pub fn read_chunk(&mut self) -> io::Result<Option<Vec<u8>>> {
        if self.current_offset >= self.total_size {
            return Ok(None);
        }

        let remaining = self.total_size - self.current_offset;
        let chunk_len = remaining.min(self.chunk_size as u64) as usize;

        let mut buffer = vec![0u8; chunk_len];
        self.file.read_exact(&mut buffer)?;

        self.current_offset += chunk_len as u64;

        Ok(Some(buffer))
    }

    /// Seek to a specific chunk.
    ///
    /// # Errors
    ///
    /// Returns an error if the chunk index is out of bounds or seeking fails.
    pub fn seek_to_chunk(&mut self, chunk_index: u64) -> io::Result<()> {
        let offset = chunk_index * self.chunk_size as u64;

        if offset >= self.total_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "chunk index out of bounds",
            ));
        }

        self.file.seek(SeekFrom::Start(offset))?;
        self.current_offset = offset;

        Ok(())
    }

    /// Read a specific chunk by index.
    ///
    /// # Errors
    ///
    /// Returns an error if the chunk index is invalid or reading fails.
    pub fn read_chunk_at(&mut self, chunk_index: u64) -> io::Result<Vec<u8>> {
        self.seek_to_chunk(chunk_index)?;
        self.read_chunk()?
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "chunk not found"))
    }

}

fn bitmap_path(part_path: &Path) -> PathBuf {
    let mut name = part_path.as_os_str().to_owned();
    name.push(".bitmap");
    PathBuf::from(name)
}

/// Reassembles a file from out-of-order chunks into a pre-sized `.part`
/// file, with enough on-disk state to resume after a restart.
pub struct FileReassembler {
    file: File,
    part_path: PathBuf,
    chunk_size: usize,
    total_chunks: u64,
    total_size: u64,
    received_chunks: HashSet<u64>,
}

impl FileReassembler {
    /// Create a new reassembler, truncating any existing `.part` file.
    ///
    /// Pre-allocates the file to the expected size for faster positioned
    /// writes.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or pre-allocated.
    pub fn new<P: AsRef<Path>>(path: P, total_size: u64, chunk_size: usize) -> io::Result<Self> {
        let part_path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&part_path)?;

        file.set_len(total_size)?;
        let _ = std::fs::remove_file(bitmap_path(&part_path));

        let total_chunks = total_size.div_ceil(chunk_size as u64);

        Ok(Self {
            file,
            part_path,
            chunk_size,
            total_chunks,
            total_size,
            received_chunks: HashSet::new(),
        })
    }

    /// Open an existing `.part` file and recover which chunks were already
    /// committed from its bitmap sidecar, so a killed transfer can resume.
    ///
    /// Falls back to an empty chunk set if no sidecar exists, or if the
    /// sidecar's recorded chunk count does not match `total_size`/
    /// `chunk_size` — a partial file from a different chunk size cannot be
    /// trusted and must restart from scratch.
    ///
    /// # Errors
    ///
    /// Returns an error if the `.part` file cannot be opened.
    pub fn resume<P: AsRef<Path>>(path: P, total_size: u64, chunk_size: usize) -> io::Result<Self> {
        let part_path = path.as_ref().to_path_buf();
        let total_chunks = total_size.div_ceil(chunk_size as u64);

        if !part_path.exists() {
            return Self::new(part_path, total_size, chunk_size);
        }

        let file = OpenOptions::new().write(true).open(&part_path)?;
        if file.metadata()?.len() != total_size {
            drop(file);
            return Self::new(part_path, total_size, chunk_size);
        }

        let received_chunks = match std::fs::read(bitmap_path(&part_path)) {
            Ok(bytes) if bytes.len() as u64 == total_chunks => bytes
                .iter()
                .enumerate()
                .filter(|&(_, &b)| b == 1)
                .map(|(i, _)| i as u64)
                .collect(),
            _ => HashSet::new(),
        };

        Ok(Self {
            file,
            part_path,
            chunk_size,
            total_chunks,
            total_size,
            received_chunks,
        })
    }

    /// Write a chunk at a specific index, then persist the updated bitmap.
    ///
    /// Supports out-of-order writes so parallel or retried downloads commit
    /// chunks in whatever order they arrive.
    ///
    /// # Errors
    ///
    /// Returns an error if the chunk index is invalid or writing fails.
    pub fn write_chunk(&mut self, chunk_index: u64, data: &[u8]) -> io::Result<()> {
        if chunk_index >= self.total_chunks {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "chunk index out of bounds",
            ));
        }

        let offset = chunk_index * self.chunk_size as u64;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;

        self.received_chunks.insert(chunk_index);
        self.persist_bitmap()
    }

    fn persist_bitmap(&self) -> io::Result<()> {
        let mut bitmap = vec![0u8; self.total_chunks as usize];
        for &idx in &self.received_chunks {
            bitmap[idx as usize] = 1;
        }
        std::fs::write(bitmap_path(&self.part_path), bitmap)
    }

    /// Whether a specific chunk has already been received.
    #[must_use]
    pub fn has_chunk(&self, chunk_index: u64) -> bool {
        self.received_chunks.contains(&chunk_index)
    }

    /// Missing chunk indices, in ascending order.
    #[must_use]
    pub fn missing_chunks(&self) -> Vec<u64> {
        (0..self.total_chunks)
            .filter(|i| !self.received_chunks.contains(i))
            .collect()
    }

    /// Number of chunks received so far.
    #[must_use]
    pub fn received_count(&self) -> u64 {
        self.received_chunks.len() as u64
    }

    /// Bytes transferred so far (chunks received times chunk size, capped
    /// to the true file size for the final chunk).
    #[must_use]
    pub fn bytes_transferred(&self) -> u64 {
        if self.is_complete() {
            return self.total_size;
        }
        self.received_chunks.len() as u64 * self.chunk_size as u64
    }

    /// Progress in `[0.0, 1.0]`.
    #[must_use]
    pub fn progress(&self) -> f64 {
        self.received_chunks.len() as f64 / self.total_chunks as f64
    }

    /// Whether every chunk has been received.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.received_chunks.len() as u64 == self.total_chunks
    }

    /// Flush the file to disk.
    ///
    /// # Errors
    ///
    /// Returns an error if syncing fails.
    pub fn sync(&mut self) -> io::Result<()> {
        self.file.sync_all()
    }

    /// Finalize the transfer: sync to disk and remove the bitmap sidecar.
    /// The caller is responsible for the atomic rename from `.part` to the
    /// final file name.
    ///
    /// # Errors
    ///
    /// Returns an error if not all chunks are received or syncing fails.
    pub fn finalize(mut self) -> io::Result<()> {
        if !self.is_complete() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "transfer incomplete: {}/{} chunks received",
                    self.received_count(),
                    self.total_chunks
                ),
            ));
        }

        self.sync()?;
        let _ = std::fs::remove_file(bitmap_path(&self.part_path));
        Ok(())
    }

    /// Remove the `.part` file and its bitmap sidecar, as required on
    /// cancellation.
    ///
    /// # Errors
    ///
    /// Returns an error if removing the `.part` file fails. A missing
    /// bitmap sidecar is not an error.
    pub fn discard(self) -> io::Result<()> {
        let part_path = self.part_path.clone();
        drop(self);
        std::fs::remove_file(&part_path)?;
        let _ = std::fs::remove_file(bitmap_path(&part_path));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_chunking_roundtrip() {
        let mut temp_file = NamedTempFile::new().unwrap();
        let data = vec![0xAA; 1024 * 1024];
        temp_file.write_all(&data).unwrap();
        temp_file.flush().unwrap();

        let mut chunker = FileChunker::new(temp_file.path(), DEFAULT_CHUNK_SIZE).unwrap();
        assert_eq!(chunker.num_chunks(), 4);

        let mut chunks = Vec::new();
        while let Some(chunk) = chunker.read_chunk().unwrap() {
            chunks.push(chunk);
        }
        assert_eq!(chunks.len(), 4);

        let output_file = NamedTempFile::new().unwrap();
        let mut reassembler =
            FileReassembler::new(output_file.path(), data.len() as u64, DEFAULT_CHUNK_SIZE)
                .unwrap();

        for (i, chunk) in chunks.iter().enumerate() {
            reassembler.write_chunk(i as u64, chunk).unwrap();
        }

        assert!(reassembler.is_complete());
        assert_eq!(reassembler.progress(), 1.0);
        reassembler.finalize().unwrap();

        let reconstructed = std::fs::read(output_file.path()).unwrap();
        assert_eq!(reconstructed, data);
    }

    #[test]
    fn test_seek_to_chunk() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(&vec![0u8; 1024 * 1024]).unwrap();
        temp_file.flush().unwrap();

        let mut chunker = FileChunker::new(temp_file.path(), DEFAULT_CHUNK_SIZE).unwrap();
        chunker.seek_to_chunk(2).unwrap();
        let chunk = chunker.read_chunk().unwrap().unwrap();

        assert_eq!(chunk.len(), DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn test_out_of_order_reassembly() {
        let mut temp_file = NamedTempFile::new().unwrap();
        let data = vec![0xBB; 512 * 1024];
        temp_file.write_all(&data).unwrap();
        temp_file.flush().unwrap();

        let mut chunker = FileChunker::new(temp_file.path(), DEFAULT_CHUNK_SIZE).unwrap();
        let mut chunks = Vec::new();
        while let Some(chunk) = chunker.read_chunk().unwrap() {
            chunks.push(chunk);
        }

        let output_file = NamedTempFile::new().unwrap();
        let mut reassembler =
            FileReassembler::new(output_file.path(), data.len() as u64, DEFAULT_CHUNK_SIZE)
                .unwrap();

        reassembler.write_chunk(1, &chunks[1]).unwrap();
        reassembler.write_chunk(0, &chunks[0]).unwrap();

        assert!(reassembler.is_complete());
        reassembler.finalize().unwrap();

        let reconstructed = std::fs::read(output_file.path()).unwrap();
        assert_eq!(reconstructed, data);
    }

    #[test]
    fn test_missing_chunks() {
        let output_file = NamedTempFile::new().unwrap();
        let mut reassembler = FileReassembler::new(
            output_file.path(),
            10 * DEFAULT_CHUNK_SIZE as u64,
            DEFAULT_CHUNK_SIZE,
        )
        .unwrap();

        reassembler
            .write_chunk(0, &vec![0u8; DEFAULT_CHUNK_SIZE])
            .unwrap();
        reassembler
            .write_chunk(2, &vec![0u8; DEFAULT_CHUNK_SIZE])
            .unwrap();
        reassembler
            .write_chunk(5, &vec![0u8; DEFAULT_CHUNK_SIZE])
            .unwrap();

        let missing = reassembler.missing_chunks();
        assert_eq!(missing.len(), 7);
        assert!(missing.contains(&1));
        assert!(!missing.contains(&0));
        assert!(!missing.contains(&2));
    }

    #[test]
    fn test_incomplete_finalize_fails() {
        let output_file = NamedTempFile::new().unwrap();
        let reassembler = FileReassembler::new(
            output_file.path(),
            10 * DEFAULT_CHUNK_SIZE as u64,
            DEFAULT_CHUNK_SIZE,
        )
        .unwrap();

        assert!(reassembler.finalize().is_err());
    }

    #[test]
    fn test_resume_after_restart() {
        let dir = tempfile::tempdir().unwrap();
        let part_path = dir.path().join("notes.txt.part");
        let total_size = 3 * DEFAULT_CHUNK_SIZE as u64;

        {
            let mut reassembler =
                FileReassembler::new(&part_path, total_size, DEFAULT_CHUNK_SIZE).unwrap();
            reassembler
                .write_chunk(0, &vec![0xAAu8; DEFAULT_CHUNK_SIZE])
                .unwrap();
            // simulate the process dying here: reassembler is dropped without finalize
        }

        let resumed =
            FileReassembler::resume(&part_path, total_size, DEFAULT_CHUNK_SIZE).unwrap();
        assert!(resumed.has_chunk(0));
        assert_eq!(resumed.missing_chunks(), vec![1, 2]);
    }

    #[test]
    fn test_resume_with_no_bitmap_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let part_path = dir.path().join("orphan.part");
        let total_size = 2 * DEFAULT_CHUNK_SIZE as u64;

        std::fs::write(&part_path, vec![0u8; total_size as usize]).unwrap();

        let resumed =
            FileReassembler::resume(&part_path, total_size, DEFAULT_CHUNK_SIZE).unwrap();
        assert_eq!(resumed.received_count(), 0);
    }
}
