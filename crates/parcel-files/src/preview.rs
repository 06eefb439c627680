//! Preview generation: thumbnails, text snippets and archive listings.
//!
//! This module only produces preview *bytes* and their digests. Wrapping
//! the result into a signed manifest is the caller's job — that needs the
//! owning peer's signing key and identity, which this crate does not know
//! about.

use crate::FilesError;
use std::io::Read;
use std::path::Path;

/// Maximum file size a preview is generated for at all. Larger files get
/// `MetadataOnly`.
pub const DEFAULT_MAX_PREVIEW_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Default thumbnail bounding box (width and height).
pub const DEFAULT_THUMBNAIL_SIZE: u32 = 200;

/// Default text snippet line cap.
pub const DEFAULT_TEXT_MAX_LINES: usize = 10;

/// Default text snippet character cap.
pub const DEFAULT_TEXT_MAX_CHARS: usize = 500;

/// Kind of preview available for a shared file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PreviewKind {
    /// Downscaled JPEG thumbnail.
    Thumbnail,
    /// Leading lines of a text file.
    TextSnippet,
    /// Entry listing of a zip-family archive.
    ArchiveListing,
    /// No content preview is available, only size/name/mime metadata.
    MetadataOnly,
}

/// One generated, unsigned preview artifact.
#[derive(Debug, Clone)]
pub struct GeneratedPreview {
    /// Which kind of preview this is.
    pub kind: PreviewKind,
    /// Preview payload bytes (empty for `MetadataOnly`).
    pub data: Vec<u8>,
    /// BLAKE3 digest of `data`.
    pub data_hash: [u8; 32],
    /// Format label (`"jpeg"`, `"utf8"`, `"zip-listing"`, or empty).
    pub format: &'static str,
    /// Thumbnail dimensions, if `kind == Thumbnail`.
    pub dims: Option<(u32, u32)>,
}

fn is_image_mime(mime_type: &str) -> bool {
    mime_type.starts_with("image/")
}

fn is_text_mime(mime_type: &str) -> bool {
    mime_type.starts_with("text/") || mime_type == "application/json"
}

fn is_archive_mime(mime_type: &str) -> bool {
    matches!(
        mime_type,
        "application/zip" | "application/x-zip-compressed"
    )
}

/// Generate the appropriate preview for a shared file, following the size
/// and MIME gating rules: files over `max_file_size` only ever get
/// `MetadataOnly`, regardless of type.
///
/// # Errors
///
/// Returns [`FilesError::Io`] if the source file cannot be read, or
/// [`FilesError::Preview`] if image/archive decoding fails for a file whose
/// MIME type claimed it should succeed.
pub fn generate(
    path: &Path,
    file_size: u64,
    mime_type: &str,
    max_file_size: u64,
    thumbnail_size: u32,
    text_max_lines: usize,
    text_max_chars: usize,
) -> Result<GeneratedPreview, FilesError> {
    if file_size > max_file_size {
        return Ok(metadata_only());
    }

    if is_image_mime(mime_type) {
        return generate_thumbnail(path, thumbnail_size);
    }

    if is_text_mime(mime_type) {
        return generate_text_snippet(path, text_max_lines, text_max_chars);
    }

    if is_archive_mime(mime_type) {
        return generate_archive_listing(path);
    }

    Ok(metadata_only())
}

fn metadata_only() -> GeneratedPreview {
    GeneratedPreview {
        kind: PreviewKind::MetadataOnly,
        data: Vec::new(),
        data_hash: parcel_crypto::hash::hash(&[]),
        format: "",
        dims: None,
    }
}

fn generate_thumbnail(path: &Path, max_dim: u32) -> Result<GeneratedPreview, FilesError> {
    let img = image::ImageReader::open(path)
        .map_err(|e| FilesError::Preview(e.to_string()))?
        .with_guessed_format()
        .map_err(|e| FilesError::Preview(e.to_string()))?
        .decode()
        .map_err(|e| FilesError::Preview(e.to_string()))?;

    let thumbnail = img.thumbnail(max_dim, max_dim);
    let (w, h) = (thumbnail.width(), thumbnail.height());

    let mut data = Vec::new();
    thumbnail
        .write_to(
            &mut std::io::Cursor::new(&mut data),
            image::ImageFormat::Jpeg,
        )
        .map_err(|e| FilesError::Preview(e.to_string()))?;

    let data_hash = parcel_crypto::hash::hash(&data);

    Ok(GeneratedPreview {
        kind: PreviewKind::Thumbnail,
        data,
        data_hash,
        format: "jpeg",
        dims: Some((w, h)),
    })
}

fn generate_text_snippet(
    path: &Path,
    max_lines: usize,
    max_chars: usize,
) -> Result<GeneratedPreview, FilesError> {
    let contents = std::fs::read_to_string(path)?;

    let mut snippet = String::new();
    for (count, line) in contents.lines().enumerate() {
        if count >= max_lines {
            break;
        }
        if snippet.chars().count() + line.chars().count() > max_chars {
            let remaining = max_chars.saturating_sub(snippet.chars().count());
            snippet.extend(line.chars().take(remaining));
            break;
        }
        if count > 0 {
            snippet.push('\n');
        }
        snippet.push_str(line);
    }
    snippet.truncate(
        snippet
            .char_indices()
            .take(max_chars)
            .last()
            .map_or(0, |(i, c)| i + c.len_utf8()),
    );

    let data = snippet.into_bytes();
    let data_hash = parcel_crypto::hash::hash(&data);

    Ok(GeneratedPreview {
        kind: PreviewKind::TextSnippet,
        data,
        data_hash,
        format: "utf8",
        dims: None,
    })
}

/// One entry in an archive listing preview.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ArchiveEntry {
    /// Entry path within the archive.
    pub name: String,
    /// Uncompressed size in bytes.
    pub size: u64,
    /// Whether the entry is a directory.
    pub is_directory: bool,
}

/// The full payload of an archive listing preview: every entry, plus the
/// sum of their uncompressed sizes (an archive's on-disk size is the sum of
/// compressed entries, which tells a viewer nothing about how much space
/// extracting it would actually take).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ArchiveListing {
    /// Entries in declaration order.
    pub entries: Vec<ArchiveEntry>,
    /// Sum of `entries[..].size`.
    pub total_uncompressed_size: u64,
}

fn generate_archive_listing(path: &Path) -> Result<GeneratedPreview, FilesError> {
    let file = std::fs::File::open(path)?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| FilesError::Preview(e.to_string()))?;

    let mut entries = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let entry = archive
            .by_index(i)
            .map_err(|e| FilesError::Preview(e.to_string()))?;
        entries.push(ArchiveEntry {
            name: entry.name().to_string(),
            size: entry.size(),
            is_directory: entry.is_dir(),
        });
    }

    let total_uncompressed_size = entries.iter().map(|e| e.size).sum();
    let listing = ArchiveListing { entries, total_uncompressed_size };
    let data = bincode::serialize(&listing).map_err(|e| FilesError::Preview(e.to_string()))?;
    let data_hash = parcel_crypto::hash::hash(&data);

    Ok(GeneratedPreview {
        kind: PreviewKind::ArchiveListing,
        data,
        data_hash,
        format: "zip-listing",
        dims: None,
    })
}

/// Read a capped prefix of `path`'s contents (used for cache warm-up
/// bounds-checking in callers, not a preview type itself).
pub fn read_prefix(path: &Path, max_bytes: usize) -> std::io::Result<Vec<u8>> {
    let mut file = std::fs::File::open(path)?;
    let mut buf = vec![0u8; max_bytes];
    let n = file.read(&mut buf)?;
    buf.truncate(n);
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn oversized_file_is_metadata_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("huge.bin");
        std::fs::write(&path, b"irrelevant").unwrap();

        let preview = generate(
            &path,
            200 * 1024 * 1024,
            "image/png",
            DEFAULT_MAX_PREVIEW_FILE_SIZE,
            DEFAULT_THUMBNAIL_SIZE,
            DEFAULT_TEXT_MAX_LINES,
            DEFAULT_TEXT_MAX_CHARS,
        )
        .unwrap();

        assert_eq!(preview.kind, PreviewKind::MetadataOnly);
    }

    #[test]
    fn text_snippet_respects_line_cap() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        let mut file = std::fs::File::create(&path).unwrap();
        for i in 0..20 {
            writeln!(file, "line {i}").unwrap();
        }

        let preview = generate(
            &path,
            std::fs::metadata(&path).unwrap().len(),
            "text/plain",
            DEFAULT_MAX_PREVIEW_FILE_SIZE,
            DEFAULT_THUMBNAIL_SIZE,
            3,
            DEFAULT_TEXT_MAX_CHARS,
        )
        .unwrap();

        assert_eq!(preview.kind, PreviewKind::TextSnippet);
        let text = String::from_utf8(preview.data).unwrap();
        assert_eq!(text.lines().count(), 3);
    }

    #[test]
    fn text_snippet_respects_char_cap() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("long_line.txt");
        std::fs::write(&path, "x".repeat(1000)).unwrap();

        let preview = generate(
            &path,
            1000,
            "text/plain",
            DEFAULT_MAX_PREVIEW_FILE_SIZE,
            DEFAULT_THUMBNAIL_SIZE,
            DEFAULT_TEXT_MAX_LINES,
            50,
        )
        .unwrap();

        assert!(preview.data.len() <= 50);
    }

    #[test]
    fn unknown_mime_is_metadata_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("binary.dat");
        std::fs::write(&path, [0u8, 1, 2, 3]).unwrap();

        let preview = generate(
            &path,
            4,
            "application/octet-stream",
            DEFAULT_MAX_PREVIEW_FILE_SIZE,
            DEFAULT_THUMBNAIL_SIZE,
            DEFAULT_TEXT_MAX_LINES,
            DEFAULT_TEXT_MAX_CHARS,
        )
        .unwrap();

        assert_eq!(preview.kind, PreviewKind::MetadataOnly);
    }

    #[test]
    fn archive_listing_reads_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bundle.zip");
        let file = std::fs::File::create(&path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        writer
            .start_file::<_, ()>("readme.txt", zip::write::FileOptions::default())
            .unwrap();
        writer.write_all(b"hello").unwrap();
        writer.finish().unwrap();

        let preview = generate_archive_listing(&path).unwrap();
        assert_eq!(preview.kind, PreviewKind::ArchiveListing);

        let listing: ArchiveListing = bincode::deserialize(&preview.data).unwrap();
        assert_eq!(listing.entries.len(), 1);
        assert_eq!(listing.entries[0].name, "readme.txt");
        assert_eq!(listing.total_uncompressed_size, 5);
    }

    #[test]
    fn archive_listing_sums_uncompressed_size_across_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bundle.zip");
        let file = std::fs::File::create(&path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        writer
            .start_file::<_, ()>("a.txt", zip::write::FileOptions::default())
            .unwrap();
        writer.write_all(b"12345").unwrap();
        writer
            .start_file::<_, ()>("b.txt", zip::write::FileOptions::default())
            .unwrap();
        writer.write_all(b"1234567890").unwrap();
        writer.finish().unwrap();

        let preview = generate_archive_listing(&path).unwrap();
        let listing: ArchiveListing = bincode::deserialize(&preview.data).unwrap();
        assert_eq!(listing.entries.len(), 2);
        assert_eq!(listing.total_uncompressed_size, 15);
    }
}
