//! Archive handling utilities.
//!
//! Update packages are zip files, either a single file or split into byte
//! segments. This module provides:
//! - [`SegmentedStream`]: segment files read as one continuous stream
//! - [`ArchiveSource`]: opening either layout as a `ZipArchive`
//! - [`ArchiveExtractor`]: streaming extraction with timestamp restoration

pub mod extract;
pub mod segmented;
pub mod source;

pub use extract::ArchiveExtractor;
pub use segmented::SegmentedStream;
pub use source::{ArchiveReader, ArchiveSource};

use std::io::{Read, Seek};
use std::path::PathBuf;
use zip::ZipArchive;

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Reference to one member of an open archive. Holds no data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub index: usize,
    /// Normalized name, forward slashes
    pub name: String,
    pub compressed_size: u64,
    pub size: u64,
}

/// List all non-directory members.
pub fn list_entries<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
) -> zip::result::ZipResult<Vec<ArchiveEntry>> {
    let mut entries = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let file = archive.by_index_raw(index)?;
        if file.is_dir() {
            continue;
        }
        entries.push(ArchiveEntry {
            index,
            name: crate::paths::normalize_archive_name(file.name()),
            compressed_size: file.compressed_size(),
            size: file.size(),
        });
    }
    Ok(entries)
}
