//! Where an update archive lives on disk.

use super::segmented::SegmentedStream;
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::PathBuf;
use zip::ZipArchive;

/// A single archive file or an ordered list of byte-split segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveSource {
    Single(PathBuf),
    Segmented(Vec<PathBuf>),
}

impl ArchiveSource {
    /// Single file for one path, segmented otherwise.
    pub fn from_paths(mut paths: Vec<PathBuf>) -> Self {
        if paths.len() == 1 {
            ArchiveSource::Single(paths.remove(0))
        } else {
            ArchiveSource::Segmented(paths)
        }
    }

    pub fn paths(&self) -> &[PathBuf] {
        match self {
            ArchiveSource::Single(path) => std::slice::from_ref(path),
            ArchiveSource::Segmented(paths) => paths,
        }
    }

    pub fn open(&self) -> io::Result<ArchiveReader> {
        match self {
            ArchiveSource::Single(path) => {
                Ok(ArchiveReader::File(BufReader::new(File::open(path)?)))
            }
            ArchiveSource::Segmented(paths) => Ok(ArchiveReader::Segmented(BufReader::new(
                SegmentedStream::open(paths)?,
            ))),
        }
    }

    pub fn open_zip(&self) -> zip::result::ZipResult<ZipArchive<ArchiveReader>> {
        ZipArchive::new(self.open()?)
    }
}

impl fmt::Display for ArchiveSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchiveSource::Single(path) => write!(f, "{}", path.display()),
            ArchiveSource::Segmented(paths) => match paths.as_slice() {
                [] => f.write_str("<no segments>"),
                [only] => write!(f, "{}", only.display()),
                [first, .., last] => write!(
                    f,
                    "{} ... {} ({} segments)",
                    first.display(),
                    last.display(),
                    paths.len()
                ),
            },
        }
    }
}

/// Buffered reader over either kind of source.
pub enum ArchiveReader {
    File(BufReader<File>),
    Segmented(BufReader<SegmentedStream>),
}

impl Read for ArchiveReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            ArchiveReader::File(r) => r.read(buf),
            ArchiveReader::Segmented(r) => r.read(buf),
        }
    }
}

impl Seek for ArchiveReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match self {
            ArchiveReader::File(r) => r.seek(pos),
            ArchiveReader::Segmented(r) => r.seek(pos),
        }
    }
}
