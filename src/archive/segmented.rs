//! Several on-disk segment files presented as one seekable stream.
//!
//! Full game packages are published as `game.zip.001`, `game.zip.002`, ...
//! which are plain byte-level splits of a single zip file. Rather than
//! concatenating them on disk, [`SegmentedStream`] maps the logical range
//! `[0, total)` onto the segments and reads across boundaries on demand.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

#[derive(Debug)]
struct Segment {
    path: PathBuf,
    file: File,
    /// Logical offset of the first byte
    start: u64,
    len: u64,
}

/// Read + Seek over an ordered list of files.
#[derive(Debug)]
pub struct SegmentedStream {
    segments: Vec<Segment>,
    total: u64,
    pos: u64,
}

impl SegmentedStream {
    /// Open every segment up front; a missing one fails here, not mid-read.
    pub fn open<P: AsRef<Path>>(paths: &[P]) -> io::Result<Self> {
        if paths.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "segmented stream needs at least one segment",
            ));
        }

        let mut segments = Vec::with_capacity(paths.len());
        let mut start = 0u64;
        for path in paths {
            let path = path.as_ref();
            let file = File::open(path).map_err(|e| {
                io::Error::new(e.kind(), format!("segment {}: {}", path.display(), e))
            })?;
            let len = file.metadata()?.len();
            segments.push(Segment {
                path: path.to_path_buf(),
                file,
                start,
                len,
            });
            start += len;
        }

        Ok(Self {
            segments,
            total: start,
            pos: 0,
        })
    }

    /// Total logical length.
    pub fn len(&self) -> u64 {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.segments.iter().map(|s| s.path.as_path())
    }

    /// Index of the segment holding logical offset `pos` (`pos < total`).
    fn segment_at(&self, pos: u64) -> usize {
        // First segment whose end is past pos; zero-length segments are skipped
        self.segments
            .partition_point(|s| s.start + s.len <= pos)
    }
}

impl Read for SegmentedStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() || self.pos >= self.total {
            return Ok(0);
        }

        let idx = self.segment_at(self.pos);
        let segment = &mut self.segments[idx];
        let offset = self.pos - segment.start;
        let available = (segment.len - offset).min(buf.len() as u64) as usize;

        segment.file.seek(SeekFrom::Start(offset))?;
        let n = segment.file.read(&mut buf[..available])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("segment {} shrank while reading", segment.path.display()),
            ));
        }
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for SegmentedStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
            SeekFrom::End(delta) => self.total.checked_add_signed(delta),
        };

        match target {
            Some(target) => {
                self.pos = target;
                Ok(target)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "invalid seek to a negative or overflowing position",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use tempfile::TempDir;

    /// Segments of the given sizes whose bytes are `offset % 251`.
    fn make_segments(dir: &TempDir, sizes: &[usize]) -> Result<(Vec<PathBuf>, Vec<u8>)> {
        let mut all = Vec::new();
        let mut paths = Vec::new();
        for (i, size) in sizes.iter().enumerate() {
            let data: Vec<u8> = (all.len()..all.len() + size).map(|b| (b % 251) as u8).collect();
            let path = dir.path().join(format!("game.zip.{:03}", i + 1));
            std::fs::write(&path, &data)?;
            all.extend_from_slice(&data);
            paths.push(path);
        }
        Ok((paths, all))
    }

    #[test]
    fn test_read_across_boundaries() -> Result<()> {
        let dir = TempDir::new()?;
        let (paths, all) = make_segments(&dir, &[100, 50, 75])?;
        let mut stream = SegmentedStream::open(&paths)?;
        assert_eq!(stream.len(), 225);

        stream.seek(SeekFrom::Start(90))?;
        let mut buf = vec![0u8; 70];
        stream.read_exact(&mut buf)?;
        assert_eq!(buf, &all[90..160]);
        Ok(())
    }

    #[test]
    fn test_read_at_end_is_eof() -> Result<()> {
        let dir = TempDir::new()?;
        let (paths, _) = make_segments(&dir, &[100, 50, 75])?;
        let mut stream = SegmentedStream::open(&paths)?;

        assert_eq!(stream.seek(SeekFrom::Start(225))?, 225);
        let mut buf = [0u8; 16];
        assert_eq!(stream.read(&mut buf)?, 0);

        stream.seek(SeekFrom::Start(1000))?;
        assert_eq!(stream.read(&mut buf)?, 0);
        Ok(())
    }

    #[test]
    fn test_read_whole_stream() -> Result<()> {
        let dir = TempDir::new()?;
        let (paths, all) = make_segments(&dir, &[10, 0, 7, 3])?;
        let mut stream = SegmentedStream::open(&paths)?;
        let mut out = Vec::new();
        stream.read_to_end(&mut out)?;
        assert_eq!(out, all);
        Ok(())
    }

    #[test]
    fn test_seek_relative_and_from_end() -> Result<()> {
        let dir = TempDir::new()?;
        let (paths, all) = make_segments(&dir, &[100, 50, 75])?;
        let mut stream = SegmentedStream::open(&paths)?;

        assert_eq!(stream.seek(SeekFrom::End(-5))?, 220);
        let mut buf = [0u8; 5];
        stream.read_exact(&mut buf)?;
        assert_eq!(&buf, &all[220..225]);

        assert_eq!(stream.seek(SeekFrom::Current(-125))?, 100);
        assert!(stream.seek(SeekFrom::Current(-101)).is_err());
        Ok(())
    }

    #[test]
    fn test_missing_segment_fails_open() -> Result<()> {
        let dir = TempDir::new()?;
        let (mut paths, _) = make_segments(&dir, &[10])?;
        paths.push(dir.path().join("game.zip.002"));
        assert!(SegmentedStream::open(&paths).is_err());
        assert!(SegmentedStream::open::<PathBuf>(&[]).is_err());
        Ok(())
    }
}
