//! Extract zip entries under an installation root.
//!
//! Entries are streamed through a fixed buffer with every written chunk
//! reported, then given back the timestamps recorded in the archive.

use super::{ArchiveEntry, ArchiveError};
use crate::paths;
use crate::progress::ProgressSink;
use chrono::{Local, NaiveDate, TimeZone};
use std::fs::{File, FileTimes};
use std::io::{self, BufWriter, Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::trace;
use zip::ZipArchive;

const BUFFER_SIZE: usize = 1024 * 1024;

/// NTFS extra field header id
const NTFS_EXTRA_ID: u16 = 0x000A;
/// Attribute holding mtime/atime/ctime
const NTFS_TIMES_TAG: u16 = 0x0001;
const NTFS_TIMES_LEN: usize = 24;
/// 100ns intervals between 1601-01-01 and 1970-01-01
const FILETIME_UNIX_OFFSET: u64 = 116_444_736_000_000_000;

/// Timestamps to restore on an extracted file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryTimes {
    pub modified: SystemTime,
    pub accessed: SystemTime,
    pub created: Option<SystemTime>,
}

impl EntryTimes {
    pub fn apply(&self, file: &File) -> io::Result<()> {
        #[allow(unused_mut)]
        let mut times = FileTimes::new()
            .set_modified(self.modified)
            .set_accessed(self.accessed);
        #[cfg(windows)]
        if let Some(created) = self.created {
            use std::os::windows::fs::FileTimesExt;
            times = times.set_created(created);
        }
        file.set_times(times)
    }

    /// Read the current times of a file on disk.
    pub fn of_file(path: &Path) -> io::Result<Self> {
        let meta = std::fs::metadata(path)?;
        Ok(Self {
            modified: meta.modified()?,
            accessed: meta.accessed()?,
            created: meta.created().ok(),
        })
    }
}

fn filetime_to_system(ft: u64) -> SystemTime {
    let to_duration = |ticks: u64| Duration::new(ticks / 10_000_000, ((ticks % 10_000_000) * 100) as u32);
    if ft >= FILETIME_UNIX_OFFSET {
        UNIX_EPOCH + to_duration(ft - FILETIME_UNIX_OFFSET)
    } else {
        UNIX_EPOCH - to_duration(FILETIME_UNIX_OFFSET - ft)
    }
}

/// Parse the NTFS timestamps out of a raw extra field block.
pub fn ntfs_times(extra: &[u8]) -> Option<EntryTimes> {
    let u16_at = |buf: &[u8], at: usize| -> Option<u16> {
        buf.get(at..at + 2).map(|b| u16::from_le_bytes([b[0], b[1]]))
    };
    let u64_at = |buf: &[u8], at: usize| -> Option<u64> {
        let b: [u8; 8] = buf.get(at..at + 8)?.try_into().ok()?;
        Some(u64::from_le_bytes(b))
    };

    let mut pos = 0;
    while pos + 4 <= extra.len() {
        let id = u16_at(extra, pos)?;
        let size = u16_at(extra, pos + 2)? as usize;
        let body = extra.get(pos + 4..pos + 4 + size)?;
        pos += 4 + size;
        if id != NTFS_EXTRA_ID {
            continue;
        }

        // 4 reserved bytes, then tagged attributes
        let mut attr = 4;
        while attr + 4 <= body.len() {
            let tag = u16_at(body, attr)?;
            let len = u16_at(body, attr + 2)? as usize;
            let data = body.get(attr + 4..attr + 4 + len)?;
            attr += 4 + len;
            if tag == NTFS_TIMES_TAG && len == NTFS_TIMES_LEN {
                return Some(EntryTimes {
                    modified: filetime_to_system(u64_at(data, 0)?),
                    accessed: filetime_to_system(u64_at(data, 8)?),
                    created: Some(filetime_to_system(u64_at(data, 16)?)),
                });
            }
        }
    }
    None
}

/// DOS timestamp interpreted as local time; access time equals modify time.
pub fn dos_times(dt: zip::DateTime) -> Option<EntryTimes> {
    let naive = NaiveDate::from_ymd_opt(dt.year() as i32, dt.month() as u32, dt.day() as u32)?
        .and_hms_opt(dt.hour() as u32, dt.minute() as u32, dt.second() as u32)?;
    let local = Local.from_local_datetime(&naive).earliest()?;
    let modified = SystemTime::from(local);
    Some(EntryTimes {
        modified,
        accessed: modified,
        created: None,
    })
}

/// Extracts entries of one open archive.
pub struct ArchiveExtractor<'a, R> {
    archive: &'a mut ZipArchive<R>,
    buffer: Vec<u8>,
}

impl<'a, R: Read + Seek> ArchiveExtractor<'a, R> {
    pub fn new(archive: &'a mut ZipArchive<R>) -> Self {
        Self {
            archive,
            buffer: vec![0u8; BUFFER_SIZE],
        }
    }

    /// Extract `entry` to `root/<sanitised name>`, returning the written path.
    pub fn extract(
        &mut self,
        entry: &ArchiveEntry,
        root: &Path,
        sink: &dyn ProgressSink,
    ) -> Result<PathBuf, ArchiveError> {
        let dest = paths::join_relative(root, &entry.name);
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| ArchiveError::Io { path, source }
        };

        let mut file = self.archive.by_index(entry.index)?;
        let times = file
            .extra_data()
            .and_then(ntfs_times)
            .or_else(|| file.last_modified().and_then(dos_times));

        paths::ensure_parent_dirs(&dest).map_err(io_err(&dest))?;
        let out = File::create(&dest).map_err(io_err(&dest))?;
        let mut writer = BufWriter::with_capacity(BUFFER_SIZE, out);

        loop {
            let n = file.read(&mut self.buffer).map_err(io_err(&dest))?;
            if n == 0 {
                break;
            }
            writer.write_all(&self.buffer[..n]).map_err(io_err(&dest))?;
            sink.report(n as u64);
        }

        let out = writer
            .into_inner()
            .map_err(|e| ArchiveError::Io {
                path: dest.clone(),
                source: e.into_error(),
            })?;
        if let Some(times) = times {
            times.apply(&out).map_err(io_err(&dest))?;
        }
        trace!("Extracted {} -> {}", entry.name, dest.display());
        Ok(dest)
    }
}
