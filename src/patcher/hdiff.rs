//! Binary delta application.
//!
//! [`DeltaPatcher`] is the seam between the patch engine and the actual delta
//! algorithm. [`HPatchz`] drives the external `hpatchz` tool; it gives no
//! progress output, so progress is inferred by polling the size of the file
//! it is writing.

use super::PatchError;
use crate::progress::ProgressSink;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, trace};

#[cfg(windows)]
const HPATCHZ_BINARY: &str = "hpatchz.exe";
#[cfg(not(windows))]
const HPATCHZ_BINARY: &str = "hpatchz";

/// How often the output file is measured
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Produces `new` from `old` and a delta payload.
pub trait DeltaPatcher: Send + Sync {
    /// Write the patched file to `new`, reporting bytes produced to `sink`.
    ///
    /// `expected_size` is the declared size of the result when known.
    fn apply(
        &self,
        old: &Path,
        diff: &Path,
        new: &Path,
        expected_size: Option<u64>,
        sink: &dyn ProgressSink,
    ) -> Result<(), PatchError>;
}

/// External `hpatchz` process.
#[derive(Debug, Clone)]
pub struct HPatchz {
    tool: PathBuf,
    poll_interval: Duration,
}

impl HPatchz {
    pub fn new(tool: impl Into<PathBuf>) -> Self {
        Self {
            tool: tool.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn tool(&self) -> &Path {
        &self.tool
    }

    /// Find the tool.
    ///
    /// An explicit path may name the binary or the directory holding it.
    /// Without one, PATH and the directory of the running executable are
    /// searched.
    pub fn locate(explicit: Option<&Path>) -> Result<Self, PatchError> {
        if let Some(path) = explicit {
            let candidate = if path.is_dir() {
                path.join(HPATCHZ_BINARY)
            } else {
                path.to_path_buf()
            };
            if candidate.is_file() {
                return Ok(Self::new(candidate));
            }
            return Err(PatchError::ToolNotFound(candidate));
        }

        let candidates = [
            which::which(HPATCHZ_BINARY).ok(),
            std::env::current_exe()
                .ok()
                .and_then(|p| p.parent().map(|d| d.join(HPATCHZ_BINARY))),
        ];
        for candidate in candidates.into_iter().flatten() {
            if candidate.is_file() {
                info!("Found {} at {}", HPATCHZ_BINARY, candidate.display());
                return Ok(Self::new(candidate));
            }
        }
        Err(PatchError::ToolNotFound(PathBuf::from(HPATCHZ_BINARY)))
    }
}

/// Drain a child pipe on its own thread so the child never blocks on a full pipe.
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    })
}

fn current_size(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

impl DeltaPatcher for HPatchz {
    fn apply(
        &self,
        old: &Path,
        diff: &Path,
        new: &Path,
        expected_size: Option<u64>,
        sink: &dyn ProgressSink,
    ) -> Result<(), PatchError> {
        debug!(
            "Running {} {} {} {}",
            self.tool.display(),
            old.display(),
            diff.display(),
            new.display()
        );
        let mut child = Command::new(&self.tool)
            .arg(old)
            .arg(diff)
            .arg(new)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| PatchError::Spawn {
                tool: self.tool.clone(),
                source,
            })?;
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let wait_err = |source| PatchError::Spawn {
            tool: self.tool.clone(),
            source,
        };

        let mut reported = 0u64;
        let status: ExitStatus = loop {
            let size = current_size(new);
            if size > reported {
                sink.report(size - reported);
                reported = size;
            }

            if let Some(expected) = expected_size {
                if reported >= expected {
                    trace!("{} reached {} bytes, waiting for exit", new.display(), expected);
                    break child.wait().map_err(wait_err)?;
                }
            }
            if let Some(status) = child.try_wait().map_err(wait_err)? {
                break status;
            }
            trace!("{} at {} bytes", new.display(), size);
            thread::sleep(self.poll_interval);
        };

        let size = current_size(new);
        if size > reported {
            sink.report(size - reported);
        }

        let stdout = stdout.join().unwrap_or_default();
        let stderr = stderr.join().unwrap_or_default();
        if !status.success() || !stderr.is_empty() {
            return Err(PatchError::PatchApply {
                tool: self.tool.clone(),
                old: old.to_path_buf(),
                diff: diff.to_path_buf(),
                new: new.to_path_buf(),
                code: status.code(),
                output: format!(
                    "stdout: {}\nstderr: {}",
                    String::from_utf8_lossy(&stdout).trim_end(),
                    String::from_utf8_lossy(&stderr).trim_end()
                ),
            });
        }
        Ok(())
    }
}
