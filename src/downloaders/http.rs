//! HTTP client with range resume, preallocation and unbounded retry

use crate::game::VersionTransition;
use crate::progress::ProgressSink;
use futures::StreamExt;
use reqwest::header::RANGE;
use reqwest::StatusCode;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Connection timeout: time to establish TCP connection
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Read timeout: maximum time to wait for data between chunks
const READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Shared HTTP client
pub struct HttpClient {
    client: reqwest::Client,
}

impl HttpClient {
    pub fn new() -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("gsp/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(CONNECT_TIMEOUT)
            .read_timeout(READ_TIMEOUT)
            .build()?;

        Ok(Self { client })
    }

    /// Get the underlying reqwest client
    pub fn inner(&self) -> &reqwest::Client {
        &self.client
    }
}

/// Delay schedule between whole-attempt retries. The count is unbounded.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based): doubles, then caps.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// One file to fetch. Lives for a single `fetch` call.
#[derive(Clone)]
pub struct DownloadTask {
    pub url: String,
    pub dest: PathBuf,
    pub declared_size: u64,
    pub version: VersionTransition,
    pub progress: Arc<dyn ProgressSink>,
}

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("Download of {url} cancelled")]
    Cancelled { url: String },

    #[error(
        "Content mismatch for {url}: remote length {remote:?} + local {offset} != declared {declared}"
    )]
    ContentMismatch {
        url: String,
        offset: u64,
        remote: Option<u64>,
        declared: u64,
    },

    #[error("HTTP {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Outcome of one failed attempt.
enum AttemptError {
    /// Retried after a backoff
    Transient(String),
    Fatal(DownloadError),
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> AttemptError + '_ {
    move |source| {
        AttemptError::Fatal(DownloadError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

async fn on_disk_size(path: &Path) -> io::Result<u64> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(meta.len()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(e),
    }
}

/// Reserve `size` bytes for `file` without changing its length.
#[cfg(target_os = "linux")]
fn preallocate<F: std::os::unix::io::AsRawFd>(file: &F, size: u64) -> io::Result<()> {
    let len = libc::off_t::try_from(size).map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;
    // SAFETY: the descriptor is owned by `file` and open for writing
    let ret = unsafe { libc::fallocate(file.as_raw_fd(), libc::FALLOC_FL_KEEP_SIZE, 0, len) };
    if ret == 0 {
        return Ok(());
    }
    let err = io::Error::last_os_error();
    match err.raw_os_error() {
        Some(libc::EOPNOTSUPP) | Some(libc::ENOSYS) => {
            debug!("Preallocation not supported here: {}", err);
            Ok(())
        }
        _ => Err(err),
    }
}

#[cfg(not(target_os = "linux"))]
fn preallocate<F>(_file: &F, _size: u64) -> io::Result<()> {
    Ok(())
}

/// Downloads one URL to one path, resuming from whatever is on disk.
pub struct ResumableDownloader {
    client: reqwest::Client,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl ResumableDownloader {
    pub fn new(client: &HttpClient, cancel: CancellationToken) -> Self {
        Self {
            client: client.inner().clone(),
            retry: RetryPolicy::default(),
            cancel,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Fetch `task.url` into `task.dest`.
    ///
    /// A destination already at (or past) the declared size is treated as
    /// complete and no request is made.
    pub async fn fetch(&self, task: &DownloadTask) -> Result<PathBuf, DownloadError> {
        if let Some(parent) = task.dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| DownloadError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        let existing = on_disk_size(&task.dest)
            .await
            .map_err(|source| DownloadError::Io {
                path: task.dest.clone(),
                source,
            })?;
        info!(
            "Downloading file {} from {} size {}/{}",
            task.dest.display(),
            task.url,
            existing,
            task.declared_size
        );

        if existing > 0 {
            task.progress.report(existing);
        }
        if existing >= task.declared_size {
            info!(
                "File {} has already been downloaded in full size {}",
                task.dest.display(),
                existing
            );
            return Ok(task.dest.clone());
        }

        let mut attempt = 0u32;
        loop {
            if self.cancel.is_cancelled() {
                return Err(DownloadError::Cancelled { url: task.url.clone() });
            }

            match self.attempt(task).await {
                Ok(()) => return Ok(task.dest.clone()),
                Err(AttemptError::Fatal(e)) => return Err(e),
                Err(AttemptError::Transient(reason)) => {
                    let delay = self.retry.delay(attempt);
                    attempt += 1;
                    warn!(
                        "Download of {} failed (attempt {}), retrying in {:?}: {}",
                        task.url, attempt, delay, reason
                    );
                    tokio::select! {
                        _ = self.cancel.cancelled() => {
                            return Err(DownloadError::Cancelled { url: task.url.clone() });
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn attempt(&self, task: &DownloadTask) -> Result<(), AttemptError> {
        let declared = task.declared_size;
        let offset = on_disk_size(&task.dest).await.map_err(io_error(&task.dest))?;
        if offset >= declared {
            return Ok(());
        }

        let mut request = self.client.get(&task.url);
        if offset > 0 {
            request = request.header(RANGE, format!("bytes={}-{}", offset, declared - 1));
        }

        let response = request
            .send()
            .await
            .map_err(|e| AttemptError::Transient(e.to_string()))?;

        let status = response.status();
        if status.is_server_error()
            || status == StatusCode::TOO_MANY_REQUESTS
            || status == StatusCode::REQUEST_TIMEOUT
        {
            return Err(AttemptError::Transient(format!("HTTP {}", status.as_u16())));
        }
        if !status.is_success() {
            return Err(AttemptError::Fatal(DownloadError::Status {
                url: task.url.clone(),
                status: status.as_u16(),
            }));
        }

        let remote = response.content_length();
        if remote.map(|len| len + offset) != Some(declared) {
            return Err(AttemptError::Fatal(DownloadError::ContentMismatch {
                url: task.url.clone(),
                offset,
                remote,
                declared,
            }));
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&task.dest)
            .await
            .map_err(io_error(&task.dest))?;
        preallocate(&file, declared).map_err(io_error(&task.dest))?;

        let mut written = offset;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    // The next attempt resumes from the on-disk length
                    file.flush().await.map_err(io_error(&task.dest))?;
                    return Err(AttemptError::Transient(e.to_string()));
                }
            };
            let len = chunk.len() as u64;
            if written + len > declared {
                return Err(AttemptError::Fatal(DownloadError::ContentMismatch {
                    url: task.url.clone(),
                    offset,
                    remote: Some(written + len - offset),
                    declared,
                }));
            }
            file.write_all(&chunk).await.map_err(io_error(&task.dest))?;
            written += len;
            task.progress.report(len);
        }
        file.flush().await.map_err(io_error(&task.dest))?;

        if written < declared {
            return Err(AttemptError::Transient(format!(
                "connection closed at {}/{} bytes",
                written, declared
            )));
        }
        debug!("Finished {} ({} bytes)", task.dest.display(), written);
        Ok(())
    }
}
