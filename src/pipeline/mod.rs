//! Download/patch pipeline.
//!
//! One producer task downloads and classifies components in a fixed order and
//! pushes them onto an unbounded queue. One consumer thread pops them and
//! patches the installation, strictly one unit at a time. The producer closes
//! the stream with a single [`QueueItem::EndOfStream`].
//!
//! ```text
//!   producer (tokio task)                  consumer (OS thread)
//!   download -> classify -> send  ==FIFO==> recv -> PatchEngine::apply
//! ```

use crate::archive::ArchiveSource;
use crate::downloaders::{DownloadError, DownloadTask, ResumableDownloader};
use crate::game::catalog::RemotePackage;
use crate::game::{Component, VersionTransition};
use crate::paths;
use crate::patcher::{PatchEngine, PatchError};
use crate::progress::{TaskProgress, TaskState};
use crate::update::{ClassifyError, UpdateUnit};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

/// What travels from producer to consumer.
pub enum QueueItem {
    /// A classified unit to patch
    Unit {
        unit: UpdateUnit,
        progress: Arc<dyn TaskProgress>,
    },
    /// A component excluded from download; only its progress is closed
    Skipped {
        component: Component,
        progress: Arc<dyn TaskProgress>,
    },
    /// No more items will follow
    EndOfStream,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Downloading {component} failed: {source}")]
    Download {
        component: Component,
        #[source]
        source: DownloadError,
    },

    #[error("Update archive for {component} is invalid: {source}")]
    Classify {
        component: Component,
        #[source]
        source: ClassifyError,
    },

    #[error("Patching {component} failed: {source}")]
    Patch {
        component: Component,
        #[source]
        source: PatchError,
    },

    #[error("Producer stopped without finishing the queue")]
    ProducerGone,

    #[error("Consumer stopped before the queue was drained")]
    ConsumerGone,

    #[error("Pipeline worker panicked: {0}")]
    Panicked(String),
}

/// One component and the remote package(s) backing it.
pub struct ComponentJob {
    pub component: Component,
    /// Several entries are byte segments of a single archive
    pub packages: Vec<RemotePackage>,
    pub progress: Arc<dyn TaskProgress>,
}

impl ComponentJob {
    pub fn download_bytes(&self) -> u64 {
        self.packages.iter().map(|p| p.size).sum()
    }
}

/// Counts reported when the pipeline finishes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PipelineReport {
    pub processed: usize,
    pub skipped: usize,
}

/// Download side of the pipeline.
pub struct Producer {
    downloader: Arc<ResumableDownloader>,
    patch_path: PathBuf,
    game_root: PathBuf,
    version: VersionTransition,
    download_exclude: BTreeSet<Component>,
}

impl Producer {
    pub fn new(
        downloader: Arc<ResumableDownloader>,
        patch_path: impl Into<PathBuf>,
        game_root: impl Into<PathBuf>,
        version: VersionTransition,
        download_exclude: BTreeSet<Component>,
    ) -> Self {
        Self {
            downloader,
            patch_path: patch_path.into(),
            game_root: game_root.into(),
            version,
            download_exclude,
        }
    }

    /// Download and classify every job in order.
    ///
    /// With a queue, each result is sent to the consumer followed by
    /// `EndOfStream`. Without one (download-only), progress is closed here.
    pub async fn run(
        self,
        jobs: Vec<ComponentJob>,
        queue: Option<mpsc::UnboundedSender<QueueItem>>,
    ) -> Result<PipelineReport, PipelineError> {
        let mut report = PipelineReport::default();

        for job in jobs {
            let component = job.component;
            job.progress.begin(TaskState::Downloading, job.download_bytes());

            let item = if self.download_exclude.contains(&component) {
                info!("Skipped download of {} ({} packages)", component, job.packages.len());
                job.progress.report(job.download_bytes());
                report.skipped += 1;
                QueueItem::Skipped {
                    component,
                    progress: job.progress,
                }
            } else {
                let unit = self.fetch_unit(&job).await?;
                report.processed += 1;
                QueueItem::Unit {
                    unit,
                    progress: job.progress,
                }
            };

            match (&queue, item) {
                (None, QueueItem::Unit { unit, progress }) => {
                    debug!("No patch queue, {} stays downloaded", unit);
                    progress.finish(TaskState::Downloaded);
                }
                (None, QueueItem::Skipped { progress, .. }) => progress.finish(TaskState::Skipped),
                (Some(tx), QueueItem::Unit { unit, progress }) => {
                    progress.begin(TaskState::PatchWaiting, unit.patch_bytes(&self.game_root));
                    debug!("Enqueuing {}", unit);
                    tx.send(QueueItem::Unit { unit, progress })
                        .map_err(|_| PipelineError::ConsumerGone)?;
                }
                (Some(tx), item) => {
                    tx.send(item).map_err(|_| PipelineError::ConsumerGone)?;
                }
                (None, QueueItem::EndOfStream) => {}
            }
        }

        if let Some(tx) = &queue {
            info!("All downloads finished, closing the patch queue");
            tx.send(QueueItem::EndOfStream)
                .map_err(|_| PipelineError::ConsumerGone)?;
        }
        Ok(report)
    }

    async fn fetch_unit(&self, job: &ComponentJob) -> Result<UpdateUnit, PipelineError> {
        let component = job.component;
        let mut files = Vec::with_capacity(job.packages.len());

        for package in &job.packages {
            let task = DownloadTask {
                url: package.url.clone(),
                dest: self.patch_path.join(paths::file_name(&package.url)),
                declared_size: package.size,
                version: self.version.clone(),
                progress: job.progress.clone(),
            };
            let path = self
                .downloader
                .fetch(&task)
                .await
                .map_err(|source| PipelineError::Download { component, source })?;
            files.push(path);
        }

        let source = ArchiveSource::from_paths(files);
        let version = self.version.clone();
        tokio::task::spawn_blocking(move || UpdateUnit::classify(source, component, version))
            .await
            .map_err(|e| PipelineError::Panicked(e.to_string()))?
            .map_err(|source| PipelineError::Classify { component, source })
    }
}

/// Patch side: pops items until `EndOfStream`.
pub fn consume(
    engine: &PatchEngine,
    queue: &mut mpsc::UnboundedReceiver<QueueItem>,
) -> Result<PipelineReport, PipelineError> {
    let mut report = PipelineReport::default();
    loop {
        match queue.blocking_recv() {
            None => return Err(PipelineError::ProducerGone),
            Some(QueueItem::EndOfStream) => {
                debug!("Consumer received end of stream");
                return Ok(report);
            }
            Some(QueueItem::Skipped { component, progress }) => {
                debug!("Consumer skipping {}", component);
                progress.finish(TaskState::Skipped);
                report.skipped += 1;
            }
            Some(QueueItem::Unit { unit, progress }) => {
                let component = unit.component;
                engine
                    .apply(unit, progress.as_ref())
                    .map_err(|source| PipelineError::Patch { component, source })?;
                progress.finish(TaskState::Patched);
                report.processed += 1;
            }
        }
    }
}

/// Run producer and consumer to completion.
///
/// A consumer failure cancels the producer. A producer failure closes the
/// queue; the consumer then stops and the producer's error is returned.
pub async fn run(
    producer: Producer,
    engine: PatchEngine,
    jobs: Vec<ComponentJob>,
) -> Result<PipelineReport, PipelineError> {
    let cancel = producer.downloader.cancel_token().clone();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let (done_tx, done_rx) = oneshot::channel();

    std::thread::Builder::new()
        .name("gsp-patcher".to_string())
        .spawn(move || {
            let result = consume(&engine, &mut rx);
            let _ = done_tx.send(result);
        })
        .map_err(|e| PipelineError::Panicked(e.to_string()))?;

    let producer = tokio::spawn(producer.run(jobs, Some(tx)));

    let consumed = done_rx
        .await
        .map_err(|_| PipelineError::Panicked("patch thread exited without a result".to_string()))?;

    match consumed {
        Ok(report) => {
            producer
                .await
                .map_err(|e| PipelineError::Panicked(e.to_string()))??;
            Ok(report)
        }
        Err(PipelineError::ProducerGone) => match producer.await {
            Ok(Err(e)) => Err(e),
            Ok(Ok(_)) => Err(PipelineError::ProducerGone),
            Err(e) => Err(PipelineError::Panicked(e.to_string())),
        },
        Err(e) => {
            error!("Patching failed, stopping downloads: {}", e);
            cancel.cancel();
            producer.abort();
            let _ = producer.await;
            Err(e)
        }
    }
}

/// Download (and validate) every job without patching.
pub async fn download_only(
    producer: Producer,
    jobs: Vec<ComponentJob>,
) -> Result<PipelineReport, PipelineError> {
    producer.run(jobs, None).await
}
