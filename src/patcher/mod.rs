//! Patch engine: applies one classified [`UpdateUnit`] to the installation.
//!
//! Steps always run in this order:
//! 1. delete paths listed by the archive
//! 2. extract standalone members
//! 3. extract manifest-backed members
//! 4. apply diff payloads through a [`DeltaPatcher`]
//! 5. verify every manifest entry
//!
//! The progress total is fixed up front by [`UpdateUnit::patch_bytes`] and
//! each step reports against it.

pub mod hdiff;
pub mod prelim;
pub mod purge;
pub mod verify;

pub use hdiff::{DeltaPatcher, HPatchz};
pub use verify::VerifyError;

use crate::archive::extract::EntryTimes;
use crate::archive::{ArchiveEntry, ArchiveError, ArchiveExtractor, ArchiveReader};
use crate::paths;
use crate::progress::{ProgressSink, TaskProgress, TaskState};
use crate::update::{UpdateUnit, DIFF_SUFFIX};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use zip::ZipArchive;

const COPY_BUFFER_SIZE: usize = 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    #[error("{tool} {old} {diff} {new} failed (exit code {code:?}):\n{output}")]
    PatchApply {
        tool: PathBuf,
        old: PathBuf,
        diff: PathBuf,
        new: PathBuf,
        code: Option<i32>,
        output: String,
    },

    #[error("Failed to run {tool}: {source}")]
    Spawn {
        tool: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Diff tool not found at {0}")]
    ToolNotFound(PathBuf),

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error("Verification failed: {0}")]
    Verify(#[from] VerifyError),
}

impl From<zip::result::ZipError> for PatchError {
    fn from(e: zip::result::ZipError) -> Self {
        PatchError::Archive(ArchiveError::Zip(e))
    }
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> PatchError + '_ {
    move |source| PatchError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Runs update units against one installation.
pub struct PatchEngine {
    game_root: PathBuf,
    temp_dir: PathBuf,
    patcher: Arc<dyn DeltaPatcher>,
}

impl PatchEngine {
    pub fn new(
        game_root: impl Into<PathBuf>,
        temp_dir: impl Into<PathBuf>,
        patcher: Arc<dyn DeltaPatcher>,
    ) -> Self {
        Self {
            game_root: game_root.into(),
            temp_dir: temp_dir.into(),
            patcher,
        }
    }

    pub fn game_root(&self) -> &Path {
        &self.game_root
    }

    /// Work units [`apply`](Self::apply) will report for `unit`.
    pub fn budget(&self, unit: &UpdateUnit) -> u64 {
        unit.patch_bytes(&self.game_root)
    }

    /// Apply every step of `unit`. Any failure aborts the unit.
    pub fn apply(&self, unit: UpdateUnit, progress: &dyn TaskProgress) -> Result<(), PatchError> {
        info!("Patching {}", unit);
        progress.begin(TaskState::Patching, self.budget(&unit));

        progress.step("Deleting");
        info!("Patching {} step 1: delete {} files", unit.component, unit.delete_paths.len());
        self.delete_files(unit.delete_paths.iter().map(String::as_str), progress)?;

        let mut archive = unit.source.open_zip()?;
        let mut extractor = ArchiveExtractor::new(&mut archive);

        progress.step("Std extracting");
        info!(
            "Patching {} step 2: extract {} standalone files to {}",
            unit.component,
            unit.standalone.len(),
            self.game_root.display()
        );
        self.extract_all(&mut extractor, &unit.standalone, progress)?;

        progress.step("Pkg extracting");
        info!(
            "Patching {} step 3: extract {} manifest files to {}",
            unit.component,
            unit.manifest_backed.len(),
            self.game_root.display()
        );
        self.extract_all(&mut extractor, &unit.manifest_backed, progress)?;

        progress.step("Hdiff patching");
        info!("Patching {} step 4: apply {} diffs", unit.component, unit.diffs.len());
        drop(extractor);
        self.apply_diffs(&unit, &mut archive, progress)?;

        progress.step("Verifying");
        info!("Patching {} step 5: verify", unit.component);
        verify::verify_installation(&self.game_root, unit.component, &unit.manifest, progress)?;

        Ok(())
    }

    /// Remove installation-relative paths; missing ones are fine.
    pub fn delete_files<'a>(
        &self,
        rel_paths: impl IntoIterator<Item = &'a str>,
        sink: &dyn ProgressSink,
    ) -> Result<(), PatchError> {
        for rel in rel_paths {
            let path = paths::join_relative(&self.game_root, rel);
            debug!("Deleting file {}", path.display());
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(source) => return Err(PatchError::Io { path, source }),
            }
            sink.report(paths::path_cost(&path));
        }
        Ok(())
    }

    fn extract_all(
        &self,
        extractor: &mut ArchiveExtractor<'_, ArchiveReader>,
        entries: &[ArchiveEntry],
        sink: &dyn ProgressSink,
    ) -> Result<(), PatchError> {
        for entry in entries {
            debug!(
                "Extracting file {} to {}",
                entry.name,
                paths::join_relative(&self.game_root, &entry.name).display()
            );
            extractor.extract(entry, &self.game_root, sink)?;
        }
        Ok(())
    }

    fn apply_diffs(
        &self,
        unit: &UpdateUnit,
        archive: &mut ZipArchive<ArchiveReader>,
        sink: &dyn ProgressSink,
    ) -> Result<(), PatchError> {
        if unit.diffs.is_empty() {
            return Ok(());
        }

        fs::create_dir_all(&self.temp_dir).map_err(io_err(&self.temp_dir))?;
        let scratch = tempfile::Builder::new()
            .prefix(".gsp_hdiff_")
            .tempdir_in(&self.temp_dir)
            .map_err(io_err(&self.temp_dir))?;
        let mut extractor = ArchiveExtractor::new(archive);

        for (target, payload_entry) in &unit.diffs {
            let payload = extractor.extract(payload_entry, scratch.path(), sink)?;
            let old = paths::join_relative(&self.game_root, target);
            let new = paths::strip_suffix(&payload, DIFF_SUFFIX)
                .ok_or_else(|| PatchError::Io {
                    path: payload.clone(),
                    source: io::Error::new(io::ErrorKind::InvalidInput, "diff payload without suffix"),
                })?;
            let expected = unit.manifest.get(target).map(|e| e.size);

            debug!(
                "Patching to new file {} using old file {} and hdiff file {}",
                new.display(),
                old.display(),
                payload.display()
            );
            self.patcher.apply(&old, &payload, &new, expected, sink)?;

            debug!("Moving patched file {} to replace old file {}", new.display(), old.display());
            replace_file(&new, &old, sink)?;
            let times = EntryTimes::of_file(&payload).map_err(io_err(&payload))?;
            let file = File::options().write(true).open(&old).map_err(io_err(&old))?;
            times.apply(&file).map_err(io_err(&old))?;
            fs::remove_file(&payload).map_err(io_err(&payload))?;
        }
        Ok(())
    }
}

/// Move `src` over `dst`: rename when possible, otherwise copy and delete.
///
/// Reports the size of the file either way.
pub(crate) fn replace_file(src: &Path, dst: &Path, sink: &dyn ProgressSink) -> Result<(), PatchError> {
    paths::ensure_parent_dirs(dst).map_err(io_err(dst))?;
    match fs::rename(src, dst) {
        Ok(()) => {
            let size = fs::metadata(dst).map_err(io_err(dst))?.len();
            sink.report(size);
            return Ok(());
        }
        Err(e) => debug!("Rename {} failed ({}), copying instead", src.display(), e),
    }

    let mut reader = BufReader::with_capacity(COPY_BUFFER_SIZE, File::open(src).map_err(io_err(src))?);
    let mut writer = BufWriter::with_capacity(COPY_BUFFER_SIZE, File::create(dst).map_err(io_err(dst))?);
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    loop {
        let n = reader.read(&mut buf).map_err(io_err(src))?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n]).map_err(io_err(dst))?;
        sink.report(n as u64);
    }
    writer.flush().map_err(io_err(dst))?;
    fs::remove_file(src).map_err(io_err(src))
}
