//! Remove everything the installed manifests do not account for.
//!
//! Hot-update files downloaded by the game itself are removed as well; the
//! game fetches and verifies them again on the next start.

use crate::game::info::CONFIG_FILE;
use crate::game::{Component, Manifest};
use crate::paths;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

#[derive(Debug, thiserror::Error)]
pub enum PurgeError {
    #[error("Failed to read manifest {path}: {source}")]
    ReadManifest {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid manifest {path}: {source}")]
    Manifest {
        path: PathBuf,
        #[source]
        source: crate::game::ManifestError,
    },

    #[error("Failed to delete {path}: {source}")]
    Delete {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Default)]
pub struct PurgeReport {
    /// Files not listed anywhere (deleted unless dry run)
    pub extra: Vec<PathBuf>,
    /// Listed files that are not on disk
    pub missing: Vec<PathBuf>,
    pub removed_dirs: usize,
}

/// Every path the installed components expect under `game_root`.
pub fn expected_files(
    game_root: &Path,
    components: &BTreeSet<Component>,
) -> Result<BTreeSet<PathBuf>, PurgeError> {
    let mut expected = BTreeSet::new();
    expected.insert(game_root.join(CONFIG_FILE));

    for component in components {
        let manifest_path = paths::join_relative(game_root, &component.manifest_name());
        let raw = std::fs::read(&manifest_path).map_err(|source| PurgeError::ReadManifest {
            path: manifest_path.clone(),
            source,
        })?;
        let manifest = Manifest::parse(raw).map_err(|source| PurgeError::Manifest {
            path: manifest_path.clone(),
            source,
        })?;
        expected.extend(manifest.entries().map(|e| e.resolve(game_root)));
        expected.insert(manifest_path);
    }
    Ok(expected)
}

/// Delete files under `game_root` that no installed manifest lists, then
/// any directories left empty. With `dry_run` nothing is touched.
pub fn purge(
    game_root: &Path,
    components: &BTreeSet<Component>,
    dry_run: bool,
) -> Result<PurgeReport, PurgeError> {
    let expected = expected_files(game_root, components)?;
    let available: BTreeSet<PathBuf> = WalkDir::new(game_root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect();

    let mut report = PurgeReport {
        extra: available.difference(&expected).cloned().collect(),
        missing: expected.difference(&available).cloned().collect(),
        removed_dirs: 0,
    };
    info!(
        "{} expected files, {} on disk, {} extra, {} missing",
        expected.len(),
        available.len(),
        report.extra.len(),
        report.missing.len()
    );
    for path in &report.missing {
        warn!("Missing file {}", path.display());
    }
    if dry_run {
        return Ok(report);
    }

    for path in &report.extra {
        debug!("Deleting file {}", path.display());
        std::fs::remove_file(path).map_err(|source| PurgeError::Delete {
            path: path.clone(),
            source,
        })?;
    }

    for entry in WalkDir::new(game_root)
        .min_depth(1)
        .contents_first(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir())
    {
        // Fails for non-empty directories, which are kept
        if std::fs::remove_dir(entry.path()).is_ok() {
            debug!("Deleted empty dir {}", entry.path().display());
            report.removed_dirs += 1;
        }
    }
    Ok(report)
}
