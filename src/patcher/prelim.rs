//! Preparation done once per update run, before any component is patched.
//!
//! Voice-over packs downloaded in-game live under `Persistent`, but update
//! archives patch them under `StreamingAssets`, so they are moved first. Files
//! the catalog marks deprecated are removed.

use super::{replace_file, PatchError};
use crate::paths;
use crate::progress::{NoProgress, ProgressSink};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// (source, destination) for every file that has to move.
fn audio_moves(from: &Path, to: &Path) -> Vec<(PathBuf, PathBuf)> {
    if !from.is_dir() {
        return Vec::new();
    }
    WalkDir::new(from)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| {
            let rel = e.path().strip_prefix(from).ok()?.to_path_buf();
            Some((e.path().to_path_buf(), to.join(rel)))
        })
        .collect()
}

/// Progress cost of [`move_audio_assets`].
pub fn audio_move_bytes(from: &Path, to: &Path) -> u64 {
    audio_moves(from, to)
        .iter()
        .map(|(src, dst)| paths::path_cost(src) + paths::path_cost(dst))
        .sum()
}

/// Move every file below `from` to the same relative place below `to`,
/// replacing what is there.
pub fn move_audio_assets(from: &Path, to: &Path, sink: &dyn ProgressSink) -> Result<(), PatchError> {
    let moves = audio_moves(from, to);
    if moves.is_empty() {
        debug!("No audio assets to move from {}", from.display());
        return Ok(());
    }
    info!(
        "Moving {} audio asset files from {} to {}",
        moves.len(),
        from.display(),
        to.display()
    );

    for (src, dst) in moves {
        debug!("Replacing file {} with {}", dst.display(), src.display());
        // Progress is counted in path cost, not bytes
        replace_file(&src, &dst, &NoProgress)?;
        sink.report(paths::path_cost(&src) + paths::path_cost(&dst));
    }
    Ok(())
}

/// Progress cost of [`delete_deprecated`].
pub fn deprecated_bytes(game_root: &Path, files: &[String]) -> u64 {
    files
        .iter()
        .map(|f| paths::path_cost(&paths::join_relative(game_root, f)))
        .sum()
}

/// Delete files the new version no longer ships; missing ones are fine.
pub fn delete_deprecated(
    game_root: &Path,
    files: &[String],
    sink: &dyn ProgressSink,
) -> Result<(), PatchError> {
    info!("Deleting {} deprecated files from {}", files.len(), game_root.display());
    for rel in files {
        let path = paths::join_relative(game_root, rel);
        debug!("Deleting file {}", path.display());
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => return Err(PatchError::Io { path, source }),
        }
        sink.report(paths::path_cost(&path));
    }
    Ok(())
}
