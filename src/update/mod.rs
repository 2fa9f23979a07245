//! Update units: one downloaded package, classified and ready to apply.
//!
//! An update archive mixes four kinds of content:
//! - `deletefiles.txt`: installation paths to remove
//! - `hdifffiles.txt`: installation paths patched by a `<path>.hdiff` payload
//! - members named in the component manifest (full replacements)
//! - everything else ("standalone"), copied verbatim
//!
//! [`UpdateUnit::classify`] splits the archive into those sets once, so the
//! patcher can size its work up front and then execute it step by step.

mod classify;

pub use classify::ClassifyError;

use crate::archive::{ArchiveEntry, ArchiveSource};
use crate::game::{Component, Manifest, VersionTransition};
use crate::paths;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;

/// Reserved member listing paths to delete
pub const DELETE_LIST: &str = "deletefiles.txt";

/// Reserved member listing diff-patched paths
pub const DIFF_LIST: &str = "hdifffiles.txt";

/// Suffix of diff payload members
pub const DIFF_SUFFIX: &str = ".hdiff";

/// A classified update archive for one component.
#[derive(Debug)]
pub struct UpdateUnit {
    pub source: ArchiveSource,
    pub component: Component,
    pub version: VersionTransition,
    /// Installation-relative paths to remove
    pub delete_paths: BTreeSet<String>,
    /// Members installed verbatim that the manifest does not list
    pub standalone: Vec<ArchiveEntry>,
    /// Members the manifest lists
    pub manifest_backed: Vec<ArchiveEntry>,
    /// Diff target path -> `<target>.hdiff` member
    pub diffs: BTreeMap<String, ArchiveEntry>,
    pub manifest: Manifest,
}

impl UpdateUnit {
    pub fn delete_bytes(&self, game_root: &Path) -> u64 {
        self.delete_paths
            .iter()
            .map(|p| paths::path_cost(&paths::join_relative(game_root, p)))
            .sum()
    }

    pub fn standalone_bytes(&self) -> u64 {
        self.standalone.iter().map(|e| e.size).sum()
    }

    pub fn manifest_backed_bytes(&self) -> u64 {
        self.manifest_backed.iter().map(|e| e.size).sum()
    }

    pub fn diff_payload_bytes(&self) -> u64 {
        self.diffs.values().map(|e| e.size).sum()
    }

    /// Sizes of the files produced by diff patching: the manifest size, or
    /// the current on-disk size for a target the manifest does not list.
    pub fn diff_target_bytes(&self, game_root: &Path) -> u64 {
        self.diffs
            .keys()
            .map(|target| match self.manifest.get(target) {
                Some(entry) => entry.size,
                None => std::fs::metadata(paths::join_relative(game_root, target))
                    .map(|m| m.len())
                    .unwrap_or(0),
            })
            .sum()
    }

    /// Total work units the patcher will report for this unit.
    ///
    /// Diff targets count twice: once while the tool writes them and once
    /// when they are moved into place.
    pub fn patch_bytes(&self, game_root: &Path) -> u64 {
        self.delete_bytes(game_root)
            + self.standalone_bytes()
            + self.manifest_backed_bytes()
            + self.diff_payload_bytes()
            + self.diff_target_bytes(game_root) * 2
            + self.manifest.total_size()
            + self.manifest.raw().len() as u64
    }
}

impl fmt::Display for UpdateUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} [{}] delete={} standalone={} manifest={} diff={}",
            self.component,
            self.version,
            self.source,
            self.delete_paths.len(),
            self.standalone.len(),
            self.manifest_backed.len(),
            self.diffs.len()
        )
    }
}
