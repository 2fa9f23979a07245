//! Component manifests (`pkg_version` files).
//!
//! A manifest is newline-delimited JSON, one object per installed file:
//!
//! ```text
//! {"remoteName": "GenshinImpact_Data/data.unity3d", "md5": "0f3c...", "fileSize": 1234}
//! ```
//!
//! It is the source of truth for what a component's files must look like
//! after patching. The raw bytes are kept because verification compares the
//! installed copy of the manifest byte for byte.

use crate::paths;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// One expected file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ManifestEntry {
    /// Installation-relative path, forward slashes
    pub path: String,
    /// Lowercase hex md5
    pub hash: String,
    /// Declared size in bytes
    pub size: u64,
}

impl ManifestEntry {
    /// Absolute location of this entry under an installation root.
    pub fn resolve(&self, root: &Path) -> PathBuf {
        paths::join_relative(root, &self.path)
    }
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    #[serde(rename = "remoteName")]
    remote_name: String,
    md5: String,
    #[serde(rename = "fileSize")]
    file_size: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("manifest is not valid UTF-8")]
    NotUtf8(#[from] std::str::Utf8Error),

    #[error("manifest line {line}: {source}")]
    Line {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Parsed manifest plus its raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    entries: BTreeMap<String, ManifestEntry>,
    raw: Vec<u8>,
}

impl Manifest {
    pub fn parse(raw: Vec<u8>) -> Result<Self, ManifestError> {
        let text = std::str::from_utf8(&raw)?;
        let mut entries = BTreeMap::new();

        for (idx, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let entry: RawEntry = serde_json::from_str(line)
                .map_err(|source| ManifestError::Line { line: idx + 1, source })?;
            let path = paths::normalize_archive_name(&entry.remote_name);
            entries.insert(
                path.clone(),
                ManifestEntry {
                    path,
                    hash: entry.md5.to_ascii_lowercase(),
                    size: entry.file_size,
                },
            );
        }

        Ok(Self { entries, raw })
    }

    pub fn get(&self, path: &str) -> Option<&ManifestEntry> {
        self.entries.get(&paths::normalize_archive_name(path))
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    pub fn entries(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Raw file bytes as shipped in the archive.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Sum of all declared sizes.
    pub fn total_size(&self) -> u64 {
        self.entries.values().map(|e| e.size).sum()
    }
}
