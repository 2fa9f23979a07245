use super::{UpdateUnit, DELETE_LIST, DIFF_LIST, DIFF_SUFFIX};
use crate::archive::{self, ArchiveEntry, ArchiveSource};
use crate::game::{Component, Manifest, ManifestError, VersionTransition};
use crate::paths;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::io::{Read, Seek};
use tracing::debug;
use zip::ZipArchive;

#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    #[error("Diff list names {target} but the archive has no {expected}")]
    MissingDiffPayload { target: String, expected: String },

    #[error("Archive has no manifest {0}")]
    MissingManifest(String),

    #[error("Invalid manifest: {0}")]
    Manifest(#[from] ManifestError),

    #[error("{DIFF_LIST} line {line}: {source}")]
    DiffList {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Failed to read archive member: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Deserialize)]
struct DiffListEntry {
    #[serde(rename = "remoteName")]
    remote_name: String,
}

fn read_member<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    entry: &ArchiveEntry,
) -> Result<Vec<u8>, ClassifyError> {
    let mut file = archive.by_index(entry.index)?;
    let mut buf = Vec::with_capacity(entry.size as usize);
    file.read_to_end(&mut buf)?;
    Ok(buf)
}

fn parse_delete_list(raw: &[u8]) -> BTreeSet<String> {
    String::from_utf8_lossy(raw)
        .lines()
        .map(paths::normalize_archive_name)
        .filter(|p| !p.is_empty())
        .collect()
}

fn parse_diff_list(raw: &[u8]) -> Result<BTreeSet<String>, ClassifyError> {
    let text = String::from_utf8_lossy(raw);
    let mut targets = BTreeSet::new();
    for (idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let entry: DiffListEntry = serde_json::from_str(line)
            .map_err(|source| ClassifyError::DiffList { line: idx + 1, source })?;
        targets.insert(paths::normalize_archive_name(&entry.remote_name));
    }
    Ok(targets)
}

impl UpdateUnit {
    /// Open the downloaded archive and classify its members.
    pub fn classify(
        source: ArchiveSource,
        component: Component,
        version: VersionTransition,
    ) -> Result<Self, ClassifyError> {
        let mut archive = source.open_zip()?;
        Self::from_archive(&mut archive, source, component, version)
    }

    pub fn from_archive<R: Read + Seek>(
        archive: &mut ZipArchive<R>,
        source: ArchiveSource,
        component: Component,
        version: VersionTransition,
    ) -> Result<Self, ClassifyError> {
        let entries = archive::list_entries(archive)?;
        let by_name: BTreeMap<&str, &ArchiveEntry> =
            entries.iter().map(|e| (e.name.as_str(), e)).collect();

        let delete_paths = match by_name.get(DELETE_LIST) {
            Some(entry) => parse_delete_list(&read_member(archive, entry)?),
            None => BTreeSet::new(),
        };
        let diff_targets = match by_name.get(DIFF_LIST) {
            Some(entry) => parse_diff_list(&read_member(archive, entry)?)?,
            None => BTreeSet::new(),
        };

        let manifest_name = component.manifest_name();
        let manifest_entry = by_name
            .get(manifest_name.as_str())
            .ok_or_else(|| ClassifyError::MissingManifest(manifest_name.clone()))?;
        let manifest = Manifest::parse(read_member(archive, manifest_entry)?)?;

        let mut diffs = BTreeMap::new();
        for target in diff_targets {
            let expected = format!("{}{}", target, DIFF_SUFFIX);
            let entry = by_name
                .get(expected.as_str())
                .ok_or_else(|| ClassifyError::MissingDiffPayload {
                    target: target.clone(),
                    expected: expected.clone(),
                })?;
            diffs.insert(target, (*entry).clone());
        }
        let payload_names: BTreeSet<&str> = diffs.values().map(|e| e.name.as_str()).collect();

        let mut standalone = Vec::new();
        let mut manifest_backed = Vec::new();
        for entry in &entries {
            let name = entry.name.as_str();
            if name == DELETE_LIST || name == DIFF_LIST || payload_names.contains(name) {
                continue;
            }
            if manifest.contains(name) {
                manifest_backed.push(entry.clone());
            } else {
                standalone.push(entry.clone());
            }
        }

        let unit = Self {
            source,
            component,
            version,
            delete_paths,
            standalone,
            manifest_backed,
            diffs,
            manifest,
        };
        debug!("Classified {}", unit);
        Ok(unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use semver::Version;
    use std::io::{Cursor, Write};
    use std::path::PathBuf;

    fn version() -> VersionTransition {
        VersionTransition {
            from: Some(Version::new(4, 0, 1)),
            to: Version::new(4, 1, 0),
        }
    }

    fn build_zip(members: &[(&str, &[u8])]) -> ZipArchive<Cursor<Vec<u8>>> {
        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = zip::write::SimpleFileOptions::default();
        for (name, data) in members {
            zip.start_file(*name, options).unwrap();
            zip.write_all(data).unwrap();
        }
        ZipArchive::new(zip.finish().unwrap()).unwrap()
    }

    const MANIFEST: &str = concat!(
        r#"{"remoteName": "c.txt", "md5": "x", "fileSize": 3}"#,
        "\n",
        r#"{"remoteName": "d.bin", "md5": "y", "fileSize": 11}"#,
        "\n",
    );

    fn classify(members: &[(&str, &[u8])]) -> Result<UpdateUnit, ClassifyError> {
        let mut archive = build_zip(members);
        UpdateUnit::from_archive(
            &mut archive,
            ArchiveSource::Single(PathBuf::from("game.zip")),
            Component::Game,
            version(),
        )
    }

    #[test]
    fn test_partition_covers_every_member_once() {
        let unit = classify(&[
            ("deletefiles.txt", b"old/a.txt\r\n\nold/z.txt\n"),
            ("hdifffiles.txt", br#"{"remoteName": "d.bin"}"#),
            ("pkg_version", MANIFEST.as_bytes()),
            ("c.txt", b"ccc"),
            ("d.bin.hdiff", b"patch"),
            ("new/b.txt", b"standalone"),
        ])
        .unwrap();

        assert_eq!(
            unit.delete_paths,
            BTreeSet::from(["old/a.txt".to_string(), "old/z.txt".to_string()])
        );
        let names = |v: &[ArchiveEntry]| v.iter().map(|e| e.name.clone()).collect::<Vec<_>>();
        assert_eq!(names(&unit.manifest_backed), vec!["c.txt"]);
        assert_eq!(names(&unit.standalone), vec!["pkg_version", "new/b.txt"]);
        assert_eq!(unit.diffs["d.bin"].name, "d.bin.hdiff");

        // Every member lands in exactly one set, reserved lists in none
        let mut seen: Vec<String> = names(&unit.manifest_backed);
        seen.extend(names(&unit.standalone));
        seen.extend(unit.diffs.values().map(|e| e.name.clone()));
        seen.sort();
        assert_eq!(seen, vec!["c.txt", "d.bin.hdiff", "new/b.txt", "pkg_version"]);
    }

    #[test]
    fn test_patch_budget() {
        let unit = classify(&[
            ("deletefiles.txt", b"old/a.txt"),
            ("hdifffiles.txt", br#"{"remoteName": "d.bin"}"#),
            ("pkg_version", MANIFEST.as_bytes()),
            ("c.txt", b"ccc"),
            ("d.bin.hdiff", b"patch"),
        ])
        .unwrap();

        let root = std::path::Path::new("/game");
        let delete = paths::path_cost(&root.join("old").join("a.txt"));
        let manifest_len = MANIFEST.len() as u64;
        // standalone = pkg_version itself
        let expected = delete + manifest_len + 3 + 5 + 2 * 11 + 14 + manifest_len;
        assert_eq!(unit.patch_bytes(root), expected);
    }

    #[test]
    fn test_unlisted_diff_target_budgeted_from_disk() {
        let unit = classify(&[
            ("hdifffiles.txt", br#"{"remoteName": "e.bin"}"#),
            ("pkg_version", MANIFEST.as_bytes()),
            ("e.bin.hdiff", b"patch"),
        ])
        .unwrap();
        let game = tempfile::TempDir::new().unwrap();
        std::fs::write(game.path().join("e.bin"), b"seven b").unwrap();

        assert_eq!(unit.diff_target_bytes(game.path()), 7);
        let without_target = unit.patch_bytes(game.path()) - 2 * 7;
        std::fs::remove_file(game.path().join("e.bin")).unwrap();
        assert_eq!(unit.diff_target_bytes(game.path()), 0);
        assert_eq!(unit.patch_bytes(game.path()), without_target);
    }

    #[test]
    fn test_missing_payload_in_full_archive_rejected() {
        let err = classify(&[
            ("deletefiles.txt", b"old/a.txt\n"),
            (
                "hdifffiles.txt",
                concat!(r#"{"remoteName": "d.bin"}"#, "\n", r#"{"remoteName": "e.bin"}"#).as_bytes(),
            ),
            ("pkg_version", MANIFEST.as_bytes()),
            ("c.txt", b"ccc"),
            ("d.bin.hdiff", b"patch"),
            ("e.bin", b"unpatched copy"),
            ("new/b.txt", b"standalone"),
        ])
        .unwrap_err();
        match err {
            ClassifyError::MissingDiffPayload { target, expected } => {
                assert_eq!(target, "e.bin");
                assert_eq!(expected, "e.bin.hdiff");
            }
            other => panic!("expected MissingDiffPayload, got {:?}", other),
        }
    }

    #[test]
    fn test_manifest_members_are_not_standalone() {
        let unit = classify(&[
            ("pkg_version", MANIFEST.as_bytes()),
            ("c.txt", b"ccc"),
            ("d.bin", b"after patch"),
            ("extra/c.txt", b"not listed"),
        ])
        .unwrap();

        let backed: BTreeSet<&str> = unit.manifest_backed.iter().map(|e| e.name.as_str()).collect();
        let standalone: BTreeSet<&str> = unit.standalone.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(backed, BTreeSet::from(["c.txt", "d.bin"]));
        assert_eq!(standalone, BTreeSet::from(["pkg_version", "extra/c.txt"]));
        assert!(backed.is_disjoint(&standalone));
        assert_eq!(unit.manifest_backed_bytes(), 3 + 11);
    }

    #[test]
    fn test_missing_diff_payload_rejected() {
        let err = classify(&[
            ("hdifffiles.txt", br#"{"remoteName": "d.bin"}"#),
            ("pkg_version", MANIFEST.as_bytes()),
        ])
        .unwrap_err();
        match err {
            ClassifyError::MissingDiffPayload { target, expected } => {
                assert_eq!(target, "d.bin");
                assert_eq!(expected, "d.bin.hdiff");
            }
            other => panic!("expected MissingDiffPayload, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_manifest_rejected() {
        let err = classify(&[("c.txt", b"ccc")]).unwrap_err();
        assert!(matches!(err, ClassifyError::MissingManifest(name) if name == "pkg_version"));
    }

    #[test]
    fn test_language_unit_uses_its_own_manifest() {
        let mut archive = build_zip(&[
            ("Audio_English(US)_pkg_version", MANIFEST.as_bytes()),
            ("c.txt", b"ccc"),
        ]);
        let unit = UpdateUnit::from_archive(
            &mut archive,
            ArchiveSource::Single(PathBuf::from("en-us.zip")),
            Component::EnUs,
            version(),
        )
        .unwrap();
        assert!(unit.delete_paths.is_empty());
        assert!(unit.diffs.is_empty());
        assert_eq!(unit.manifest.len(), 2);
        assert_eq!(unit.manifest_backed.len(), 1);
    }
}
