//! Post-patch verification against the component manifest.

use crate::game::{Component, Manifest};
use crate::hash;
use crate::progress::ProgressSink;
use crate::paths;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("Installed manifest {0} differs from the one shipped in the update")]
    ManifestChanged(PathBuf),

    #[error(
        "{path}: expected size {expected_size} md5 {expected_hash}, \
         found size {actual_size} md5 {actual_hash}"
    )]
    Integrity {
        path: PathBuf,
        expected_size: u64,
        actual_size: u64,
        expected_hash: String,
        actual_hash: String,
    },

    #[error("Failed to verify {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Check the installation under `root` against `manifest`.
///
/// The installed copy of the manifest control file must be byte-identical to
/// `manifest.raw()`; then every listed file must match size and md5. A
/// mismatch reports both pairs.
pub fn verify_installation(
    root: &Path,
    component: Component,
    manifest: &Manifest,
    sink: &dyn ProgressSink,
) -> Result<(), VerifyError> {
    let manifest_path = paths::join_relative(root, &component.manifest_name());
    info!(
        "Verifying {} files of {} in {}",
        manifest.len(),
        component.name(),
        root.display()
    );

    let installed = std::fs::read(&manifest_path).map_err(|source| VerifyError::Io {
        path: manifest_path.clone(),
        source,
    })?;
    if installed != manifest.raw() {
        return Err(VerifyError::ManifestChanged(manifest_path));
    }
    sink.report(manifest.raw().len() as u64);

    for entry in manifest.entries() {
        let path = entry.resolve(root);
        debug!(
            "Verifying file {}, expecting size {}, md5 {}",
            path.display(),
            entry.size,
            entry.hash
        );
        let io_err = |source| VerifyError::Io {
            path: path.clone(),
            source,
        };

        let actual_size = std::fs::metadata(&path).map_err(io_err)?.len();
        let actual_hash = hash::compute_file_md5(&path, sink).map_err(io_err)?;
        if actual_size != entry.size || actual_hash != entry.hash {
            return Err(VerifyError::Integrity {
                path,
                expected_size: entry.size,
                actual_size,
                expected_hash: entry.hash.clone(),
                actual_hash,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::RecordingProgress;
    use anyhow::Result;
    use tempfile::TempDir;

    fn line(path: &str, data: &[u8]) -> String {
        format!(
            r#"{{"remoteName": "{}", "md5": "{:x}", "fileSize": {}}}"#,
            path,
            md5::compute(data),
            data.len()
        )
    }

    fn install(dir: &Path) -> Result<Manifest> {
        let raw = format!("{}\n{}\n", line("a.txt", b"alpha"), line("sub/b.bin", b"bravo!"));
        std::fs::create_dir_all(dir.join("sub"))?;
        std::fs::write(dir.join("a.txt"), b"alpha")?;
        std::fs::write(dir.join("sub").join("b.bin"), b"bravo!")?;
        std::fs::write(dir.join("pkg_version"), &raw)?;
        Ok(Manifest::parse(raw.into_bytes())?)
    }

    #[test]
    fn test_exact_install_passes() -> Result<()> {
        let dir = TempDir::new()?;
        let manifest = install(dir.path())?;
        let progress = RecordingProgress::new();
        verify_installation(dir.path(), Component::Game, &manifest, &progress)?;
        assert_eq!(progress.reported(), manifest.raw().len() as u64 + 11);
        Ok(())
    }

    #[test]
    fn test_mutated_file_is_named() -> Result<()> {
        let dir = TempDir::new()?;
        let manifest = install(dir.path())?;
        std::fs::write(dir.path().join("sub").join("b.bin"), b"bravo?")?;

        match verify_installation(dir.path(), Component::Game, &manifest, &RecordingProgress::new()) {
            Err(VerifyError::Integrity {
                path,
                expected_size,
                actual_size,
                expected_hash,
                actual_hash,
            }) => {
                assert_eq!(path, dir.path().join("sub").join("b.bin"));
                assert_eq!((expected_size, actual_size), (6, 6));
                assert_eq!(expected_hash, format!("{:x}", md5::compute(b"bravo!")));
                assert_eq!(actual_hash, format!("{:x}", md5::compute(b"bravo?")));
            }
            other => panic!("expected integrity error, got {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_size_mismatch_reports_sizes_and_hashes() -> Result<()> {
        let dir = TempDir::new()?;
        let manifest = install(dir.path())?;
        std::fs::write(dir.path().join("a.txt"), b"alpha and more")?;

        let err = verify_installation(dir.path(), Component::Game, &manifest, &RecordingProgress::new())
            .unwrap_err();
        let expected_md5 = format!("{:x}", md5::compute(b"alpha"));
        let actual_md5 = format!("{:x}", md5::compute(b"alpha and more"));
        match &err {
            VerifyError::Integrity {
                expected_size: 5,
                actual_size: 14,
                expected_hash,
                actual_hash,
                ..
            } => {
                assert_eq!(expected_hash, &expected_md5);
                assert_eq!(actual_hash, &actual_md5);
            }
            other => panic!("expected integrity error, got {:?}", other),
        }
        let message = err.to_string();
        assert!(message.contains("a.txt"), "{}", message);
        assert!(message.contains(&expected_md5) && message.contains(&actual_md5), "{}", message);
        Ok(())
    }

    #[test]
    fn test_changed_manifest_rejected() -> Result<()> {
        let dir = TempDir::new()?;
        let manifest = install(dir.path())?;
        std::fs::write(dir.path().join("pkg_version"), b"{}")?;

        assert!(matches!(
            verify_installation(dir.path(), Component::Game, &manifest, &RecordingProgress::new()),
            Err(VerifyError::ManifestChanged(_))
        ));
        Ok(())
    }
}
