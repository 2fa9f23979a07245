//! Shared helpers for integration tests.

#![allow(dead_code)]

use gsp::patcher::{DeltaPatcher, PatchError};
use gsp::progress::ProgressSink;
use std::io::{Cursor, Write};
use std::path::Path;

/// Build a zip archive in memory.
pub fn zip_bytes(members: &[(&str, &[u8])]) -> Vec<u8> {
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();
    for (name, data) in members {
        zip.start_file(*name, options).unwrap();
        zip.write_all(data).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

/// One manifest JSON line describing `data` at `path`.
pub fn manifest_line(path: &str, data: &[u8]) -> String {
    format!(
        r#"{{"remoteName": "{}", "md5": "{:x}", "fileSize": {}}}"#,
        path,
        md5::compute(data),
        data.len()
    )
}

/// Diff tool stand-in: the payload is the new file.
pub struct PayloadIsNewFile;

impl DeltaPatcher for PayloadIsNewFile {
    fn apply(
        &self,
        old: &Path,
        diff: &Path,
        new: &Path,
        _expected_size: Option<u64>,
        sink: &dyn ProgressSink,
    ) -> Result<(), PatchError> {
        assert!(old.exists(), "{} must exist before patching", old.display());
        let n = std::fs::copy(diff, new).map_err(|source| PatchError::Io {
            path: new.to_path_buf(),
            source,
        })?;
        sink.report(n);
        Ok(())
    }
}
