//! Path handling for archive entry names and installation-relative paths
//!
//! Update archives and manifests name files with forward slashes (sometimes
//! backslashes from Windows tooling). This module handles:
//! - Normalizing entry names so manifests and archives compare equal
//! - Joining untrusted relative names under an installation root without
//!   letting `..` or absolute prefixes escape it
//! - The "name cost" used for progress accounting of cheap operations

use std::path::{Path, PathBuf};

/// Convert Windows path separators to forward slashes
/// `GenshinImpact_Data\Persistent\a.blk` -> `GenshinImpact_Data/Persistent/a.blk`
pub fn to_archive_name(path: &str) -> String {
    path.replace('\\', "/")
}

/// Normalize an entry name for lookups and comparisons (forward slashes, no leading `./` or `/`)
pub fn normalize_archive_name(name: &str) -> String {
    let name = to_archive_name(name.trim());
    name.split('/')
        .filter(|part| !part.is_empty() && *part != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// Join a base path with an untrusted relative name.
///
/// Absolute prefixes, drive letters, `.` and `..` components are dropped, so
/// the result always stays under `base`.
pub fn join_relative(base: &Path, relative: &str) -> PathBuf {
    let mut out = base.to_path_buf();
    for part in relative.split(['\\', '/']) {
        if part.is_empty() || part == "." || part == ".." || part.ends_with(':') {
            continue;
        }
        out.push(part);
    }
    out
}

/// Get the filename from a path or URL (handles both / and \, ignores a query string)
pub fn file_name(path: &str) -> &str {
    let path = path.split(['?', '#']).next().unwrap_or(path);
    path.rfind(['\\', '/'])
        .map(|idx| &path[idx + 1..])
        .unwrap_or(path)
}

/// Strip a suffix from the file name of a path (`a/b.bin.hdiff` -> `a/b.bin`)
pub fn strip_suffix(path: &Path, suffix: &str) -> Option<PathBuf> {
    let name = path.file_name()?.to_str()?;
    let stem = name.strip_suffix(suffix)?;
    if stem.is_empty() {
        return None;
    }
    Some(path.with_file_name(stem))
}

/// Progress cost of an operation that only touches a path (delete, rename).
pub fn path_cost(path: &Path) -> u64 {
    path.to_string_lossy().len() as u64
}

/// Create parent directories for a path if they don't exist
pub fn ensure_parent_dirs(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_archive_name() {
        assert_eq!(to_archive_name("Data\\Textures\\armor.dds"), "Data/Textures/armor.dds");
        assert_eq!(to_archive_name("already/linux/path"), "already/linux/path");
        assert_eq!(to_archive_name("mixed\\path/style"), "mixed/path/style");
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize_archive_name("./Data\\a.blk"), "Data/a.blk");
        assert_eq!(normalize_archive_name("/Data//a.blk "), "Data/a.blk");
        assert_eq!(normalize_archive_name("pkg_version"), "pkg_version");
    }

    #[test]
    fn test_join_relative_stays_under_base() {
        let base = Path::new("/game");
        assert_eq!(join_relative(base, "a/b.txt"), base.join("a").join("b.txt"));
        assert_eq!(join_relative(base, "../../etc/passwd"), base.join("etc").join("passwd"));
        assert_eq!(join_relative(base, "/abs\\win.txt"), base.join("abs").join("win.txt"));
        assert_eq!(join_relative(base, "C:\\x.txt"), base.join("x.txt"));
    }

    #[test]
    fn test_file_name() {
        assert_eq!(file_name("Data\\Textures\\armor.dds"), "armor.dds");
        assert_eq!(file_name("armor.dds"), "armor.dds");
        assert_eq!(
            file_name("https://cdn.example.com/client/game_4.1.0.zip.001?sig=1"),
            "game_4.1.0.zip.001"
        );
    }

    #[test]
    fn test_strip_suffix() {
        assert_eq!(
            strip_suffix(Path::new("/tmp/a/b.bin.hdiff"), ".hdiff"),
            Some(PathBuf::from("/tmp/a/b.bin"))
        );
        assert_eq!(strip_suffix(Path::new("/tmp/b.bin"), ".hdiff"), None);
        assert_eq!(strip_suffix(Path::new("/tmp/.hdiff"), ".hdiff"), None);
    }

    #[test]
    fn test_path_cost() {
        assert_eq!(path_cost(Path::new("abc/def")), 7);
    }
}
