//! Run configuration
//!
//! Built from the command line (optionally extended by an arguments file) and
//! validated before anything touches the disk or the network.

use crate::game::catalog::DEFAULT_API_URL;
use crate::game::Component;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Configuration for one update run
#[derive(Debug, Clone)]
pub struct Config {
    /// Game installation directory (contains config.ini)
    pub game_path: PathBuf,

    /// Scratch directory for diff patching
    pub temp_path: PathBuf,

    /// Directory downloaded packages are stored in
    pub patch_path: PathBuf,

    /// hpatchz executable, or a directory containing it
    pub hpatchz_path: Option<PathBuf>,

    /// Saved catalog response to use instead of querying the API
    pub api_file: Option<PathBuf>,

    /// Catalog endpoint
    pub api_url: String,

    /// Only download, never patch
    pub download_only: bool,

    /// Only use the pre-download release
    pub predownload_only: bool,

    /// Languages to install in addition to the installed ones
    pub languages: BTreeSet<Component>,

    /// Components skipped for this run: not downloaded, not patched
    pub download_exclude: BTreeSet<Component>,

    /// Write a log file there in addition to the console
    pub log_dir: Option<PathBuf>,

    /// Do not ask before starting
    pub assume_yes: bool,
}

impl Config {
    /// Defaults for everything but the game directory.
    pub fn new(game_path: impl Into<PathBuf>) -> Self {
        let game_path = game_path.into();
        Self {
            temp_path: game_path.join("gsp_temp"),
            patch_path: game_path.join("gsp_patch"),
            game_path,
            hpatchz_path: None,
            api_file: None,
            api_url: DEFAULT_API_URL.to_string(),
            download_only: false,
            predownload_only: false,
            languages: BTreeSet::new(),
            download_exclude: BTreeSet::new(),
            log_dir: None,
            assume_yes: false,
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.game_path.is_dir() {
            return Err(ConfigError::GameDirNotFound(self.game_path.clone()));
        }

        if let Some(api_file) = &self.api_file {
            if !api_file.is_file() {
                return Err(ConfigError::ApiFileNotFound(api_file.clone()));
            }
        }

        if let Some(tool) = &self.hpatchz_path {
            if !tool.exists() {
                return Err(ConfigError::HPatchzNotFound(tool.clone()));
            }
        }

        if let Some(language) = self.languages.iter().find(|c| !c.is_language()) {
            return Err(ConfigError::NotALanguage(*language));
        }

        if self.download_exclude.len() == Component::ALL.len() && !self.download_only {
            return Err(ConfigError::NothingToDo);
        }

        Ok(())
    }

    /// Create the working directories.
    pub fn create_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.temp_path)?;
        std::fs::create_dir_all(&self.patch_path)?;
        if let Some(log_dir) = &self.log_dir {
            std::fs::create_dir_all(log_dir)?;
        }
        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Game directory not found: {0}")]
    GameDirNotFound(PathBuf),

    #[error("API file not found: {0}")]
    ApiFileNotFound(PathBuf),

    #[error("hpatchz not found at {0}")]
    HPatchzNotFound(PathBuf),

    #[error("{0} is not a language pack")]
    NotALanguage(Component),

    #[error("Every component is excluded from download, nothing to patch")]
    NothingToDo,

    #[error("Failed to read arguments file {path}: {source}")]
    ArgsFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Read an arguments file: one argument per line, blank lines and lines
/// starting with `#` are ignored.
pub fn read_args_file(path: &Path) -> Result<Vec<String>, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ArgsFile {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(parse_args(&content))
}

fn parse_args(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_args_skips_comments() {
        let args = parse_args("# game\n--game-path\n  /games/gi  \n\n#--yes\n--download-only\n");
        assert_eq!(args, vec!["--game-path", "/games/gi", "--download-only"]);
    }

    #[test]
    fn test_defaults_live_in_game_dir() {
        let config = Config::new("/games/gi");
        assert_eq!(config.patch_path, PathBuf::from("/games/gi/gsp_patch"));
        assert_eq!(config.temp_path, PathBuf::from("/games/gi/gsp_temp"));
        assert_eq!(config.api_url, DEFAULT_API_URL);
    }

    #[test]
    fn test_validate() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::new(dir.path());
        assert!(config.validate().is_ok());

        config.languages.insert(Component::Game);
        assert!(matches!(config.validate(), Err(ConfigError::NotALanguage(Component::Game))));
        config.languages.clear();

        config.download_exclude.extend(Component::ALL);
        assert!(matches!(config.validate(), Err(ConfigError::NothingToDo)));
        config.download_only = true;
        assert!(config.validate().is_ok());

        let missing = Config::new(dir.path().join("missing"));
        assert!(matches!(missing.validate(), Err(ConfigError::GameDirNotFound(_))));
    }
}
