//! Installed-state discovery.
//!
//! The game root carries a small `config.ini` recording the installed
//! version and a few fixed keys, and a plain list of installed voice-over
//! languages. Both must be sane before anything is touched.

use super::Component;
use crate::paths;
use ini::Ini;
use semver::Version;
use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Installed-state descriptor at the game root
pub const CONFIG_FILE: &str = "config.ini";

/// Installed voice-over languages, one code per line
pub const LANGUAGE_LIST: &str = "GenshinImpact_Data/Persistent/audio_lang_14";

/// Voice-over assets downloaded in-game
pub const PERSISTENT_AUDIO: &str = "GenshinImpact_Data/Persistent/AudioAssets";

/// Voice-over assets shipped with the packages
pub const STREAMING_AUDIO: &str = "GenshinImpact_Data/StreamingAssets/AudioAssets";

const GENERAL_SECTION: &str = "General";
const VERSION_KEY: &str = "game_version";

/// Keys whose values must match exactly; written back in this order
const FIXED_KEYS: [(&str, &str); 3] = [("channel", "1"), ("cps", "mihoyo"), ("sub_channel", "0")];

/// Installation problems detected before any component is processed.
#[derive(Debug, thiserror::Error)]
pub enum PreconditionError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} is not a valid ini file: {message}")]
    Ini { path: PathBuf, message: String },

    #[error("{path} has no [{GENERAL_SECTION}] section")]
    MissingSection { path: PathBuf },

    #[error("{path}: [{GENERAL_SECTION}] {key} should be {expected:?}, not {actual:?}")]
    FixedValue {
        path: PathBuf,
        key: &'static str,
        expected: &'static str,
        actual: Option<String>,
    },

    #[error("{path}: invalid game_version {value:?}: {source}")]
    Version {
        path: PathBuf,
        value: String,
        #[source]
        source: semver::Error,
    },

    #[error("{path}: {source}")]
    Language {
        path: PathBuf,
        #[source]
        source: super::UnknownComponent,
    },

    #[error("{0} lists no installed languages")]
    NoLanguages(PathBuf),

    #[error("Game is not installed at {0} and no languages were requested for a fresh install")]
    NotInstalled(PathBuf),
}

/// What is currently installed.
#[derive(Debug, Clone)]
pub struct GameInfo {
    pub path: PathBuf,
    pub version: Version,
    pub languages: BTreeSet<Component>,
}

impl GameInfo {
    /// Load the installed state, or `None` when there is no descriptor at all.
    pub fn load(game_path: &Path) -> Result<Option<Self>, PreconditionError> {
        let config_path = game_path.join(CONFIG_FILE);
        let raw = match fs::read(&config_path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No {} in {}", CONFIG_FILE, game_path.display());
                return Ok(None);
            }
            Err(source) => return Err(PreconditionError::Io { path: config_path, source }),
        };

        let version = parse_descriptor(&config_path, &raw)?;
        info!("Game version {}", version);

        let languages = read_languages(game_path)?;
        info!(
            "Game installed languages {:?}",
            languages.iter().map(|l| l.code()).collect::<Vec<_>>()
        );

        Ok(Some(Self {
            path: game_path.to_path_buf(),
            version,
            languages,
        }))
    }

    pub fn persistent_audio(&self) -> PathBuf {
        paths::join_relative(&self.path, PERSISTENT_AUDIO)
    }

    pub fn streaming_audio(&self) -> PathBuf {
        paths::join_relative(&self.path, STREAMING_AUDIO)
    }
}

/// Validate the descriptor and return the installed version.
pub fn parse_descriptor(path: &Path, raw: &[u8]) -> Result<Version, PreconditionError> {
    let text = String::from_utf8_lossy(raw);
    let ini = Ini::load_from_str(&text).map_err(|e| PreconditionError::Ini {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    let general = ini
        .section(Some(GENERAL_SECTION))
        .ok_or_else(|| PreconditionError::MissingSection { path: path.to_path_buf() })?;

    debug!("Validating game config file {}", path.display());
    for (key, expected) in FIXED_KEYS {
        let actual = general.get(key).map(str::trim);
        if actual != Some(expected) {
            return Err(PreconditionError::FixedValue {
                path: path.to_path_buf(),
                key,
                expected,
                actual: actual.map(str::to_string),
            });
        }
    }

    let value = general.get(VERSION_KEY).unwrap_or("").trim().to_string();
    Version::parse(&value).map_err(|source| PreconditionError::Version {
        path: path.to_path_buf(),
        value,
        source,
    })
}

/// Render a descriptor for the given version.
///
/// Keys are written in a stable order with `\n` line endings.
pub fn render_descriptor(version: &Version) -> String {
    let mut keys: Vec<(&str, String)> = FIXED_KEYS
        .iter()
        .map(|(k, v)| (*k, v.to_string()))
        .collect();
    keys.push((VERSION_KEY, version.to_string()));
    keys.sort_by(|a, b| a.0.cmp(b.0));

    let mut out = format!("[{}]\n", GENERAL_SECTION);
    for (key, value) in keys {
        let _ = writeln!(out, "{}={}", key, value);
    }
    out.trim_end().to_string()
}

/// Write a fresh descriptor for `version` into the game root.
pub fn write_descriptor(game_path: &Path, version: &Version) -> std::io::Result<()> {
    info!(
        "Writing new game config file {} in {} for version {}",
        CONFIG_FILE,
        game_path.display(),
        version
    );
    fs::write(game_path.join(CONFIG_FILE), render_descriptor(version))
}

/// Read the installed language list.
pub fn read_languages(game_path: &Path) -> Result<BTreeSet<Component>, PreconditionError> {
    let path = paths::join_relative(game_path, LANGUAGE_LIST);
    let text = fs::read_to_string(&path).map_err(|source| PreconditionError::Io {
        path: path.clone(),
        source,
    })?;

    let mut languages = BTreeSet::new();
    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let lang = Component::lookup(line).map_err(|source| PreconditionError::Language {
            path: path.clone(),
            source,
        })?;
        languages.insert(lang);
    }

    if languages.is_empty() {
        return Err(PreconditionError::NoLanguages(path));
    }
    Ok(languages)
}
