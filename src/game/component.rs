//! Component identifiers.
//!
//! The base game plus the optional voice-over language packs. Each component
//! is downloaded and patched as one unit.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Base manifest control file name.
const MANIFEST_SUFFIX: &str = "pkg_version";

/// A downloadable, patchable part of the installation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Component {
    /// The base game
    Game,
    /// Chinese voice-over
    ZhCn,
    /// English (US) voice-over
    EnUs,
    /// Japanese voice-over
    JaJp,
    /// Korean voice-over
    KoKr,
}

impl Component {
    pub const ALL: [Component; 5] = [
        Component::Game,
        Component::ZhCn,
        Component::EnUs,
        Component::JaJp,
        Component::KoKr,
    ];

    pub const LANGUAGES: [Component; 4] = [
        Component::ZhCn,
        Component::EnUs,
        Component::JaJp,
        Component::KoKr,
    ];

    /// Short code used by the catalog and the installed language list.
    pub fn code(self) -> &'static str {
        match self {
            Component::Game => "game",
            Component::ZhCn => "zh-cn",
            Component::EnUs => "en-us",
            Component::JaJp => "ja-jp",
            Component::KoKr => "ko-kr",
        }
    }

    /// Display name; also part of the language manifest file name.
    pub fn name(self) -> &'static str {
        match self {
            Component::Game => "Game",
            Component::ZhCn => "Chinese",
            Component::EnUs => "English(US)",
            Component::JaJp => "Japanese",
            Component::KoKr => "Korean",
        }
    }

    pub fn is_language(self) -> bool {
        self != Component::Game
    }

    /// Name of the manifest control file inside the archive and at the game root.
    ///
    /// `Game` -> `pkg_version`, `EnUs` -> `Audio_English(US)_pkg_version`
    pub fn manifest_name(self) -> String {
        match self {
            Component::Game => MANIFEST_SUFFIX.to_string(),
            lang => format!("Audio_{}_{}", lang.name(), MANIFEST_SUFFIX),
        }
    }

    /// Look up by code only (the catalog always uses codes).
    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.code() == code)
    }

    /// Look up by code or display name.
    pub fn lookup(code_or_name: &str) -> Result<Self, UnknownComponent> {
        let wanted = code_or_name.trim();
        Self::ALL
            .into_iter()
            .find(|c| c.code() == wanted || c.name() == wanted)
            .ok_or_else(|| UnknownComponent(wanted.to_string()))
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Component {
    type Err = UnknownComponent;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::lookup(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("No game component known as '{0}'")]
pub struct UnknownComponent(pub String);
