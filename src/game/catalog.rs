//! Remote catalog: what the launcher resource API says is available.
//!
//! The API answers with the latest full packages (split into segments for the
//! base game, one archive per voice-over language), the update archives
//! keyed by the version they upgrade from, an optional pre-download release,
//! and a list of files the new version no longer ships.

use super::{Component, VersionTransition};
use reqwest::Client;
use semver::Version;
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

/// Default launcher resource endpoint
pub const DEFAULT_API_URL: &str =
    "https://sdk-os-static.mihoyo.com/hk4e_global/mdk/launcher/api/resource?launcher_id=10&key=gcStgarh";

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Failed to query catalog {url}: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Failed to read catalog file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed catalog: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Catalog version {value:?} is not a valid version: {source}")]
    Version {
        value: String,
        #[source]
        source: semver::Error,
    },

    #[error("Catalog names unknown language '{0}'")]
    UnknownLanguage(String),

    #[error("No update archive from installed version {0}")]
    NoUpdatePath(Version),
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

/// Sizes arrive as either JSON strings or numbers.
fn de_size<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Size {
        Num(u64),
        Text(String),
    }

    match Size::deserialize(deserializer)? {
        Size::Num(n) => Ok(n),
        Size::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse {
    pub data: ApiData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiData {
    pub game: Release,
    #[serde(default)]
    pub pre_download_game: Option<Release>,
    #[serde(default)]
    pub deprecated_files: Vec<DeprecatedFile>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Release {
    pub latest: Latest,
    #[serde(default)]
    pub diffs: Vec<Diff>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Latest {
    pub version: String,
    #[serde(default)]
    pub segments: Vec<Segment>,
    #[serde(default)]
    pub voice_packs: Vec<VoicePack>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Segment {
    pub path: String,
    #[serde(deserialize_with = "de_size")]
    pub package_size: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VoicePack {
    pub language: String,
    pub path: String,
    #[serde(deserialize_with = "de_size")]
    pub package_size: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Diff {
    pub version: String,
    pub path: String,
    #[serde(deserialize_with = "de_size")]
    pub package_size: u64,
    #[serde(default)]
    pub voice_packs: Vec<VoicePack>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeprecatedFile {
    pub name: String,
}

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

/// One remote file to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePackage {
    pub component: Component,
    pub url: String,
    pub size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanMode {
    /// Nothing installed; full packages
    FullInstall,
    /// Update archives from the installed version
    Update,
}

/// What to download for one run.
#[derive(Debug, Clone)]
pub struct CatalogPlan {
    pub version: VersionTransition,
    pub mode: PlanMode,
    /// Base game packages; several segments of one archive for full installs
    pub game: Vec<RemotePackage>,
    /// One package per language, catalog order
    pub languages: Vec<RemotePackage>,
    pub deprecated_files: Vec<String>,
}

impl CatalogPlan {
    /// Bytes to download per component.
    pub fn component_bytes(&self) -> BTreeMap<Component, u64> {
        let mut bytes = BTreeMap::new();
        bytes.insert(Component::Game, self.game.iter().map(|p| p.size).sum());
        for pkg in &self.languages {
            *bytes.entry(pkg.component).or_insert(0) += pkg.size;
        }
        bytes
    }

    pub fn language(&self, component: Component) -> Option<&RemotePackage> {
        self.languages.iter().find(|p| p.component == component)
    }
}

fn parse_version(value: &str) -> Result<Version, CatalogError> {
    Version::parse(value.trim()).map_err(|source| CatalogError::Version {
        value: value.to_string(),
        source,
    })
}

fn voice_packages(packs: &[VoicePack]) -> Result<Vec<RemotePackage>, CatalogError> {
    packs
        .iter()
        .map(|pack| {
            let component = Component::from_code(&pack.language)
                .ok_or_else(|| CatalogError::UnknownLanguage(pack.language.clone()))?;
            Ok(RemotePackage {
                component,
                url: pack.path.clone(),
                size: pack.package_size,
            })
        })
        .collect()
}

fn find_diff<'a>(release: &'a Release, installed: &Version) -> Option<&'a Diff> {
    release
        .diffs
        .iter()
        .find(|d| parse_version(&d.version).ok().as_ref() == Some(installed))
}

impl ApiResponse {
    pub fn from_slice(raw: &[u8]) -> Result<Self, CatalogError> {
        Ok(serde_json::from_slice(raw)?)
    }

    fn latest_version(&self) -> Result<Version, CatalogError> {
        parse_version(&self.data.game.latest.version)
    }

    /// `Some(latest)` when `installed` is the latest release and there is no
    /// pre-download archive from it either, i.e. nothing to do.
    pub fn up_to_date(
        &self,
        installed: &Version,
        predownload_only: bool,
    ) -> Result<Option<Version>, CatalogError> {
        if predownload_only {
            return Ok(None);
        }
        let latest = self.latest_version()?;
        if *installed != latest {
            return Ok(None);
        }
        let predl = self
            .data
            .pre_download_game
            .as_ref()
            .filter(|release| find_diff(release, installed).is_some());
        match predl {
            Some(release) => {
                info!(
                    "Game is at latest {}, pre-installing {}",
                    latest, release.latest.version
                );
                Ok(None)
            }
            None => Ok(Some(latest)),
        }
    }

    /// Decide what to download.
    ///
    /// With nothing installed the latest full packages are used. Otherwise the
    /// current release's update archive for the installed version; when there
    /// is none, or `predownload_only` is set, the pre-download release's
    /// archive is used and becomes the target version.
    pub fn plan(
        &self,
        installed: Option<&Version>,
        predownload_only: bool,
    ) -> Result<CatalogPlan, CatalogError> {
        let latest = &self.data.game.latest;
        let deprecated_files = self
            .data
            .deprecated_files
            .iter()
            .map(|f| f.name.clone())
            .collect();

        let Some(installed) = installed else {
            let to = parse_version(&latest.version)?;
            let game = latest
                .segments
                .iter()
                .map(|seg| RemotePackage {
                    component: Component::Game,
                    url: seg.path.clone(),
                    size: seg.package_size,
                })
                .collect();
            return Ok(CatalogPlan {
                version: VersionTransition { from: None, to },
                mode: PlanMode::FullInstall,
                game,
                languages: voice_packages(&latest.voice_packs)?,
                deprecated_files,
            });
        };

        let current = if predownload_only {
            None
        } else {
            find_diff(&self.data.game, installed)
                .map(|diff| Ok::<_, CatalogError>((diff, parse_version(&latest.version)?)))
                .transpose()?
        };

        let (diff, to) = match current {
            Some(found) => found,
            None => {
                let predl = self
                    .data
                    .pre_download_game
                    .as_ref()
                    .ok_or_else(|| CatalogError::NoUpdatePath(installed.clone()))?;
                let diff = find_diff(predl, installed)
                    .ok_or_else(|| CatalogError::NoUpdatePath(installed.clone()))?;
                debug!("Using pre-download release {}", predl.latest.version);
                (diff, parse_version(&predl.latest.version)?)
            }
        };

        Ok(CatalogPlan {
            version: VersionTransition {
                from: Some(installed.clone()),
                to,
            },
            mode: PlanMode::Update,
            game: vec![RemotePackage {
                component: Component::Game,
                url: diff.path.clone(),
                size: diff.package_size,
            }],
            languages: voice_packages(&diff.voice_packs)?,
            deprecated_files,
        })
    }
}

/// GET the catalog.
pub async fn fetch(client: &Client, url: &str) -> Result<ApiResponse, CatalogError> {
    info!("GETting latest game information from {}", url);
    let http = |source| CatalogError::Http {
        url: url.to_string(),
        source,
    };
    let response = client
        .get(url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(http)?;
    let body = response.bytes().await.map_err(http)?;
    ApiResponse::from_slice(&body)
}

/// Read a saved catalog response.
pub fn load_file(path: &Path) -> Result<ApiResponse, CatalogError> {
    info!("Reading game information from {}", path.display());
    let raw = std::fs::read(path).map_err(|source| CatalogError::Io {
        path: path.display().to_string(),
        source,
    })?;
    ApiResponse::from_slice(&raw)
}
