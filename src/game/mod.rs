//! Game model: components, manifests, installed state and the remote catalog.

pub mod catalog;
pub mod component;
pub mod info;
pub mod manifest;

pub use component::{Component, UnknownComponent};
pub use info::{GameInfo, PreconditionError};
pub use manifest::{Manifest, ManifestEntry, ManifestError};

use semver::Version;
use std::fmt;

/// Installed version (if any) and the version being installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionTransition {
    pub from: Option<Version>,
    pub to: Version,
}

impl fmt::Display for VersionTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.from {
            Some(from) => write!(f, "{} -> {}", from, self.to),
            None => write!(f, "new -> {}", self.to),
        }
    }
}
