use crate::channel::ChannelError;
use crate::dependency::Manager;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use thiserror::Error;

pub const MANIFEST_FILE_NAME: &str = "polylock.toml";

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read manifest file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse manifest: {0}")]
    ParseToml(#[from] toml::de::Error),
    #[error("unsupported manifest_version: {0}, expected 1")]
    UnsupportedVersion(u32),
    #[error("unknown platform: '{0}'")]
    UnknownPlatform(String),
    #[error("dependency name must not be empty")]
    EmptyDependencyName,
    #[error("dependency '{name}' declares more than one source ({sources})")]
    AmbiguousSource { name: String, sources: String },
    #[error("dependency '{name}': '{field}' requires '{requires}'")]
    DanglingField {
        name: String,
        field: &'static str,
        requires: &'static str,
    },
    #[error("dependency '{name}' ({manager}) is declared twice for platform {platform}")]
    DuplicateDependency {
        name: String,
        manager: Manager,
        platform: String,
    },
    #[error("invalid channel: {0}")]
    Channel(#[from] ChannelError),
}

/// A `polylock.toml` source manifest.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ManifestV1 {
    pub manifest_version: u32,
    #[serde(default)]
    pub platforms: Vec<String>,
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default)]
    pub pip_repositories: Vec<String>,
    #[serde(default)]
    pub allow_pypi_requests: Option<bool>,
    #[serde(default, rename = "dependency")]
    pub dependencies: Vec<DependencyEntry>,
}

/// One `[[dependency]]` table.
///
/// Exactly one of `version`, `url`, `git`/`hg`/`svn` or `path` selects the
/// source; none at all means any version.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DependencyEntry {
    pub name: String,
    #[serde(default)]
    pub manager: Manager,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub extras: BTreeSet<String>,
    #[serde(default)]
    pub markers: Option<String>,
    /// Restrict the dependency to these platforms.
    #[serde(default)]
    pub platforms: Option<Vec<String>>,

    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub build: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub hash: Option<String>,

    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub hashes: Vec<String>,

    #[serde(default)]
    pub git: Option<String>,
    #[serde(default)]
    pub hg: Option<String>,
    #[serde(default)]
    pub svn: Option<String>,
    #[serde(default)]
    pub rev: Option<String>,

    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub directory: Option<bool>,
    #[serde(default)]
    pub subdirectory: Option<String>,
}

pub fn parse_manifest_str(input: &str) -> Result<ManifestV1, ManifestError> {
    Ok(toml::from_str(input)?)
}

pub fn parse_manifest_file(path: impl AsRef<Path>) -> Result<ManifestV1, ManifestError> {
    let content = fs::read_to_string(path)?;
    parse_manifest_str(&content)
}
