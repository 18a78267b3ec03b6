//! The persisted lockfile: pinned packages per platform plus the metadata
//! needed to tell whether they are still current.
//!
//! The on-disk format is TOML:
//!
//! ```toml
//! version = 1
//!
//! [metadata]
//! platforms = ["linux-64", "osx-64"]
//! sources = ["polylock.toml"]
//! ...
//!
//! [[package]]
//! name = "python"
//! ...
//! ```
//!
//! `version` is read before anything else so that files written by a newer
//! schema fail with a precise error instead of a field mismatch.

use crate::channel::Channel;
use crate::dependency::Manager;
use crate::spec::ordered_union;
use crate::types::{is_virtual_package, ContentHash, Platform, DEV_CATEGORY, MAIN_CATEGORY};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, warn};

pub const LOCKFILE_VERSION: i64 = 1;
pub const DEFAULT_LOCKFILE_NAME: &str = "polylock.lock";

#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock file I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("lock file parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("lock file serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("lock file is missing a version")]
    MissingVersion,
    #[error("lock file has unknown version {0}, expected {LOCKFILE_VERSION}")]
    UnknownVersion(String),
    #[error("invalid lock file: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HashModel {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md5: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

/// Where a pip package was actually fetched from, when that differs from `url`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PackageSource {
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
}

/// `(manager, name, platform)`: the identity of a locked package.
pub type LockKey = (Manager, String, Platform);

/// One pinned package on one platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LockedDependency {
    pub name: String,
    pub version: String,
    pub manager: Manager,
    pub platform: Platform,
    /// Dependency name to version constraint.
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
    pub url: String,
    pub hash: HashModel,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub optional: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<PackageSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<String>,
}

fn default_category() -> String {
    MAIN_CATEGORY.to_owned()
}

impl LockedDependency {
    pub fn key(&self) -> LockKey {
        (self.manager, self.name.clone(), self.platform.clone())
    }

    /// Assign a category; everything outside `main` is optional.
    pub fn set_category(&mut self, category: &str) {
        category.clone_into(&mut self.category);
        self.optional = category != MAIN_CATEGORY;
    }

    fn validate(&self) -> Result<(), LockError> {
        if self.url.is_empty() {
            return Err(LockError::Invalid(format!(
                "package '{}' on {} has an empty url",
                self.name, self.platform
            )));
        }
        if self.manager == Manager::Conda && self.hash.md5.is_none() {
            return Err(LockError::Invalid(format!(
                "conda package '{}' on {} has no md5 hash",
                self.name, self.platform
            )));
        }
        Ok(())
    }
}

/// Provenance details that may be recorded in the metadata section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataOption {
    Timestamp,
    GitSha,
    GitUserName,
    GitUserEmail,
    InputDigest,
}

impl MetadataOption {
    pub const ALL: [MetadataOption; 5] = [
        MetadataOption::Timestamp,
        MetadataOption::GitSha,
        MetadataOption::GitUserName,
        MetadataOption::GitUserEmail,
        MetadataOption::InputDigest,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MetadataOption::Timestamp => "timestamp",
            MetadataOption::GitSha => "git_sha",
            MetadataOption::GitUserName => "git_user_name",
            MetadataOption::GitUserEmail => "git_user_email",
            MetadataOption::InputDigest => "input_digest",
        }
    }
}

impl fmt::Display for MetadataOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetadataOption {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|o| o.as_str() == s)
            .ok_or_else(|| {
                let valid: Vec<_> = Self::ALL.iter().map(|o| o.as_str()).collect();
                format!("unknown metadata option '{s}' (expected one of: {})", valid.join(", "))
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeMeta {
    /// UTC creation time, `YYYY-MM-DDTHH:MM:SSZ`.
    pub created_at: String,
}

impl TimeMeta {
    pub fn now() -> Self {
        Self {
            created_at: chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GitMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_user_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_user_email: Option<String>,
    /// Most recent commit touching any source, `-dirty` suffixed when a source has local changes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_sha: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputMeta {
    /// BLAKE3 digest of the source file contents.
    pub blake3: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LockMeta {
    pub content_hash: BTreeMap<Platform, ContentHash>,
    #[serde(default)]
    pub channels: Vec<Channel>,
    pub platforms: Vec<Platform>,
    /// Source paths relative to the lockfile's directory.
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_metadata: Option<TimeMeta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_metadata: Option<GitMeta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inputs_metadata: Option<BTreeMap<String, InputMeta>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_metadata: Option<BTreeMap<String, String>>,
}

impl LockMeta {
    /// Merge `other` (the newer metadata) into `self`.
    pub fn merge(&self, other: &LockMeta) -> LockMeta {
        if self.channels != other.channels {
            warn!(
                "merging lock metadata with different channels; keeping {:?}",
                self.channels.iter().map(|c| c.url.as_str()).collect::<Vec<_>>()
            );
        }

        let mut content_hash = self.content_hash.clone();
        content_hash.extend(other.content_hash.clone());

        let platforms: BTreeSet<Platform> = self
            .platforms
            .iter()
            .chain(&other.platforms)
            .cloned()
            .collect();

        let inputs_metadata = match (&self.inputs_metadata, &other.inputs_metadata) {
            (None, theirs) => theirs.clone(),
            (ours, None) => ours.clone(),
            (Some(ours), Some(theirs)) => {
                let mut merged = ours.clone();
                merged.extend(theirs.clone());
                Some(merged)
            }
        };

        let custom_metadata = match (&self.custom_metadata, &other.custom_metadata) {
            (None, theirs) => theirs.clone(),
            (ours, None) => ours.clone(),
            (Some(ours), Some(theirs)) => {
                let mut merged = ours.clone();
                for (key, value) in theirs {
                    if let Some(previous) = merged.insert(key.clone(), value.clone()) {
                        warn!(
                            "custom metadata key {key} provided twice, overwriting '{previous}' with '{value}'"
                        );
                    }
                }
                Some(merged)
            }
        };

        LockMeta {
            content_hash,
            channels: self.channels.clone(),
            platforms: platforms.into_iter().collect(),
            sources: ordered_union([self.sources.clone(), other.sources.clone()]),
            time_metadata: other.time_metadata.clone(),
            git_metadata: other.git_metadata.clone(),
            inputs_metadata,
            custom_metadata,
        }
    }

    /// The provenance options this metadata carries values for.
    pub fn recorded_options(&self) -> Vec<MetadataOption> {
        let git = self.git_metadata.clone().unwrap_or_default();
        let present = [
            (MetadataOption::Timestamp, self.time_metadata.is_some()),
            (MetadataOption::GitSha, git.git_sha.is_some()),
            (MetadataOption::GitUserName, git.git_user_name.is_some()),
            (MetadataOption::GitUserEmail, git.git_user_email.is_some()),
            (MetadataOption::InputDigest, self.inputs_metadata.is_some()),
        ];
        present
            .into_iter()
            .filter_map(|(option, set)| set.then_some(option))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Lockfile {
    pub metadata: LockMeta,
    pub package: Vec<LockedDependency>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct LockfileBody {
    metadata: LockMeta,
    #[serde(default)]
    package: Vec<LockedDependency>,
}

#[derive(Serialize)]
struct LockfileDocument<'a> {
    version: i64,
    metadata: &'a LockMeta,
    package: &'a [LockedDependency],
}

impl Lockfile {
    pub fn new(metadata: LockMeta, package: Vec<LockedDependency>) -> Self {
        Self { metadata, package }
    }

    /// Parse and validate a lockfile document. Comment lines are ignored.
    pub fn parse(input: &str) -> Result<Self, LockError> {
        let mut table: toml::Table = toml::from_str(input)?;
        match table.remove("version") {
            None => return Err(LockError::MissingVersion),
            Some(toml::Value::Integer(LOCKFILE_VERSION)) => {}
            Some(other) => return Err(LockError::UnknownVersion(other.to_string())),
        }
        let body: LockfileBody = toml::Value::Table(table).try_into()?;
        let lockfile = Self {
            metadata: body.metadata,
            package: body.package,
        };
        lockfile.validate()?;
        Ok(lockfile)
    }

    pub fn read_from_file(path: impl AsRef<Path>) -> Result<Self, LockError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let lockfile = Self::parse(&content)?;
        debug!(
            "read {} packages for {} platforms from {}",
            lockfile.package.len(),
            lockfile.metadata.platforms.len(),
            path.display()
        );
        Ok(lockfile)
    }

    /// Every package must belong to a listed platform. A listed platform with
    /// no packages is valid: an empty environment still locks.
    pub fn validate(&self) -> Result<(), LockError> {
        let platforms: BTreeSet<&Platform> = self.metadata.platforms.iter().collect();
        for pkg in &self.package {
            pkg.validate()?;
            if !platforms.contains(&pkg.platform) {
                return Err(LockError::Invalid(format!(
                    "package '{}' is locked for {}, which is not a listed platform",
                    pkg.name, pkg.platform
                )));
            }
        }
        Ok(())
    }

    /// Sort packages by `(manager, name, platform)`.
    pub fn alphasort(&mut self) {
        self.package.sort_by_key(LockedDependency::key);
    }

    /// Drop `__*` capability packages; they are never installed.
    pub fn filter_virtual_packages(&mut self) {
        self.package.retain(|p| !is_virtual_package(&p.name));
    }

    /// Reorder so that, per platform and manager, dependencies precede dependents.
    pub fn toposort(&mut self) {
        self.package = toposort(std::mem::take(&mut self.package));
    }

    pub fn platforms(&self) -> &[Platform] {
        &self.metadata.platforms
    }

    pub fn packages_for<'a>(
        &'a self,
        platform: &'a str,
    ) -> impl Iterator<Item = &'a LockedDependency> + 'a {
        self.package.iter().filter(move |p| p.platform == platform)
    }

    /// Every category present on any package.
    pub fn categories(&self) -> BTreeSet<&str> {
        self.package.iter().map(|p| p.category.as_str()).collect()
    }

    /// Merge a newer lockfile into this one.
    ///
    /// For every platform `newer` lists, its packages replace ours; packages
    /// of platforms only we cover are kept. The result is toposorted.
    pub fn merge(&self, newer: &Lockfile) -> Lockfile {
        let covered: BTreeSet<&Platform> = newer.metadata.platforms.iter().collect();
        let mut by_key: BTreeMap<LockKey, LockedDependency> = self
            .package
            .iter()
            .filter(|p| !covered.contains(&p.platform))
            .map(|p| (p.key(), p.clone()))
            .collect();
        for pkg in &newer.package {
            by_key.insert(pkg.key(), pkg.clone());
        }
        Lockfile {
            metadata: self.metadata.merge(&newer.metadata),
            package: toposort(by_key.into_values().collect()),
        }
    }

    /// Conda subdependencies that have no conda package on the same platform.
    pub fn missing_dependencies(&self) -> BTreeMap<Platform, BTreeSet<String>> {
        let present: BTreeSet<(&str, &Platform)> = self
            .package
            .iter()
            .filter(|p| p.manager == Manager::Conda)
            .map(|p| (p.name.as_str(), &p.platform))
            .collect();

        let mut missing: BTreeMap<Platform, BTreeSet<String>> = BTreeMap::new();
        for pkg in self.package.iter().filter(|p| p.manager == Manager::Conda) {
            for dep in pkg.dependencies.keys() {
                if is_virtual_package(dep) || present.contains(&(dep.as_str(), &pkg.platform)) {
                    continue;
                }
                missing
                    .entry(pkg.platform.clone())
                    .or_default()
                    .insert(dep.clone());
            }
        }
        missing
    }

    /// The document body without any comments.
    pub fn to_toml_string(&self) -> Result<String, LockError> {
        let doc = LockfileDocument {
            version: LOCKFILE_VERSION,
            metadata: &self.metadata,
            package: &self.package,
        };
        Ok(toml::to_string_pretty(&doc)?)
    }

    /// Sort, drop capability packages, and render with an optional help header.
    pub fn render(&self, help: Option<&HelpText<'_>>) -> Result<String, LockError> {
        let mut out = self.clone();
        out.alphasort();
        out.filter_virtual_packages();

        let missing = out.missing_dependencies();
        for (platform, names) in &missing {
            warn!(
                "conda dependencies missing from the lock on {platform}: {}",
                names.iter().cloned().collect::<Vec<_>>().join(", ")
            );
        }

        let mut text = String::new();
        if let Some(help) = help {
            text.push_str(&help.render(&out));
        }
        text.push_str(&out.to_toml_string()?);
        Ok(text)
    }

    /// Atomically write the rendered lockfile next to `path`.
    pub fn write_to_file(
        &self,
        path: impl AsRef<Path>,
        metadata_choices: &[MetadataOption],
        include_help_text: bool,
    ) -> Result<(), LockError> {
        let path = path.as_ref();
        let file_name = path
            .file_name()
            .map_or_else(|| DEFAULT_LOCKFILE_NAME.into(), |n| n.to_string_lossy());
        let help = HelpText {
            file_name: &file_name,
            metadata_choices,
        };
        let content = self.render(include_help_text.then_some(&help))?;

        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        std::io::Write::write_all(&mut tmp, content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| LockError::Io(e.error))?;
        // Fsync parent directory to ensure rename durability on power loss.
        if let Ok(f) = fs::File::open(dir) {
            let _ = f.sync_all();
        }
        Ok(())
    }
}

/// Comment header explaining how to use and regenerate a lockfile.
pub struct HelpText<'a> {
    pub file_name: &'a str,
    pub metadata_choices: &'a [MetadataOption],
}

impl HelpText<'_> {
    fn render(&self, lockfile: &Lockfile) -> String {
        let name = self.file_name;
        let categories = lockfile.categories();
        let md_flags: String = self
            .metadata_choices
            .iter()
            .map(|m| format!("--md {m} "))
            .collect();
        let source_flags: String = lockfile
            .metadata
            .sources
            .iter()
            .map(|s| format!("-f {s} "))
            .collect();

        let mut lines = vec![
            "This lock file was generated by polylock. DO NOT EDIT!".to_owned(),
            String::new(),
            "A lock file pins a concrete list of package versions (with checksums) for every"
                .to_owned(),
            "platform. The environment it describes does not change as new package versions"
                .to_owned(),
            "become available, unless the lock file is explicitly updated.".to_owned(),
            String::new(),
            "Install the packages listed for your platform with conda (manager = \"conda\")"
                .to_owned(),
            "and then pip (manager = \"pip\").".to_owned(),
        ];
        if categories.contains(DEV_CATEGORY) {
            lines.push(String::new());
            lines.push(
                "This lock contains optional development dependencies (category \"dev\")."
                    .to_owned(),
            );
        }
        let extras: Vec<&str> = categories
            .iter()
            .copied()
            .filter(|c| *c != MAIN_CATEGORY && *c != DEV_CATEGORY)
            .collect();
        if !extras.is_empty() {
            lines.push(String::new());
            lines.push(format!(
                "This lock contains optional dependency categories {}.",
                extras.join(", ")
            ));
        }
        lines.push(String::new());
        lines.push(
            "To update a single package to the latest version compatible with the version constraints in the source:"
                .to_owned(),
        );
        lines.push(format!("    polylock lock {md_flags}--lockfile {name} --update PACKAGE"));
        lines.push(
            "To re-solve the entire environment, e.g. after changing a version constraint in the source file:"
                .to_owned(),
        );
        lines.push(format!("    polylock lock {md_flags}{source_flags}--lockfile {name}"));

        let mut out = String::new();
        for line in lines {
            out.push_str(format!("# {line}").trim_end());
            out.push('\n');
        }
        out.push('\n');
        out
    }
}

/// Kahn's algorithm per `(platform, manager)`, platforms sorted, conda first.
///
/// Ready nodes are taken in name order; a cycle is broken by emitting the
/// smallest remaining name. Dependencies outside the group are ignored.
pub fn toposort(packages: Vec<LockedDependency>) -> Vec<LockedDependency> {
    let platforms: BTreeSet<Platform> = packages.iter().map(|p| p.platform.clone()).collect();
    let mut by_group: BTreeMap<(Platform, Manager), BTreeMap<String, LockedDependency>> =
        BTreeMap::new();
    for pkg in packages {
        if is_virtual_package(&pkg.name) {
            continue;
        }
        by_group
            .entry((pkg.platform.clone(), pkg.manager))
            .or_default()
            .insert(pkg.name.clone(), pkg);
    }

    let mut out = Vec::new();
    for platform in platforms {
        for manager in [Manager::Conda, Manager::Pip] {
            let Some(mut group) = by_group.remove(&(platform.clone(), manager)) else {
                continue;
            };
            let mut pending: BTreeMap<String, BTreeSet<String>> = group
                .iter()
                .map(|(name, pkg)| {
                    let deps = pkg
                        .dependencies
                        .keys()
                        .filter(|d| *d != name && group.contains_key(*d))
                        .cloned()
                        .collect();
                    (name.clone(), deps)
                })
                .collect();

            while !pending.is_empty() {
                let ready: Vec<String> = pending
                    .iter()
                    .filter(|(_, deps)| deps.is_empty())
                    .map(|(name, _)| name.clone())
                    .collect();
                let batch = if ready.is_empty() {
                    pending.keys().next().cloned().into_iter().collect()
                } else {
                    ready
                };
                for name in batch {
                    pending.remove(&name);
                    for deps in pending.values_mut() {
                        deps.remove(&name);
                    }
                    if let Some(pkg) = group.remove(&name) {
                        out.push(pkg);
                    }
                }
            }
        }
    }
    out
}
