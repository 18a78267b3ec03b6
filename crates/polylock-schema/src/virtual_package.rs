//! Synthetic capability packages (`__glibc`, `__osx`, `__cuda`, ...).
//!
//! A solver needs to know which system capabilities a target platform offers.
//! They are modelled as fake packages grouped into a per-subdir repodata
//! document; that document is also part of the content hash, so changing the
//! assumed capabilities invalidates existing locks.

use crate::types::is_virtual_package;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// 2020-01-01T00:00:00 in milliseconds, the fixed timestamp of every fake package.
pub const DEFAULT_TIMESTAMP: i64 = 1_577_854_800_000;

pub const DEFAULT_CUDA_VERSION: &str = "11.4";

const BASE_SUBDIRS: &[&str] = &[
    "noarch",
    "linux-aarch64",
    "linux-ppc64le",
    "linux-64",
    "osx-64",
    "osx-arm64",
    "win-64",
];

const LINUX: &[&str] = &["linux-aarch64", "linux-ppc64le", "linux-64"];

#[derive(Debug, Error)]
pub enum VirtualPackageError {
    #[error("failed to read virtual package file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse virtual package file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("'{0}' is not a virtual package (names must start with '__')")]
    NotVirtual(String),
}

/// The metadata a solver needs to treat a capability as an installable package.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FakePackage {
    pub name: String,
    pub version: String,
    pub build_string: String,
    pub build_number: u32,
    pub noarch: String,
    pub depends: Vec<String>,
    pub timestamp: i64,
    pub package_type: Option<String>,
}

impl FakePackage {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            build_string: String::new(),
            build_number: 0,
            noarch: String::new(),
            depends: Vec::new(),
            timestamp: DEFAULT_TIMESTAMP,
            package_type: Some("virtual_system".to_owned()),
        }
    }

    #[must_use]
    pub fn with_build_string(mut self, build_string: impl Into<String>) -> Self {
        self.build_string = build_string.into();
        self
    }

    pub fn build(&self) -> String {
        if self.build_string.is_empty() {
            self.build_number.to_string()
        } else {
            self.build_string.clone()
        }
    }

    /// File name and repodata record for `subdir`.
    pub fn repodata_entry(&self, subdir: &str) -> (String, Value) {
        let build = self.build();
        let file_name = format!("{}-{}-{build}.tar.bz2", self.name, self.version);
        let entry = json!({
            "name": self.name,
            "version": self.version,
            "build_string": self.build_string,
            "build_number": self.build_number,
            "noarch": self.noarch,
            "depends": self.depends,
            "timestamp": self.timestamp,
            "package_type": self.package_type,
            "build": build,
            "subdir": subdir,
        });
        (file_name, entry)
    }
}

/// Fake packages assigned to subdirs, rendered as per-subdir repodata.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VirtualPackageRepo {
    packages: BTreeMap<FakePackage, BTreeSet<String>>,
    repodata: BTreeMap<String, Value>,
}

impl VirtualPackageRepo {
    /// Add a package to the given subdirs, or to `noarch` when none are given.
    pub fn add_package<I, S>(&mut self, package: FakePackage, subdirs: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut subdirs: BTreeSet<String> = subdirs.into_iter().map(Into::into).collect();
        if subdirs.is_empty() {
            subdirs.insert("noarch".to_owned());
        }
        self.packages.entry(package).or_default().extend(subdirs);
        self.render();
    }

    pub fn packages(&self) -> impl Iterator<Item = (&FakePackage, &BTreeSet<String>)> {
        self.packages.iter()
    }

    /// Packages offered on `platform` (including noarch).
    pub fn packages_for(&self, platform: &str) -> Vec<&FakePackage> {
        self.packages
            .iter()
            .filter(|(_, subdirs)| subdirs.contains(platform) || subdirs.contains("noarch"))
            .map(|(pkg, _)| pkg)
            .collect()
    }

    /// Rendered repodata for every known subdir.
    pub fn all_repodata(&self) -> &BTreeMap<String, Value> {
        &self.repodata
    }

    fn render(&mut self) {
        let mut subdirs: BTreeSet<String> = BASE_SUBDIRS.iter().map(|s| (*s).to_owned()).collect();
        for assigned in self.packages.values() {
            subdirs.extend(assigned.iter().cloned());
        }

        self.repodata = subdirs
            .into_iter()
            .map(|subdir| {
                let mut packages = Map::new();
                for (pkg, assigned) in &self.packages {
                    if assigned.contains(&subdir) {
                        let (file_name, entry) = pkg.repodata_entry(&subdir);
                        packages.insert(file_name, entry);
                    }
                }
                let doc = json!({ "info": { "subdir": subdir }, "packages": packages });
                (subdir, doc)
            })
            .collect();
    }

    /// Whether this repository is the built-in default for the given CUDA version.
    pub fn is_default(&self, cuda_version: &str) -> bool {
        *self == default_virtual_package_repo(cuda_version)
    }

    /// Load a capability override file:
    ///
    /// ```toml
    /// [subdirs.linux-64.packages]
    /// __glibc = "2.28"
    /// __archspec = "1 x86_64"
    /// ```
    pub fn from_spec_file(path: impl AsRef<Path>) -> Result<Self, VirtualPackageError> {
        let content = fs::read_to_string(path)?;
        Self::from_spec_str(&content)
    }

    pub fn from_spec_str(input: &str) -> Result<Self, VirtualPackageError> {
        let spec: VirtualPackageSpec = toml::from_str(input)?;
        tracing::debug!("virtual package spec covers {} subdirs", spec.subdirs.len());

        let mut repo = Self::default();
        for (subdir, subdir_spec) in spec.subdirs {
            for (name, version_spec) in subdir_spec.packages {
                if !is_virtual_package(&name) {
                    return Err(VirtualPackageError::NotVirtual(name));
                }
                let mut parts = version_spec.split_whitespace();
                let version = parts.next().unwrap_or("0").to_owned();
                let build_string = parts.next().unwrap_or_default().to_owned();
                repo.add_package(
                    FakePackage::new(name, version).with_build_string(build_string),
                    [subdir.clone()],
                );
            }
        }
        Ok(repo)
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct VirtualPackageSpec {
    subdirs: BTreeMap<String, VirtualPackageSubdir>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct VirtualPackageSubdir {
    packages: BTreeMap<String, String>,
}

/// A conservative set of capabilities that any supported platform provides.
///
/// An empty `cuda_version` means CUDA is unavailable.
pub fn default_virtual_package_repo(cuda_version: &str) -> VirtualPackageRepo {
    let mut repo = VirtualPackageRepo::default();

    repo.add_package(
        FakePackage::new("__unix", "0"),
        ["linux-aarch64", "linux-ppc64le", "linux-64", "osx-64", "osx-arm64"],
    );
    repo.add_package(FakePackage::new("__linux", "5.10"), LINUX.iter().copied());
    repo.add_package(FakePackage::new("__win", "0"), ["win-64"]);

    repo.add_package(
        FakePackage::new("__archspec", "1").with_build_string("x86_64"),
        ["win-64", "linux-64", "osx-64"],
    );
    repo.add_package(
        FakePackage::new("__archspec", "1").with_build_string("arm64"),
        ["osx-arm64"],
    );
    repo.add_package(
        FakePackage::new("__archspec", "1").with_build_string("aarch64"),
        ["linux-aarch64"],
    );
    repo.add_package(
        FakePackage::new("__archspec", "1").with_build_string("ppc64le"),
        ["linux-ppc64le"],
    );

    repo.add_package(FakePackage::new("__glibc", "2.17"), LINUX.iter().copied());

    if !cuda_version.is_empty() {
        repo.add_package(
            FakePackage::new("__cuda", cuda_version),
            ["linux-aarch64", "linux-ppc64le", "linux-64", "win-64"],
        );
    }

    repo.add_package(FakePackage::new("__osx", "10.15"), ["osx-64"]);
    repo.add_package(FakePackage::new("__osx", "11.0"), ["osx-64", "osx-arm64"]);
    repo
}
