//! A solver backed by a static package index file.
//!
//! The index is a TOML document of `[[package]]` tables. Resolution is a
//! greedy breadth-first walk: the first constraint seen for a name picks the
//! highest matching version, and there is no backtracking.

use crate::lookup::canonicalize_name;
use crate::solver::{SolveError, Solver};
use polylock_schema::{
    is_virtual_package, Dependency, DependencySource, HashModel, LockedDependency, Manager,
    Platform, VirtualPackageRepo, MAIN_CATEGORY,
};
use serde::Deserialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("failed to read package index: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse package index: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid package index entry {name} {version}: {reason}")]
    Invalid {
        name: String,
        version: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IndexedPackage {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub manager: Manager,
    /// Platforms the package is available on; empty means all of them.
    #[serde(default)]
    pub platforms: Vec<Platform>,
    #[serde(default)]
    pub build: Option<String>,
    /// Download URL; `{platform}` is substituted.
    pub url: String,
    #[serde(default)]
    pub md5: Option<String>,
    #[serde(default)]
    pub sha256: Option<String>,
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
}

impl IndexedPackage {
    fn available_on(&self, platform: &Platform) -> bool {
        self.platforms.is_empty() || self.platforms.contains(platform)
    }

    fn matches_name(&self, manager: Manager, name: &str) -> bool {
        self.manager == manager
            && match manager {
                Manager::Conda => self.name == name,
                Manager::Pip => canonicalize_name(&self.name) == canonicalize_name(name),
            }
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct IndexDocument {
    #[serde(default)]
    package: Vec<IndexedPackage>,
}

#[derive(Debug, Clone, Default)]
pub struct IndexSolver {
    packages: Vec<IndexedPackage>,
    virtual_packages: Option<VirtualPackageRepo>,
}

impl IndexSolver {
    pub fn new(packages: Vec<IndexedPackage>) -> Result<Self, IndexError> {
        for pkg in &packages {
            if pkg.manager == Manager::Conda && pkg.md5.is_none() {
                return Err(IndexError::Invalid {
                    name: pkg.name.clone(),
                    version: pkg.version.clone(),
                    reason: "conda packages need an md5 hash".to_owned(),
                });
            }
            if pkg.url.is_empty() {
                return Err(IndexError::Invalid {
                    name: pkg.name.clone(),
                    version: pkg.version.clone(),
                    reason: "empty url".to_owned(),
                });
            }
        }
        Ok(Self {
            packages,
            virtual_packages: None,
        })
    }

    pub fn from_toml_str(input: &str) -> Result<Self, IndexError> {
        let doc: IndexDocument = toml::from_str(input)?;
        Self::new(doc.package)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, IndexError> {
        let path = path.as_ref();
        let solver = Self::from_toml_str(&fs::read_to_string(path)?)?;
        debug!("loaded {} index entries from {}", solver.packages.len(), path.display());
        Ok(solver)
    }

    /// Require `__*` dependencies to be offered by `repo` on the solved platform.
    #[must_use]
    pub fn with_virtual_packages(mut self, repo: VirtualPackageRepo) -> Self {
        self.virtual_packages = Some(repo);
        self
    }

    fn pick(
        &self,
        platform: &Platform,
        manager: Manager,
        name: &str,
        constraint: &str,
        pinned: Option<&LockedDependency>,
    ) -> Option<&IndexedPackage> {
        let candidates: Vec<&IndexedPackage> = self
            .packages
            .iter()
            .filter(|p| p.matches_name(manager, name) && p.available_on(platform))
            .filter(|p| version_matches(constraint, &p.version))
            .collect();
        if let Some(pin) = pinned {
            if let Some(kept) = candidates.iter().find(|p| p.version == pin.version) {
                return Some(kept);
            }
        }
        candidates
            .into_iter()
            .max_by(|a, b| compare_versions(&a.version, &b.version))
    }

    fn check_capability(&self, platform: &Platform, name: &str) -> Result<(), SolveError> {
        let Some(repo) = &self.virtual_packages else {
            return Ok(());
        };
        if repo.packages_for(platform).iter().any(|p| p.name == name) {
            Ok(())
        } else {
            Err(SolveError::new(
                platform,
                format!("capability {name} is not available"),
            ))
        }
    }
}

impl Solver for IndexSolver {
    fn solve(
        &self,
        platform: &Platform,
        requested: &[Dependency],
        locked: &[LockedDependency],
        update: &[String],
    ) -> Result<Vec<LockedDependency>, SolveError> {
        let mut queue: VecDeque<(Manager, String, String, Option<&Dependency>)> = requested
            .iter()
            .map(|d| {
                let constraint = d.version().unwrap_or("*").to_owned();
                (d.manager, d.name.clone(), constraint, Some(d))
            })
            .collect();

        let mut chosen: BTreeMap<(Manager, String), LockedDependency> = BTreeMap::new();
        while let Some((manager, name, constraint, origin)) = queue.pop_front() {
            if is_virtual_package(&name) {
                self.check_capability(platform, &name)?;
                continue;
            }
            let key = match manager {
                Manager::Conda => (manager, name.clone()),
                Manager::Pip => (manager, canonicalize_name(&name)),
            };
            if chosen.contains_key(&key) {
                continue;
            }

            let pinned = if update.iter().any(|u| *u == name) {
                None
            } else {
                locked
                    .iter()
                    .find(|l| l.manager == manager && l.name == name)
            };
            let pkg = self
                .pick(platform, manager, &name, &constraint, pinned)
                .ok_or_else(|| {
                    SolveError::new(
                        platform,
                        format!("nothing provides {manager} package {name} {constraint}"),
                    )
                })?;

            let mut url = pkg.url.replace("{platform}", platform);
            if let Some(DependencySource::Url { url: declared, .. }) = origin.map(|d| &d.source) {
                url.clone_from(declared);
            }
            for (dep, dep_constraint) in &pkg.dependencies {
                queue.push_back((manager, dep.clone(), dep_constraint.clone(), None));
            }
            chosen.insert(
                key,
                LockedDependency {
                    name: pkg.name.clone(),
                    version: pkg.version.clone(),
                    manager,
                    platform: platform.clone(),
                    dependencies: pkg.dependencies.clone(),
                    url,
                    hash: HashModel {
                        md5: pkg.md5.clone(),
                        sha256: pkg.sha256.clone(),
                    },
                    category: MAIN_CATEGORY.to_owned(),
                    optional: false,
                    source: None,
                    build: pkg.build.clone(),
                },
            );
        }
        Ok(chosen.into_values().collect())
    }
}

/// Whether `version` satisfies a comma-separated constraint list.
///
/// Supports `*`, `1.2.*`, bare or `==` pins, `!=`, `>=`, `<=`, `>`, `<` and
/// `~=`. A conda build string after a space is ignored.
pub fn version_matches(constraint: &str, version: &str) -> bool {
    let constraint = constraint.split_whitespace().next().unwrap_or("*");
    constraint
        .split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .all(|clause| clause_matches(clause, version))
}

fn clause_matches(clause: &str, version: &str) -> bool {
    const OPERATORS: [&str; 8] = [">=", "<=", "==", "!=", "~=", ">", "<", "="];
    let (op, value) = OPERATORS
        .iter()
        .find_map(|op| clause.strip_prefix(op).map(|rest| (*op, rest.trim())))
        .unwrap_or(("==", clause));

    if value == "*" {
        return op != "!=";
    }
    if let Some(prefix) = value.strip_suffix(".*") {
        let hit = version == prefix || version.starts_with(&format!("{prefix}."));
        return if op == "!=" { !hit } else { hit };
    }

    let ord = compare_versions(version, value);
    match op {
        ">=" => ord != Ordering::Less,
        "<=" => ord != Ordering::Greater,
        ">" => ord == Ordering::Greater,
        "<" => ord == Ordering::Less,
        "!=" => ord != Ordering::Equal,
        "~=" => {
            let mut parts: Vec<&str> = value.split('.').collect();
            if parts.len() > 1 {
                parts.pop();
            }
            let prefix = parts.join(".");
            ord != Ordering::Less
                && (version == prefix || version.starts_with(&format!("{prefix}.")))
        }
        _ => ord == Ordering::Equal,
    }
}

/// Dotted comparison; numeric segments compare as numbers, missing ones as `0`.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let left: Vec<&str> = a.split('.').collect();
    let right: Vec<&str> = b.split('.').collect();
    for i in 0..left.len().max(right.len()) {
        let l = left.get(i).copied().unwrap_or("0");
        let r = right.get(i).copied().unwrap_or("0");
        let ord = match (l.parse::<u64>(), r.parse::<u64>()) {
            (Ok(x), Ok(y)) => x.cmp(&y),
            _ => l.cmp(r),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}
