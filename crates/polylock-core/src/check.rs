//! Checking an existing lockfile against a specification without solving.

use crate::index::version_matches;
use crate::CoreError;
use polylock_schema::{
    is_virtual_package, DependencySource, LockSpecification, LockedDependency, Lockfile, Manager,
    Platform, DEV_CATEGORY, MAIN_CATEGORY,
};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

/// A locked root whose version falls outside what the specification asks for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionMismatch {
    pub name: String,
    pub locked: String,
    pub constraint: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryCheck {
    pub category: String,
    pub manager: Manager,
    /// Requested by the specification but absent from the lockfile.
    pub missing: Vec<String>,
    /// Apparent roots in the lockfile that nothing in the specification requests.
    pub extra: Vec<String>,
    pub mismatched: Vec<VersionMismatch>,
}

impl CategoryCheck {
    pub fn passed(&self) -> bool {
        self.missing.is_empty() && self.extra.is_empty() && self.mismatched.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlatformCheck {
    pub platform: Platform,
    /// Whether the stored content hash still matches the specification.
    pub content_hash_current: bool,
    pub categories: Vec<CategoryCheck>,
}

impl PlatformCheck {
    pub fn passed(&self) -> bool {
        self.categories.iter().all(CategoryCheck::passed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckReport {
    pub passed: bool,
    pub platforms: Vec<PlatformCheck>,
}

/// `main`, then `dev` when requested, then the named extras.
pub fn categories_to_check(include_dev: bool, extras: &[String]) -> Vec<String> {
    let mut out = vec![MAIN_CATEGORY.to_owned()];
    if include_dev {
        out.push(DEV_CATEGORY.to_owned());
    }
    for extra in extras {
        if !out.contains(extra) {
            out.push(extra.clone());
        }
    }
    out
}

/// Compare the packages of `lockfile` with the roots `spec` requests.
///
/// Lockfile roots are inferred as the packages of a platform/category/manager
/// slice that no other member of the slice depends on. A requested package
/// that is also a dependency of another requested package is therefore not
/// seen as a root, but it is still found by the `missing` check.
///
/// Requested roots pinned by version must also satisfy their constraint;
/// url, vcs and path sources are not version-checked.
///
/// `current_hashes` lists the platforms whose stored content hash is still
/// valid; it only annotates the report.
pub fn check_lockfile(
    lockfile: &Lockfile,
    spec: &LockSpecification,
    categories: &[String],
    current_hashes: &BTreeSet<Platform>,
) -> Result<CheckReport, CoreError> {
    let spec_platforms = spec.platforms();
    let common: Vec<Platform> = lockfile
        .platforms()
        .iter()
        .filter(|p| spec_platforms.contains(*p))
        .cloned()
        .collect();
    if common.is_empty() {
        return Err(CoreError::NoCommonPlatforms {
            lockfile: lockfile.platforms().to_vec(),
            spec: spec_platforms,
        });
    }

    let mut platforms = Vec::new();
    for platform in common {
        let mut checks = Vec::new();
        for category in categories {
            for manager in [Manager::Conda, Manager::Pip] {
                checks.push(check_slice(lockfile, spec, &platform, category, manager));
            }
        }
        platforms.push(PlatformCheck {
            content_hash_current: current_hashes.contains(&platform),
            platform,
            categories: checks,
        });
    }

    let passed = platforms.iter().all(PlatformCheck::passed);
    info!(
        "checked {} platform(s): {}",
        platforms.len(),
        if passed { "consistent" } else { "out of date" }
    );
    Ok(CheckReport { passed, platforms })
}

fn check_slice(
    lockfile: &Lockfile,
    spec: &LockSpecification,
    platform: &Platform,
    category: &str,
    manager: Manager,
) -> CategoryCheck {
    let slice: Vec<_> = lockfile
        .packages_for(platform)
        .filter(|p| p.category == category && p.manager == manager)
        .filter(|p| !is_virtual_package(&p.name))
        .collect();
    let names: BTreeSet<&str> = slice.iter().map(|p| p.name.as_str()).collect();
    let depended_on: BTreeSet<&str> = slice
        .iter()
        .flat_map(|p| p.dependencies.keys())
        .map(String::as_str)
        .collect();
    let roots: BTreeSet<&str> = names.difference(&depended_on).copied().collect();

    let requested: BTreeMap<&str, &DependencySource> = spec
        .dependencies_for(platform)
        .iter()
        .filter(|d| d.category == category && d.manager == manager)
        .map(|d| (d.name.as_str(), &d.source))
        .collect();

    let missing: Vec<String> = requested
        .keys()
        .filter(|n| !names.contains(*n))
        .map(|n| (*n).to_owned())
        .collect();
    let extra: Vec<String> = roots
        .iter()
        .filter(|n| !requested.contains_key(*n))
        .map(|n| (*n).to_owned())
        .collect();
    let mismatched: Vec<VersionMismatch> = slice
        .iter()
        .filter(|p| roots.contains(p.name.as_str()))
        .filter_map(|p| {
            let source = requested.get(p.name.as_str())?;
            root_mismatch(p, source)
        })
        .collect();
    if !missing.is_empty() || !extra.is_empty() || !mismatched.is_empty() {
        debug!(
            "{platform} {category} {manager}: missing {missing:?}, extra {extra:?}, \
             mismatched {mismatched:?}"
        );
    }

    CategoryCheck {
        category: category.to_owned(),
        manager,
        missing,
        extra,
        mismatched,
    }
}

fn root_mismatch(pkg: &LockedDependency, source: &DependencySource) -> Option<VersionMismatch> {
    match source {
        DependencySource::Versioned { version, .. } => {
            if version_matches(version, &pkg.version) {
                None
            } else {
                Some(VersionMismatch {
                    name: pkg.name.clone(),
                    locked: pkg.version.clone(),
                    constraint: version.clone(),
                })
            }
        }
        DependencySource::Url { .. }
        | DependencySource::Vcs { .. }
        | DependencySource::Path { .. } => {
            warn!("{} is not checked for version compatibility", pkg.name);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polylock_schema::{Dependency, HashModel, LockMeta, LockedDependency};
    use std::collections::BTreeMap;

    fn locked(name: &str, platform: &str, category: &str, deps: &[&str]) -> LockedDependency {
        locked_at(name, "1.0", platform, category, deps)
    }

    fn locked_at(
        name: &str,
        version: &str,
        platform: &str,
        category: &str,
        deps: &[&str],
    ) -> LockedDependency {
        let mut pkg = LockedDependency {
            name: name.to_owned(),
            version: version.to_owned(),
            manager: Manager::Conda,
            platform: Platform::new(platform),
            dependencies: deps.iter().map(|d| ((*d).to_owned(), "*".to_owned())).collect(),
            url: format!("https://example.invalid/{name}"),
            hash: HashModel {
                md5: Some("0".repeat(32)),
                sha256: None,
            },
            category: MAIN_CATEGORY.to_owned(),
            optional: false,
            source: None,
            build: None,
        };
        pkg.set_category(category);
        pkg
    }

    fn lockfile(platforms: &[&str], package: Vec<LockedDependency>) -> Lockfile {
        Lockfile::new(
            LockMeta {
                platforms: platforms.iter().map(|p| Platform::new(*p)).collect(),
                ..LockMeta::default()
            },
            package,
        )
    }

    fn spec(platforms: &[&str], deps: &[Dependency]) -> LockSpecification {
        LockSpecification {
            dependencies: platforms
                .iter()
                .map(|p| (Platform::new(*p), deps.to_vec()))
                .collect::<BTreeMap<_, _>>(),
            ..LockSpecification::default()
        }
    }

    fn main_only() -> Vec<String> {
        categories_to_check(false, &[])
    }

    #[test]
    fn category_selection() {
        assert_eq!(main_only(), vec!["main"]);
        assert_eq!(
            categories_to_check(true, &["docs".to_owned(), "dev".to_owned()]),
            vec!["main", "dev", "docs"]
        );
    }

    #[test]
    fn consistent_lockfile_passes() {
        let lock = lockfile(
            &["linux-64"],
            vec![
                locked("python", "linux-64", "main", &["libffi"]),
                locked("libffi", "linux-64", "main", &[]),
            ],
        );
        let spec = spec(&["linux-64"], &[Dependency::versioned("python", Manager::Conda, "*")]);
        let report = check_lockfile(&lock, &spec, &main_only(), &BTreeSet::new()).unwrap();
        assert!(report.passed);
        assert!(!report.platforms[0].content_hash_current);
    }

    #[test]
    fn missing_and_extra_roots_are_reported() {
        let lock = lockfile(
            &["linux-64"],
            vec![
                locked("python", "linux-64", "main", &[]),
                locked("numpy", "linux-64", "main", &[]),
            ],
        );
        let spec = spec(
            &["linux-64"],
            &[
                Dependency::versioned("python", Manager::Conda, "*"),
                Dependency::versioned("pandas", Manager::Conda, "*"),
            ],
        );
        let report = check_lockfile(&lock, &spec, &main_only(), &BTreeSet::new()).unwrap();
        assert!(!report.passed);
        let conda_main = &report.platforms[0].categories[0];
        assert_eq!(conda_main.missing, vec!["pandas"]);
        assert_eq!(conda_main.extra, vec!["numpy"]);
    }

    #[test]
    fn only_selected_categories_are_compared() {
        let lock = lockfile(
            &["linux-64"],
            vec![
                locked("python", "linux-64", "main", &[]),
                locked("pytest", "linux-64", "dev", &[]),
            ],
        );
        let spec = spec(&["linux-64"], &[Dependency::versioned("python", Manager::Conda, "*")]);
        assert!(check_lockfile(&lock, &spec, &main_only(), &BTreeSet::new()).unwrap().passed);
        let with_dev = categories_to_check(true, &[]);
        let report = check_lockfile(&lock, &spec, &with_dev, &BTreeSet::new()).unwrap();
        assert!(!report.passed);
        let dev = report.platforms[0]
            .categories
            .iter()
            .find(|c| c.category == "dev" && c.manager == Manager::Conda)
            .unwrap();
        assert_eq!(dev.extra, vec!["pytest"]);
    }

    #[test]
    fn requested_dependency_of_another_root_is_not_extra() {
        let lock = lockfile(
            &["osx-64"],
            vec![
                locked("app", "osx-64", "main", &["requests-lite"]),
                locked("requests-lite", "osx-64", "main", &[]),
            ],
        );
        let spec = spec(
            &["osx-64"],
            &[
                Dependency::versioned("app", Manager::Conda, "*"),
                Dependency::versioned("requests-lite", Manager::Conda, "*"),
            ],
        );
        assert!(check_lockfile(&lock, &spec, &main_only(), &BTreeSet::new()).unwrap().passed);
    }

    #[test]
    fn root_outside_its_constraint_is_mismatched() {
        let lock = lockfile(
            &["linux-64"],
            vec![locked_at("python", "3.11.9", "linux-64", "main", &[])],
        );
        let spec = spec(
            &["linux-64"],
            &[Dependency::versioned("python", Manager::Conda, "3.12.*")],
        );
        let report = check_lockfile(&lock, &spec, &main_only(), &BTreeSet::new()).unwrap();
        assert!(!report.passed);
        let conda_main = &report.platforms[0].categories[0];
        assert!(conda_main.missing.is_empty());
        assert!(conda_main.extra.is_empty());
        assert_eq!(
            conda_main.mismatched,
            vec![VersionMismatch {
                name: "python".to_owned(),
                locked: "3.11.9".to_owned(),
                constraint: "3.12.*".to_owned(),
            }]
        );
    }

    #[test]
    fn root_within_its_constraint_passes() {
        let lock = lockfile(
            &["linux-64"],
            vec![locked_at("python", "3.12.4", "linux-64", "main", &[])],
        );
        let spec = spec(
            &["linux-64"],
            &[Dependency::versioned("python", Manager::Conda, ">=3.12,<3.13")],
        );
        assert!(check_lockfile(&lock, &spec, &main_only(), &BTreeSet::new()).unwrap().passed);
    }

    #[test]
    fn non_root_requested_package_is_not_version_checked() {
        let lock = lockfile(
            &["linux-64"],
            vec![
                locked_at("app", "2.0", "linux-64", "main", &["libfoo"]),
                locked_at("libfoo", "1.0", "linux-64", "main", &[]),
            ],
        );
        let spec = spec(
            &["linux-64"],
            &[
                Dependency::versioned("app", Manager::Conda, "2.*"),
                Dependency::versioned("libfoo", Manager::Conda, ">=5"),
            ],
        );
        assert!(check_lockfile(&lock, &spec, &main_only(), &BTreeSet::new()).unwrap().passed);
    }

    #[test]
    fn only_common_platforms_are_checked() {
        let lock = lockfile(
            &["linux-64", "win-64"],
            vec![locked("python", "linux-64", "main", &[])],
        );
        let spec = spec(
            &["linux-64", "osx-64"],
            &[Dependency::versioned("python", Manager::Conda, "*")],
        );
        let report = check_lockfile(&lock, &spec, &main_only(), &BTreeSet::new()).unwrap();
        assert_eq!(report.platforms.len(), 1);
        assert_eq!(report.platforms[0].platform, "linux-64");
    }

    #[test]
    fn disjoint_platforms_are_an_error() {
        let lock = lockfile(&["win-64"], Vec::new());
        let spec = spec(&["linux-64"], &[]);
        assert!(matches!(
            check_lockfile(&lock, &spec, &main_only(), &BTreeSet::new()),
            Err(CoreError::NoCommonPlatforms { .. })
        ));
    }
}
