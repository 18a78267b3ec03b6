//! Per-platform content hashing of lock specifications.
//!
//! The hash is BLAKE3 over a canonical JSON document (object keys sorted at
//! every level) holding the channels, the platform's dependencies sorted by
//! `(manager, name)`, the pip repositories when there are any, and the
//! capability repodata for `noarch` and the platform when a repository is
//! supplied.
//!
//! Changing anything in this document is a breaking change: every existing
//! lockfile would look stale. Older variants of the document are still
//! accepted through [`backwards_compatible_content_hashes`].

use crate::spec::LockSpecification;
use crate::types::{ContentHash, Platform};
use crate::virtual_package::VirtualPackageRepo;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

const OSX_10_15: &str = "__osx-10.15-0.tar.bz2";
const OSX_11_0: &str = "__osx-11.0-0.tar.bz2";

/// Content hash of every platform in `spec`.
pub fn compute_content_hashes(
    spec: &LockSpecification,
    virtual_packages: Option<&VirtualPackageRepo>,
) -> Result<BTreeMap<Platform, ContentHash>, serde_json::Error> {
    let repodata = virtual_packages.map(VirtualPackageRepo::all_repodata);
    spec.dependencies
        .keys()
        .map(|platform| {
            let content = content_for_platform(spec, platform, repodata, false)?;
            Ok((platform.clone(), digest(&content)?))
        })
        .collect()
}

/// Content hash of a single platform.
pub fn content_hash_for_platform(
    spec: &LockSpecification,
    virtual_packages: Option<&VirtualPackageRepo>,
    platform: &str,
) -> Result<ContentHash, serde_json::Error> {
    let repodata = virtual_packages.map(VirtualPackageRepo::all_repodata);
    digest(&content_for_platform(spec, platform, repodata, false)?)
}

/// Every hash an equivalent specification could have been stored under.
///
/// Covers capability builds that still carried the `_<build_number>` suffix,
/// `osx-64` repositories with and without the redundant `__osx 10.15` entry,
/// and dependency records written before `markers`/`subdirectory` existed.
pub fn backwards_compatible_content_hashes(
    spec: &LockSpecification,
    virtual_packages: Option<&VirtualPackageRepo>,
    platform: &str,
) -> Result<BTreeSet<ContentHash>, serde_json::Error> {
    let mut variants: Vec<Option<BTreeMap<String, Value>>> = Vec::new();
    match virtual_packages {
        None => variants.push(None),
        Some(repo) => {
            let base = repo.all_repodata().clone();
            let mut repos = vec![base];
            if platform == "osx-64" && contains_osx_11(&repos[0]) {
                repos.push(toggle_osx_10_15(&repos[0]));
            }
            for rd in repos.clone() {
                repos.push(reinsert_build_number(&rd));
            }
            variants.extend(repos.into_iter().map(Some));
        }
    }

    let mut allowed = BTreeSet::new();
    for repodata in &variants {
        for drop_nulls in [false, true] {
            let content = content_for_platform(spec, platform, repodata.as_ref(), drop_nulls)?;
            allowed.insert(digest(&content)?);
        }
    }
    Ok(allowed)
}

fn content_for_platform(
    spec: &LockSpecification,
    platform: &str,
    repodata: Option<&BTreeMap<String, Value>>,
    drop_new_nulls: bool,
) -> Result<Value, serde_json::Error> {
    let mut doc = Map::new();

    let channels = spec
        .channels
        .iter()
        .map(|c| serde_json::to_string(c).map(Value::String))
        .collect::<Result<Vec<_>, _>>()?;
    doc.insert("channels".to_owned(), Value::Array(channels));

    let mut deps: Vec<_> = spec.dependencies_for(platform).iter().collect();
    deps.sort_by(|a, b| (a.manager, &a.name).cmp(&(b.manager, &b.name)));
    let mut specs = Vec::with_capacity(deps.len());
    for dep in deps {
        let mut value = serde_json::to_value(dep)?;
        if drop_new_nulls {
            if let Value::Object(obj) = &mut value {
                for field in ["markers", "subdirectory"] {
                    if obj.get(field).is_some_and(Value::is_null) {
                        obj.remove(field);
                    }
                }
            }
        }
        specs.push(value);
    }
    doc.insert("specs".to_owned(), Value::Array(specs));

    if !spec.pip_repositories.is_empty() {
        let repos = spec
            .pip_repositories
            .iter()
            .map(|r| serde_json::to_string(r).map(Value::String))
            .collect::<Result<Vec<_>, _>>()?;
        doc.insert("pip_repositories".to_owned(), Value::Array(repos));
    }

    // An absent repository leaves the key out; `{}` would hash differently.
    if let Some(repodata) = repodata {
        let subset = |subdir: &str| {
            repodata
                .get(subdir)
                .cloned()
                .unwrap_or_else(|| Value::Object(Map::new()))
        };
        let mut vph = Map::new();
        vph.insert("noarch".to_owned(), subset("noarch"));
        vph.insert(platform.to_owned(), subset(platform));
        doc.insert("virtual_package_hash".to_owned(), Value::Object(vph));
    }

    Ok(Value::Object(doc))
}

fn digest(content: &Value) -> Result<ContentHash, serde_json::Error> {
    let canonical = serde_json::to_string(&sort_keys(content))?;
    Ok(ContentHash::new(blake3::hash(canonical.as_bytes()).to_hex().to_string()))
}

fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(obj) => {
            let sorted: BTreeMap<&String, Value> =
                obj.iter().map(|(k, v)| (k, sort_keys(v))).collect();
            Value::Object(sorted.into_iter().map(|(k, v)| (k.clone(), v)).collect())
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}

fn contains_osx_11(repodata: &BTreeMap<String, Value>) -> bool {
    repodata
        .get("osx-64")
        .and_then(|rd| rd.get("packages"))
        .and_then(|pkgs| pkgs.get(OSX_11_0))
        .is_some_and(|entry| entry["version"] == "11.0" && entry["build"] == "0")
}

fn toggle_osx_10_15(repodata: &BTreeMap<String, Value>) -> BTreeMap<String, Value> {
    let mut result = repodata.clone();
    if let Some(Value::Object(packages)) = result
        .get_mut("osx-64")
        .and_then(|rd| rd.get_mut("packages"))
    {
        if packages.remove(OSX_10_15).is_none() {
            let (_, entry) = crate::virtual_package::FakePackage::new("__osx", "10.15")
                .repodata_entry("osx-64");
            packages.insert(OSX_10_15.to_owned(), entry);
        }
    }
    result
}

fn reinsert_build_number(repodata: &BTreeMap<String, Value>) -> BTreeMap<String, Value> {
    let mut result = repodata.clone();
    for rd in result.values_mut() {
        let Some(Value::Object(packages)) = rd.get_mut("packages") else {
            continue;
        };
        let renamed: Vec<(String, String, Value)> = packages
            .iter()
            .filter_map(|(file_name, entry)| {
                let build_string = entry.get("build_string")?.as_str()?;
                if build_string.is_empty() {
                    return None;
                }
                let build_number = entry.get("build_number")?.as_u64()?;
                let name = entry.get("name")?.as_str()?;
                let version = entry.get("version")?.as_str()?;
                let build = format!("{build_string}_{build_number}");
                let mut entry = entry.clone();
                entry["build"] = Value::String(build.clone());
                Some((
                    file_name.clone(),
                    format!("{name}-{version}-{build}.tar.bz2"),
                    entry,
                ))
            })
            .collect();
        for (old, new, entry) in renamed {
            packages.remove(&old);
            packages.insert(new, entry);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{Channel, PipRepository};
    use crate::dependency::{Dependency, Manager};
    use crate::virtual_package::{default_virtual_package_repo, DEFAULT_CUDA_VERSION};

    fn channel(url: &str) -> Channel {
        Channel {
            url: url.to_owned(),
            used_env_vars: BTreeSet::new(),
        }
    }

    fn spec(deps: Vec<Dependency>, channels: &[&str]) -> LockSpecification {
        let mut dependencies = BTreeMap::new();
        dependencies.insert(Platform::new("linux-64"), deps.clone());
        dependencies.insert(Platform::new("osx-64"), deps);
        LockSpecification {
            dependencies,
            channels: channels.iter().map(|c| channel(c)).collect(),
            ..LockSpecification::default()
        }
    }

    fn deps() -> Vec<Dependency> {
        vec![
            Dependency::versioned("python", Manager::Conda, "3.12.*"),
            Dependency::versioned("numpy", Manager::Conda, ">=1.26"),
            Dependency::versioned("requests", Manager::Pip, "*"),
        ]
    }

    #[test]
    fn hash_is_lowercase_hex_256_bit() {
        let hashes = compute_content_hashes(&spec(deps(), &["conda-forge"]), None).unwrap();
        assert_eq!(hashes.len(), 2);
        for hash in hashes.values() {
            assert_eq!(hash.len(), 64);
            assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        }
    }

    #[test]
    fn dependency_order_does_not_matter() {
        let mut reversed = deps();
        reversed.reverse();
        let a = compute_content_hashes(&spec(deps(), &["conda-forge"]), None).unwrap();
        let b = compute_content_hashes(&spec(reversed, &["conda-forge"]), None).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn channel_order_matters() {
        let a = compute_content_hashes(&spec(deps(), &["conda-forge", "bioconda"]), None).unwrap();
        let b = compute_content_hashes(&spec(deps(), &["bioconda", "conda-forge"]), None).unwrap();
        assert_ne!(a["linux-64"], b["linux-64"]);
    }

    #[test]
    fn virtual_packages_change_the_hash() {
        let s = spec(deps(), &["conda-forge"]);
        let repo = default_virtual_package_repo(DEFAULT_CUDA_VERSION);
        let without = compute_content_hashes(&s, None).unwrap();
        let with = compute_content_hashes(&s, Some(&repo)).unwrap();
        assert_ne!(without["linux-64"], with["linux-64"]);

        let other_cuda = default_virtual_package_repo("12.0");
        let with_other = compute_content_hashes(&s, Some(&other_cuda)).unwrap();
        assert_ne!(with["linux-64"], with_other["linux-64"]);
        // osx-64 has no __cuda, so the hash does not move
        assert_eq!(with["osx-64"], with_other["osx-64"]);
    }

    #[test]
    fn empty_virtual_package_repo_differs_from_none() {
        let s = spec(deps(), &["conda-forge"]);
        let empty = VirtualPackageRepo::default();
        let without = compute_content_hashes(&s, None).unwrap();
        let with_empty = compute_content_hashes(&s, Some(&empty)).unwrap();
        for platform in s.platforms() {
            assert_ne!(without[&platform], with_empty[&platform], "{platform}");
        }
        assert_eq!(
            content_hash_for_platform(&s, Some(&empty), "linux-64").unwrap(),
            with_empty["linux-64"]
        );
    }

    #[test]
    fn empty_pip_repositories_are_omitted() {
        let plain = spec(deps(), &["conda-forge"]);
        let mut with_repo = plain.clone();
        with_repo.pip_repositories.push(PipRepository::new("https://pypi.example.com/simple"));
        let a = compute_content_hashes(&plain, None).unwrap();
        let b = compute_content_hashes(&with_repo, None).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn single_platform_matches_full_map() {
        let s = spec(deps(), &["conda-forge"]);
        let all = compute_content_hashes(&s, None).unwrap();
        let one = content_hash_for_platform(&s, None, "osx-64").unwrap();
        assert_eq!(all["osx-64"], one);
    }

    #[test]
    fn current_hash_is_backwards_compatible() {
        let s = spec(deps(), &["conda-forge"]);
        let repo = default_virtual_package_repo(DEFAULT_CUDA_VERSION);
        for platform in ["linux-64", "osx-64"] {
            let current = content_hash_for_platform(&s, Some(&repo), platform).unwrap();
            let allowed = backwards_compatible_content_hashes(&s, Some(&repo), platform).unwrap();
            assert!(allowed.contains(&current));
        }
    }

    #[test]
    fn osx_64_accepts_repo_without_redundant_osx_10_15() {
        let s = spec(deps(), &["conda-forge"]);
        let repo = default_virtual_package_repo(DEFAULT_CUDA_VERSION);
        let toggled = toggle_osx_10_15(repo.all_repodata());
        assert!(!toggled["osx-64"]["packages"]
            .as_object()
            .unwrap()
            .contains_key(OSX_10_15));
        let legacy = digest(&content_for_platform(&s, "osx-64", Some(&toggled), false).unwrap())
            .unwrap();
        let allowed = backwards_compatible_content_hashes(&s, Some(&repo), "osx-64").unwrap();
        assert!(allowed.contains(&legacy));
        assert!(allowed.len() >= 4);
    }

    #[test]
    fn spurious_build_number_variant_is_accepted() {
        let s = spec(deps(), &["conda-forge"]);
        let repo = default_virtual_package_repo(DEFAULT_CUDA_VERSION);
        let legacy_rd = reinsert_build_number(repo.all_repodata());
        let linux = legacy_rd["linux-64"]["packages"].as_object().unwrap();
        assert!(linux.contains_key("__archspec-1-x86_64_0.tar.bz2"));
        assert!(!linux.contains_key("__archspec-1-x86_64.tar.bz2"));
        assert_eq!(linux["__archspec-1-x86_64_0.tar.bz2"]["build"], "x86_64_0");

        let legacy =
            digest(&content_for_platform(&s, "linux-64", Some(&legacy_rd), true).unwrap()).unwrap();
        let allowed = backwards_compatible_content_hashes(&s, Some(&repo), "linux-64").unwrap();
        assert!(allowed.contains(&legacy));
    }

    #[test]
    fn without_repository_only_null_variants() {
        let s = spec(deps(), &["conda-forge"]);
        let allowed = backwards_compatible_content_hashes(&s, None, "linux-64").unwrap();
        assert_eq!(allowed.len(), 2);
        let current = content_hash_for_platform(&s, None, "linux-64").unwrap();
        assert!(allowed.contains(&current));
    }

    #[test]
    fn golden_hash_is_stable_across_runs() {
        let s = spec(deps(), &["conda-forge"]);
        let first = compute_content_hashes(&s, None).unwrap();
        let second = compute_content_hashes(&s.clone(), None).unwrap();
        assert_eq!(first, second);
    }
}
