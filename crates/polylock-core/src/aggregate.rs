//! Merging several lock specifications into one.

use polylock_schema::{
    ordered_union, Dependency, LockSpecification, Manager, Platform,
};
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AggregationError {
    #[error(
        "lock specifications must have the same platforms to be aggregated: expected {expected:?}, but {sources:?} declares {found:?}"
    )]
    PlatformMismatch {
        expected: Vec<Platform>,
        found: Vec<Platform>,
        sources: Vec<PathBuf>,
    },
    #[error("{what} cannot be merged into one consistent order: {lists:?}")]
    OrderConflict {
        what: &'static str,
        lists: Vec<Vec<String>>,
    },
    #[error("duplicate dependency {name} ({manager}, category {category}) on {platform}")]
    DuplicateDependency {
        name: String,
        category: String,
        manager: Manager,
        platform: Platform,
    },
    #[error("editable dependency {name} conflicts with an existing dependency of the same name")]
    EditableConflict { name: String },
}

/// Merge specifications that all target `platforms`.
///
/// Dependencies are keyed by `(manager, name)` and a later specification
/// overwrites an earlier one; the merged list keeps first-insertion order.
/// Channel and pip-repository lists are combined with [`suffix_union`],
/// sources with an order-preserving union, and PyPI requests are allowed
/// only when every input allows them.
pub fn aggregate_lock_specs(
    specs: &[LockSpecification],
    platforms: &[Platform],
) -> Result<LockSpecification, AggregationError> {
    let expected: BTreeSet<&Platform> = platforms.iter().collect();
    for spec in specs {
        let found: BTreeSet<&Platform> = spec.dependencies.keys().collect();
        if found != expected {
            return Err(AggregationError::PlatformMismatch {
                expected: expected.into_iter().cloned().collect(),
                found: found.into_iter().cloned().collect(),
                sources: spec.sources.clone(),
            });
        }
    }

    let dependencies = platforms
        .iter()
        .map(|platform| {
            let mut merged: Vec<Dependency> = Vec::new();
            let mut position: HashMap<(Manager, &str), usize> = HashMap::new();
            for dep in specs.iter().flat_map(|s| s.dependencies_for(platform)) {
                let key = dep.merge_key();
                match position.get(&key) {
                    Some(&idx) => merged[idx] = dep.clone(),
                    None => {
                        position.insert(key, merged.len());
                        merged.push(dep.clone());
                    }
                }
            }
            (platform.clone(), merged)
        })
        .collect();

    let channel_lists: Vec<_> = specs.iter().map(|s| s.channels.clone()).collect();
    let channels = suffix_union(&channel_lists).ok_or_else(|| AggregationError::OrderConflict {
        what: "channels",
        lists: channel_lists
            .iter()
            .map(|l| l.iter().map(|c| c.url.clone()).collect())
            .collect(),
    })?;

    let repo_lists: Vec<_> = specs.iter().map(|s| s.pip_repositories.clone()).collect();
    let pip_repositories =
        suffix_union(&repo_lists).ok_or_else(|| AggregationError::OrderConflict {
            what: "pip repositories",
            lists: repo_lists
                .iter()
                .map(|l| l.iter().map(|r| r.url.clone()).collect())
                .collect(),
        })?;

    let sources = ordered_union(specs.iter().map(|s| s.sources.clone()));
    debug!(
        "aggregated {} specifications from {} sources",
        specs.len(),
        sources.len()
    );

    Ok(LockSpecification {
        dependencies,
        channels,
        pip_repositories,
        sources,
        allow_pypi_requests: specs.iter().all(|s| s.allow_pypi_requests),
    })
}

/// The longest list of which every input is a trailing suffix.
///
/// `[[c2, c1], [c1]]` gives `[c2, c1]`; `[[c2, c1], [c3, c1]]` has no such
/// list and gives `None`.
pub fn suffix_union<T: Clone + PartialEq>(lists: &[Vec<T>]) -> Option<Vec<T>> {
    let Some(longest) = lists.iter().max_by_key(|l| l.len()) else {
        return Some(Vec::new());
    };
    let consistent = lists
        .iter()
        .all(|l| longest[longest.len() - l.len()..] == l[..]);
    consistent.then(|| longest.clone())
}
