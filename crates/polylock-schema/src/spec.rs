use crate::channel::{Channel, PipRepository};
use crate::dependency::Dependency;
use crate::types::Platform;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Everything a solve needs to know about what was requested, for every
/// target platform.
///
/// Platforms are exactly the keys of `dependencies`. A specification is
/// treated as immutable once it is handed to a solver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockSpecification {
    pub dependencies: BTreeMap<Platform, Vec<Dependency>>,
    #[serde(default)]
    pub channels: Vec<Channel>,
    #[serde(default)]
    pub pip_repositories: Vec<PipRepository>,
    #[serde(default)]
    pub sources: Vec<PathBuf>,
    #[serde(default = "default_allow_pypi")]
    pub allow_pypi_requests: bool,
}

fn default_allow_pypi() -> bool {
    true
}

impl Default for LockSpecification {
    fn default() -> Self {
        Self {
            dependencies: BTreeMap::new(),
            channels: Vec::new(),
            pip_repositories: Vec::new(),
            sources: Vec::new(),
            allow_pypi_requests: true,
        }
    }
}

impl LockSpecification {
    pub fn platforms(&self) -> Vec<Platform> {
        self.dependencies.keys().cloned().collect()
    }

    pub fn dependencies_for(&self, platform: &str) -> &[Dependency] {
        self.dependencies.get(platform).map_or(&[], Vec::as_slice)
    }
}

/// Union of several sequences, keeping the first occurrence of each item.
pub fn ordered_union<T, I, C>(collections: C) -> Vec<T>
where
    T: PartialEq + Clone,
    I: IntoIterator<Item = T>,
    C: IntoIterator<Item = I>,
{
    let mut out: Vec<T> = Vec::new();
    for item in collections.into_iter().flatten() {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}
