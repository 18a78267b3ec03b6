//! Declared dependencies: what a source manifest asks for on one platform.

use crate::types::MAIN_CATEGORY;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Package ecosystem a dependency is resolved by.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Manager {
    #[default]
    Conda,
    Pip,
}

impl Manager {
    pub fn as_str(self) -> &'static str {
        match self {
            Manager::Conda => "conda",
            Manager::Pip => "pip",
        }
    }
}

impl fmt::Display for Manager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the package comes from and how it is pinned.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DependencySource {
    /// Resolved from a package index by version constraint.
    Versioned {
        version: String,
        #[serde(default)]
        build: Option<String>,
        #[serde(default)]
        conda_channel: Option<String>,
        #[serde(default)]
        hash: Option<String>,
    },
    /// A direct archive URL.
    Url {
        url: String,
        #[serde(default)]
        hashes: Vec<String>,
    },
    /// A version-control checkout, e.g. `git+https://...` at `rev`.
    Vcs {
        source: String,
        vcs: String,
        #[serde(default)]
        rev: Option<String>,
    },
    /// A local path; `subdirectory` points inside it.
    Path {
        path: String,
        #[serde(default)]
        is_directory: bool,
        #[serde(default)]
        subdirectory: Option<String>,
    },
}

/// A requested package on one platform.
///
/// Within a platform a dependency is identified by `(manager, name, category)`;
/// two dependencies are interchangeable only when every field is equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dependency {
    pub name: String,
    pub manager: Manager,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub extras: BTreeSet<String>,
    #[serde(default)]
    pub markers: Option<String>,
    #[serde(flatten)]
    pub source: DependencySource,
}

fn default_category() -> String {
    MAIN_CATEGORY.to_owned()
}

impl Dependency {
    /// A `main` dependency resolved by version constraint.
    pub fn versioned(
        name: impl Into<String>,
        manager: Manager,
        version: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            manager,
            category: default_category(),
            extras: BTreeSet::new(),
            markers: None,
            source: DependencySource::Versioned {
                version: version.into(),
                build: None,
                conda_channel: None,
                hash: None,
            },
        }
    }

    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    #[must_use]
    pub fn with_extras<I, S>(mut self, extras: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extras = extras.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_markers(mut self, markers: impl Into<String>) -> Self {
        self.markers = Some(markers.into());
        self
    }

    /// Key used when merging specifications: the category is not part of it.
    pub fn merge_key(&self) -> (Manager, &str) {
        (self.manager, self.name.as_str())
    }

    /// Version constraint for versioned sources, `None` for url/vcs/path.
    pub fn version(&self) -> Option<&str> {
        match &self.source {
            DependencySource::Versioned { version, .. } => Some(version),
            _ => None,
        }
    }

    pub fn is_path(&self) -> bool {
        matches!(self.source, DependencySource::Path { .. })
    }
}
