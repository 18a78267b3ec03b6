//! Collapsing per-platform dependencies into platform-independent ones, and
//! rendering the result as a pixi-style project manifest.

use crate::aggregate::AggregationError;
use polylock_schema::{
    Dependency, DependencySource, LockSpecification, Manager, Platform, MAIN_CATEGORY,
};
use std::collections::BTreeMap;
use toml::{Table, Value};
use tracing::debug;

/// Identity of a dependency; `platform` is `None` once it is shared by all.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DepKey {
    pub name: String,
    pub category: String,
    pub manager: Manager,
    pub platform: Option<Platform>,
}

impl DepKey {
    fn of(dep: &Dependency, platform: &Platform) -> Self {
        Self {
            name: dep.name.clone(),
            category: dep.category.clone(),
            manager: dep.manager,
            platform: Some(platform.clone()),
        }
    }

    #[must_use]
    pub fn drop_platform(&self) -> Self {
        Self {
            platform: None,
            ..self.clone()
        }
    }
}

/// A local pip package installed in development mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditableDependency {
    pub name: String,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unified {
    Dependency(Dependency),
    Editable(EditableDependency),
}

/// Reduce per-platform dependencies.
///
/// A group of entries that differ only by platform becomes one entry keyed
/// with `platform: None` when it covers every platform and all members are
/// equal; otherwise each member keeps its platform. Editables are always
/// platform-independent `main` pip entries.
pub fn unify_platform_independent_deps(
    dependencies: &BTreeMap<Platform, Vec<Dependency>>,
    editables: &[EditableDependency],
) -> Result<BTreeMap<DepKey, Unified>, AggregationError> {
    let mut indexed: BTreeMap<DepKey, &Dependency> = BTreeMap::new();
    for (platform, deps) in dependencies {
        for dep in deps {
            let key = DepKey::of(dep, platform);
            if indexed.insert(key, dep).is_some() {
                return Err(AggregationError::DuplicateDependency {
                    name: dep.name.clone(),
                    category: dep.category.clone(),
                    manager: dep.manager,
                    platform: platform.clone(),
                });
            }
        }
    }

    let mut groups: BTreeMap<DepKey, Vec<(&DepKey, &Dependency)>> = BTreeMap::new();
    for (key, dep) in &indexed {
        groups.entry(key.drop_platform()).or_default().push((key, *dep));
    }

    let mut editable_entries: Vec<(DepKey, Unified)> = Vec::with_capacity(editables.len());
    for editable in editables {
        let key = DepKey {
            name: editable.name.clone(),
            category: MAIN_CATEGORY.to_owned(),
            manager: Manager::Pip,
            platform: None,
        };
        if groups.contains_key(&key) {
            return Err(AggregationError::EditableConflict {
                name: editable.name.clone(),
            });
        }
        editable_entries.push((key, Unified::Editable(editable.clone())));
    }

    let num_platforms = dependencies.len();
    let mut out: BTreeMap<DepKey, Unified> = BTreeMap::new();
    for (shared_key, members) in groups {
        let first = members[0].1;
        let independent =
            members.len() == num_platforms && members.iter().all(|(_, dep)| *dep == first);
        if independent {
            out.insert(shared_key, Unified::Dependency(first.clone()));
        } else {
            for (key, dep) in members {
                out.insert(key.clone(), Unified::Dependency(dep.clone()));
            }
        }
    }

    out.extend(editable_entries);

    debug!(
        "reduced {} per-platform dependencies to {} entries",
        indexed.len(),
        out.len()
    );
    Ok(out)
}

#[derive(Default)]
struct Section {
    conda: Table,
    pypi: Table,
}

impl Section {
    fn into_table(self) -> Table {
        let mut table = Table::new();
        if !self.conda.is_empty() {
            table.insert("dependencies".to_owned(), Value::Table(self.conda));
        }
        if !self.pypi.is_empty() {
            table.insert("pypi-dependencies".to_owned(), Value::Table(self.pypi));
        }
        table
    }
}

/// Render `spec` (plus editables) as a project manifest with `[dependencies]`,
/// `[pypi-dependencies]`, `[target.<platform>.*]` and `[feature.<category>.*]`
/// tables.
pub fn render_project_manifest(
    spec: &LockSpecification,
    editables: &[EditableDependency],
) -> Result<String, crate::CoreError> {
    let unified = unify_platform_independent_deps(&spec.dependencies, editables)?;

    // (feature, platform) -> section; `None` feature is the default one.
    let mut sections: BTreeMap<(Option<String>, Option<Platform>), Section> = BTreeMap::new();
    for (key, entry) in unified {
        let feature = (key.category != MAIN_CATEGORY).then(|| key.category.clone());
        let section = sections.entry((feature, key.platform.clone())).or_default();
        let target = match key.manager {
            Manager::Conda => &mut section.conda,
            Manager::Pip => &mut section.pypi,
        };
        target.insert(key.name.clone(), entry_value(&entry));
    }

    let mut root = Table::new();
    let mut workspace = Table::new();
    workspace.insert(
        "channels".to_owned(),
        Value::Array(spec.channels.iter().map(|c| Value::String(c.url.clone())).collect()),
    );
    workspace.insert(
        "platforms".to_owned(),
        Value::Array(
            spec.platforms()
                .into_iter()
                .map(|p| Value::String(p.into_inner()))
                .collect(),
        ),
    );
    root.insert("workspace".to_owned(), Value::Table(workspace));

    let mut features: BTreeMap<String, Table> = BTreeMap::new();
    let mut default_targets = Table::new();
    let mut feature_targets: BTreeMap<String, Table> = BTreeMap::new();
    for ((feature, platform), section) in sections {
        let table = section.into_table();
        match (feature, platform) {
            (None, None) => root.extend(table),
            (None, Some(platform)) => {
                default_targets.insert(platform.into_inner(), Value::Table(table));
            }
            (Some(feature), None) => {
                features.entry(feature).or_default().extend(table);
            }
            (Some(feature), Some(platform)) => {
                feature_targets
                    .entry(feature)
                    .or_default()
                    .insert(platform.into_inner(), Value::Table(table));
            }
        }
    }
    if !default_targets.is_empty() {
        root.insert("target".to_owned(), Value::Table(default_targets));
    }
    for (feature, targets) in feature_targets {
        features
            .entry(feature)
            .or_default()
            .insert("target".to_owned(), Value::Table(targets));
    }
    if !features.is_empty() {
        let features: Table = features
            .into_iter()
            .map(|(name, table)| (name, Value::Table(table)))
            .collect();
        root.insert("feature".to_owned(), Value::Table(features));
    }

    Ok(toml::to_string_pretty(&root)?)
}

fn entry_value(entry: &Unified) -> Value {
    match entry {
        Unified::Editable(editable) => {
            let mut table = Table::new();
            table.insert("path".to_owned(), Value::String(editable.path.clone()));
            table.insert("editable".to_owned(), Value::Boolean(true));
            Value::Table(table)
        }
        Unified::Dependency(dep) => dependency_value(dep),
    }
}

fn dependency_value(dep: &Dependency) -> Value {
    let mut table = Table::new();
    match &dep.source {
        DependencySource::Versioned {
            version,
            build,
            conda_channel,
            hash: _,
        } => {
            let plain = build.is_none()
                && conda_channel.is_none()
                && dep.extras.is_empty()
                && dep.markers.is_none();
            if plain {
                return Value::String(version.clone());
            }
            table.insert("version".to_owned(), Value::String(version.clone()));
            if let Some(build) = build {
                table.insert("build".to_owned(), Value::String(build.clone()));
            }
            if let Some(channel) = conda_channel {
                table.insert("channel".to_owned(), Value::String(channel.clone()));
            }
        }
        DependencySource::Url { url, .. } => {
            table.insert("url".to_owned(), Value::String(url.clone()));
        }
        DependencySource::Vcs { source, vcs, rev } => {
            table.insert(vcs.clone(), Value::String(source.clone()));
            if let Some(rev) = rev {
                table.insert("rev".to_owned(), Value::String(rev.clone()));
            }
        }
        DependencySource::Path {
            path, subdirectory, ..
        } => {
            table.insert("path".to_owned(), Value::String(path.clone()));
            if let Some(subdirectory) = subdirectory {
                table.insert("subdirectory".to_owned(), Value::String(subdirectory.clone()));
            }
        }
    }
    if !dep.extras.is_empty() {
        table.insert(
            "extras".to_owned(),
            Value::Array(dep.extras.iter().map(|e| Value::String(e.clone())).collect()),
        );
    }
    if let Some(markers) = &dep.markers {
        table.insert("markers".to_owned(), Value::String(markers.clone()));
    }
    Value::Table(table)
}
