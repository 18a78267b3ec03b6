//! Assigning a category to every locked package from the roots that pulled it in.

use crate::lookup::{canonicalize_name, NameMapper};
use polylock_schema::{is_virtual_package, Dependency, LockedDependency, Manager};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tracing::debug;

/// How package names are compared across managers.
#[derive(Clone, Copy)]
pub enum NameView<'a> {
    /// Names are compared as written.
    Native,
    /// Conda names are translated to canonical PyPI names first.
    Mapped(&'a dyn NameMapper),
}

impl NameView<'_> {
    fn key(&self, manager: Manager, name: &str) -> String {
        match (self, manager) {
            (NameView::Native, _) => name.to_owned(),
            (NameView::Mapped(mapper), Manager::Conda) => mapper.conda_to_pypi(name),
            (NameView::Mapped(_), Manager::Pip) => canonicalize_name(name),
        }
    }
}

/// Set `category`/`optional` on `packages` from the requested roots.
///
/// Each root owns its own entry. Every other package takes the category of
/// the first root that reaches it, visiting categories in `priority` order
/// (unlisted categories follow in first-requested order) and roots in
/// request order within a category.
pub fn apply_categories(
    requested: &[Dependency],
    packages: &mut [LockedDependency],
    priority: &[String],
    view: NameView<'_>,
) {
    let mut index: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (idx, pkg) in packages.iter().enumerate() {
        index
            .entry(view.key(pkg.manager, &pkg.name))
            .or_default()
            .push(idx);
    }

    // Root key -> category, first request wins.
    let mut roots: Vec<(String, &str)> = Vec::new();
    for dep in requested {
        let key = view.key(dep.manager, &dep.name);
        if !roots.iter().any(|(k, _)| *k == key) {
            roots.push((key, dep.category.as_str()));
        }
    }

    let mut order: Vec<&str> = priority.iter().map(String::as_str).collect();
    for (_, category) in &roots {
        if !order.contains(category) {
            order.push(*category);
        }
    }

    let mut owner: BTreeMap<String, &str> = BTreeMap::new();
    for &category in &order {
        for (root, _) in roots.iter().filter(|(_, c)| *c == category) {
            for name in closure(root, packages, &index, view) {
                owner.entry(name).or_insert(category);
            }
        }
    }
    for (root, category) in &roots {
        owner.insert(root.clone(), *category);
    }

    for (name, category) in &owner {
        for &idx in munge_get(&index, name).unwrap_or_default() {
            packages[idx].set_category(category);
        }
    }
    debug!(
        "assigned categories to {} packages from {} roots",
        owner.len(),
        roots.len()
    );
}

/// Names transitively required by `root`, excluding `root` itself.
fn closure(
    root: &str,
    packages: &[LockedDependency],
    index: &BTreeMap<String, Vec<usize>>,
    view: NameView<'_>,
) -> BTreeSet<String> {
    let mut seen: BTreeSet<String> = BTreeSet::new();
    let mut queue: VecDeque<String> = VecDeque::from([root.to_owned()]);
    while let Some(name) = queue.pop_front() {
        if !seen.insert(name.clone()) {
            continue;
        }
        for &idx in munge_get(index, &name).unwrap_or_default() {
            let pkg = &packages[idx];
            for dep in pkg.dependencies.keys() {
                if is_virtual_package(dep) {
                    continue;
                }
                let key = view.key(pkg.manager, dep);
                if !seen.contains(&key) {
                    queue.push_back(key);
                }
            }
        }
    }
    seen.remove(root);
    seen
}

/// Look up `name`, then with `-` as `_`, then with `_` as `-`.
fn munge_get<'a>(index: &'a BTreeMap<String, Vec<usize>>, name: &str) -> Option<&'a [usize]> {
    index
        .get(name)
        .or_else(|| index.get(&name.replace('-', "_")))
        .or_else(|| index.get(&name.replace('_', "-")))
        .map(Vec::as_slice)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lookup::MappingTable;
    use polylock_schema::{HashModel, Platform};

    fn locked(name: &str, manager: Manager, deps: &[&str]) -> LockedDependency {
        LockedDependency {
            name: name.to_owned(),
            version: "1.0".to_owned(),
            manager,
            platform: Platform::new("linux-64"),
            dependencies: deps.iter().map(|d| ((*d).to_owned(), "*".to_owned())).collect(),
            url: format!("https://example.invalid/{name}"),
            hash: HashModel {
                md5: Some("0".repeat(32)),
                sha256: None,
            },
            category: "main".to_owned(),
            optional: false,
            source: None,
            build: None,
        }
    }

    fn category_of<'a>(packages: &'a [LockedDependency], name: &str) -> &'a str {
        &packages.iter().find(|p| p.name == name).unwrap().category
    }

    fn pytest_black_pluggy() -> (Vec<Dependency>, Vec<LockedDependency>) {
        let requested = vec![
            Dependency::versioned("pytest", Manager::Conda, "*").with_category("dev"),
            Dependency::versioned("black", Manager::Conda, "*"),
        ];
        let packages = vec![
            locked("pytest", Manager::Conda, &["pluggy", "iniconfig", "__unix"]),
            locked("black", Manager::Conda, &["pluggy", "click"]),
            locked("pluggy", Manager::Conda, &[]),
            locked("iniconfig", Manager::Conda, &[]),
            locked("click", Manager::Conda, &[]),
        ];
        (requested, packages)
    }

    #[test]
    fn root_without_locked_package_is_skipped() {
        let (mut requested, mut packages) = pytest_black_pluggy();
        requested.insert(
            0,
            Dependency::versioned("not-locked", Manager::Conda, "*").with_category("docs"),
        );
        let priority = vec!["docs".to_owned(), "main".to_owned(), "dev".to_owned()];
        apply_categories(&requested, &mut packages, &priority, NameView::Native);

        assert_eq!(packages.len(), 5);
        assert!(packages.iter().all(|p| p.category != "docs"));
        assert_eq!(category_of(&packages, "pytest"), "dev");
        assert_eq!(category_of(&packages, "black"), "main");
        assert_eq!(category_of(&packages, "pluggy"), "main");
        assert_eq!(category_of(&packages, "iniconfig"), "dev");
    }

    #[test]
    fn shared_dependency_follows_priority() {
        let (requested, mut packages) = pytest_black_pluggy();
        let priority = vec!["main".to_owned(), "dev".to_owned()];
        apply_categories(&requested, &mut packages, &priority, NameView::Native);
        assert_eq!(category_of(&packages, "pluggy"), "main");
        assert_eq!(category_of(&packages, "pytest"), "dev");
        assert_eq!(category_of(&packages, "iniconfig"), "dev");
        assert_eq!(category_of(&packages, "click"), "main");
        assert!(packages.iter().find(|p| p.name == "iniconfig").unwrap().optional);

        let (requested, mut packages) = pytest_black_pluggy();
        let priority = vec!["dev".to_owned(), "main".to_owned()];
        apply_categories(&requested, &mut packages, &priority, NameView::Native);
        assert_eq!(category_of(&packages, "pluggy"), "dev");
        assert_eq!(category_of(&packages, "black"), "main");
    }

    #[test]
    fn roots_own_themselves() {
        let requested = vec![
            Dependency::versioned("pytest", Manager::Conda, "*").with_category("dev"),
            Dependency::versioned("pluggy", Manager::Conda, "*").with_category("dev"),
            Dependency::versioned("app", Manager::Conda, "*"),
        ];
        let mut packages = vec![
            locked("pytest", Manager::Conda, &["pluggy"]),
            locked("pluggy", Manager::Conda, &[]),
            locked("app", Manager::Conda, &["pytest"]),
        ];
        let priority = vec!["main".to_owned()];
        apply_categories(&requested, &mut packages, &priority, NameView::Native);
        assert_eq!(category_of(&packages, "pytest"), "dev");
        assert_eq!(category_of(&packages, "pluggy"), "dev");
        assert_eq!(category_of(&packages, "app"), "main");
    }

    #[test]
    fn unlisted_categories_follow_priority() {
        let requested = vec![
            Dependency::versioned("sphinx", Manager::Conda, "*").with_category("docs"),
            Dependency::versioned("pytest", Manager::Conda, "*").with_category("dev"),
        ];
        let mut packages = vec![
            locked("sphinx", Manager::Conda, &["jinja2"]),
            locked("pytest", Manager::Conda, &["jinja2"]),
            locked("jinja2", Manager::Conda, &[]),
        ];
        apply_categories(&requested, &mut packages, &[], NameView::Native);
        assert_eq!(category_of(&packages, "jinja2"), "docs");
    }

    #[test]
    fn separator_variants_are_matched() {
        let requested = vec![Dependency::versioned("app", Manager::Conda, "*").with_category("dev")];
        let mut packages = vec![
            locked("app", Manager::Conda, &["typing-extensions"]),
            locked("typing_extensions", Manager::Conda, &[]),
        ];
        apply_categories(&requested, &mut packages, &[], NameView::Native);
        assert_eq!(category_of(&packages, "typing_extensions"), "dev");
    }

    #[test]
    fn mapped_view_crosses_managers() {
        let table = MappingTable::from_json_str(r#"{"PyYAML": "pyyaml", "torch": "pytorch"}"#)
            .unwrap();
        let requested = vec![Dependency::versioned("mytool", Manager::Pip, "*").with_category("dev")];
        let mut packages = vec![
            locked("mytool", Manager::Pip, &["torch", "PyYAML"]),
            locked("pytorch", Manager::Conda, &[]),
            locked("pyyaml", Manager::Conda, &[]),
        ];
        apply_categories(&requested, &mut packages, &[], NameView::Mapped(&table));
        assert_eq!(category_of(&packages, "pytorch"), "dev");
        assert_eq!(category_of(&packages, "pyyaml"), "dev");
    }

    #[test]
    fn unreached_packages_are_left_alone() {
        let requested = vec![Dependency::versioned("a", Manager::Conda, "*").with_category("dev")];
        let mut packages = vec![locked("a", Manager::Conda, &[]), locked("b", Manager::Conda, &[])];
        apply_categories(&requested, &mut packages, &[], NameView::Native);
        assert_eq!(category_of(&packages, "b"), "main");
        assert!(!packages[1].optional);
    }
}
