use polylock_core::{
    categories_to_check, unify_platform_independent_deps, Engine, IndexSolver, LockOptions,
    MappingTable, SolveError, Solver, Unified,
};
use polylock_schema::{
    Dependency, HashModel, LockedDependency, Lockfile, Manager, MetadataOption, Platform,
};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

const INDEX: &str = r#"
[[package]]
name = "python"
version = "3.12.4"
url = "https://conda.example/{platform}/python-3.12.4.conda"
md5 = "22222222222222222222222222222222"
dependencies = { libffi = ">=3.4", __unix = "*" }
platforms = ["linux-64", "osx-64"]

[[package]]
name = "python"
version = "3.12.4"
url = "https://conda.example/win-64/python-3.12.4.conda"
md5 = "23232323232323232323232323232323"
dependencies = { libffi = ">=3.4", __win = "*" }
platforms = ["win-64"]

[[package]]
name = "libffi"
version = "3.4.2"
url = "https://conda.example/{platform}/libffi-3.4.2.conda"
md5 = "33333333333333333333333333333333"

[[package]]
name = "pytest"
version = "8.2.0"
url = "https://conda.example/noarch/pytest-8.2.0.conda"
md5 = "55555555555555555555555555555555"
dependencies = { pluggy = ">=1.5", iniconfig = "*" }

[[package]]
name = "black"
version = "24.4.2"
url = "https://conda.example/noarch/black-24.4.2.conda"
md5 = "77777777777777777777777777777777"
dependencies = { pluggy = ">=1.0", click = ">=8" }

[[package]]
name = "pluggy"
version = "1.5.0"
url = "https://conda.example/noarch/pluggy-1.5.0.conda"
md5 = "66666666666666666666666666666666"

[[package]]
name = "iniconfig"
version = "2.0.0"
url = "https://conda.example/noarch/iniconfig-2.0.0.conda"
md5 = "88888888888888888888888888888888"

[[package]]
name = "click"
version = "8.1.7"
url = "https://conda.example/noarch/click-8.1.7.conda"
md5 = "99999999999999999999999999999999"

[[package]]
name = "pywin32"
version = "306"
platforms = ["win-64"]
url = "https://conda.example/win-64/pywin32-306.conda"
md5 = "44444444444444444444444444444444"

[[package]]
name = "requests"
version = "2.32.3"
manager = "pip"
url = "https://files.example/requests-2.32.3-py3-none-any.whl"
sha256 = "70761cfe03c773ceb22aa2f671b4757976145175cdfca038c02654d061d6dcc6"
"#;

const BASE: &str = r#"
manifest_version = 1
platforms = ["linux-64", "osx-64", "win-64"]
channels = ["conda-forge"]

[[dependency]]
name = "python"
version = "3.12.*"

[[dependency]]
name = "black"

[[dependency]]
name = "pywin32"
platforms = ["win-64"]
"#;

const DEV: &str = r#"
manifest_version = 1
platforms = ["linux-64", "osx-64", "win-64"]
channels = ["conda-forge"]

[[dependency]]
name = "pytest"
category = "dev"

[[dependency]]
name = "requests"
manager = "pip"
version = ">=2"
"#;

fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path
}

fn all_platforms() -> Vec<Platform> {
    ["linux-64", "osx-64", "win-64"].into_iter().map(Platform::new).collect()
}

#[test]
fn aggregation_and_reduction_across_three_platforms() {
    let dir = tempfile::tempdir().unwrap();
    let sources = vec![
        write(dir.path(), "base.toml", BASE),
        write(dir.path(), "dev.toml", DEV),
    ];
    let engine = Engine::new();
    let spec = engine.aggregate(&sources, &[]).unwrap();
    assert_eq!(spec.platforms(), all_platforms());

    let unified = unify_platform_independent_deps(&spec.dependencies, &[]).unwrap();
    let shared: BTreeSet<&str> = unified
        .keys()
        .filter(|k| k.platform.is_none())
        .map(|k| k.name.as_str())
        .collect();
    assert_eq!(shared, BTreeSet::from(["black", "pytest", "python", "requests"]));

    let pywin32: Vec<_> = unified.iter().filter(|(k, _)| k.name == "pywin32").collect();
    assert_eq!(pywin32.len(), 1);
    assert_eq!(pywin32[0].0.platform, Some(Platform::new("win-64")));
    assert!(matches!(pywin32[0].1, Unified::Dependency(d) if d.manager == Manager::Conda));

    let rendered: toml::Table = toml::from_str(&engine.render(&spec, &[]).unwrap()).unwrap();
    assert_eq!(rendered["target"]["win-64"]["dependencies"]["pywin32"].as_str(), Some("*"));
    assert_eq!(rendered["feature"]["dev"]["dependencies"]["pytest"].as_str(), Some("*"));
    assert_eq!(rendered["pypi-dependencies"]["requests"].as_str(), Some(">=2"));
}

#[test]
fn lock_write_read_check_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let sources = vec![
        write(dir.path(), "base.toml", BASE),
        write(dir.path(), "dev.toml", DEV),
    ];
    let lock_path = dir.path().join("polylock.lock");
    let solver = IndexSolver::from_toml_str(INDEX).unwrap();
    let engine = Engine::new();
    let spec = engine.aggregate(&sources, &[]).unwrap();

    let options = LockOptions {
        metadata: BTreeSet::from([MetadataOption::InputDigest]),
        lockfile_dir: dir.path().to_path_buf(),
        ..LockOptions::default()
    };
    let outcome = engine.lock(&spec, &solver, None, &options).unwrap();
    assert!(outcome.failures.is_empty(), "{:?}", outcome.failures);
    assert_eq!(outcome.relocked, all_platforms());

    let lock = &outcome.lockfile;
    let linux: Vec<_> = lock.packages_for("linux-64").collect();
    let category = |name: &str| {
        linux
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.category.as_str())
            .unwrap()
    };
    assert_eq!(category("pluggy"), "main");
    assert_eq!(category("iniconfig"), "dev");
    assert_eq!(category("click"), "main");
    assert_eq!(category("pytest"), "dev");
    assert_eq!(lock.metadata.sources, vec!["base.toml", "dev.toml"]);
    assert_eq!(lock.metadata.inputs_metadata.as_ref().map(|m| m.len()), Some(2));

    lock.write_to_file(&lock_path, &[MetadataOption::InputDigest], true)
        .unwrap();
    let text = fs::read_to_string(&lock_path).unwrap();
    assert!(text.starts_with("# This lock file was generated by polylock"));

    let reread = Lockfile::read_from_file(&lock_path).unwrap();
    let mut expected = lock.clone();
    expected.alphasort();
    assert_eq!(reread, expected);

    let report = engine
        .check(&reread, &spec, &categories_to_check(true, &[]))
        .unwrap();
    assert!(report.passed, "{report:?}");
    assert!(report.platforms.iter().all(|p| p.content_hash_current));

    // Dropping a root makes the lock stale and leaves an extra root behind.
    let trimmed = write(
        dir.path(),
        "base.toml",
        &BASE.replace("[[dependency]]\nname = \"black\"\n", ""),
    );
    let spec = engine.aggregate(&[trimmed, sources[1].clone()], &[]).unwrap();
    let report = engine
        .check(&reread, &spec, &categories_to_check(true, &[]))
        .unwrap();
    assert!(!report.passed);
    assert!(report.platforms.iter().all(|p| !p.content_hash_current));
    let extra: BTreeSet<&str> = report
        .platforms
        .iter()
        .flat_map(|p| &p.categories)
        .flat_map(|c| c.extra.iter().map(String::as_str))
        .collect();
    assert_eq!(extra, BTreeSet::from(["black"]));

    // Tightening a constraint past the locked version is caught without a solve.
    let pinned = write(
        dir.path(),
        "base.toml",
        &BASE.replace("version = \"3.12.*\"", "version = \"3.11.*\""),
    );
    let spec = engine.aggregate(&[pinned, sources[1].clone()], &[]).unwrap();
    let report = engine
        .check(&reread, &spec, &categories_to_check(true, &[]))
        .unwrap();
    assert!(!report.passed);
    for platform in &report.platforms {
        let conda_main = platform
            .categories
            .iter()
            .find(|c| c.category == "main" && c.manager == Manager::Conda)
            .unwrap();
        assert!(conda_main.missing.is_empty() && conda_main.extra.is_empty());
        assert_eq!(conda_main.mismatched.len(), 1, "{}", platform.platform);
        assert_eq!(conda_main.mismatched[0].name, "python");
        assert_eq!(conda_main.mismatched[0].locked, "3.12.4");
    }
}

#[test]
fn priority_decides_shared_dependency_category() {
    let dir = tempfile::tempdir().unwrap();
    let sources = vec![
        write(dir.path(), "base.toml", BASE),
        write(dir.path(), "dev.toml", DEV),
    ];
    let solver = IndexSolver::from_toml_str(INDEX).unwrap();
    let engine = Engine::new().with_category_priority(vec!["dev".to_owned(), "main".to_owned()]);
    let spec = engine.aggregate(&sources, &[]).unwrap();
    let outcome = engine.lock(&spec, &solver, None, &LockOptions::default()).unwrap();

    for platform in all_platforms() {
        let pluggy = outcome
            .lockfile
            .packages_for(&platform)
            .find(|p| p.name == "pluggy")
            .unwrap();
        assert_eq!(pluggy.category, "dev", "{platform}");
        let black = outcome
            .lockfile
            .packages_for(&platform)
            .find(|p| p.name == "black")
            .unwrap();
        assert_eq!(black.category, "main");
    }
}

struct FixedSolver;

impl Solver for FixedSolver {
    fn solve(
        &self,
        platform: &Platform,
        _requested: &[Dependency],
        _locked: &[LockedDependency],
        _update: &[String],
    ) -> Result<Vec<LockedDependency>, SolveError> {
        let package = |name: &str, manager: Manager, deps: &[&str]| LockedDependency {
            name: name.to_owned(),
            version: "1.0".to_owned(),
            manager,
            platform: platform.clone(),
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
        };
        Ok(vec![
            package("python", Manager::Conda, &["libffi"]),
            package("libffi", Manager::Conda, &[]),
            package("tool", Manager::Pip, &["Py_FFI"]),
        ])
    }
}

#[test]
fn name_mapper_links_pip_roots_to_conda_packages() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = write(
        dir.path(),
        "polylock.toml",
        r#"
manifest_version = 1
platforms = ["linux-64"]

[[dependency]]
name = "python"
version = "3.12.*"

[[dependency]]
name = "tool"
manager = "pip"
category = "dev"
"#,
    );
    let mut table = MappingTable::new();
    table.set_overrides([("py-ffi", "libffi")]);

    let priority = vec!["dev".to_owned(), "main".to_owned()];
    let spec = Engine::new().aggregate(&[manifest], &[]).unwrap();

    let mapped = Engine::new()
        .with_category_priority(priority.clone())
        .with_name_mapper(Box::new(table));
    let outcome = mapped.lock(&spec, &FixedSolver, None, &LockOptions::default()).unwrap();
    let libffi = outcome
        .lockfile
        .packages_for("linux-64")
        .find(|p| p.name == "libffi")
        .unwrap();
    assert_eq!(libffi.category, "dev");

    let native = Engine::new().with_category_priority(priority);
    let outcome = native.lock(&spec, &FixedSolver, None, &LockOptions::default()).unwrap();
    let libffi = outcome
        .lockfile
        .packages_for("linux-64")
        .find(|p| p.name == "libffi")
        .unwrap();
    assert_eq!(libffi.category, "main");
}
