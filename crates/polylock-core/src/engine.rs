use crate::aggregate::aggregate_lock_specs;
use crate::categories::{apply_categories, NameView};
use crate::check::{check_lockfile, CheckReport};
use crate::lookup::NameMapper;
use crate::platform_indep::{render_project_manifest, EditableDependency};
use crate::provenance::{collect_provenance, relative_source_path};
use crate::solver::{solve_platforms, SolveError, Solver};
use crate::CoreError;
use polylock_schema::{
    backwards_compatible_content_hashes, compute_content_hashes, default_virtual_package_repo,
    parse_manifest_file, ContentHash, LockMeta, LockSpecification, LockedDependency, Lockfile,
    Manager, MetadataOption, Platform, VirtualPackageRepo, DEFAULT_CUDA_VERSION, DEV_CATEGORY,
    MAIN_CATEGORY,
};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// The lock pipeline: aggregate sources, solve per platform, propagate
/// categories, merge into the previous lockfile, and check lockfiles.
pub struct Engine {
    virtual_packages: Option<VirtualPackageRepo>,
    category_priority: Vec<String>,
    name_mapper: Option<Box<dyn NameMapper>>,
}

#[derive(Debug, Clone, Default)]
pub struct LockOptions {
    /// Names to re-resolve; a non-empty list re-solves every platform.
    pub update: Vec<String>,
    pub metadata: BTreeSet<MetadataOption>,
    pub custom_metadata: Option<BTreeMap<String, String>>,
    /// Directory the lockfile will be written to; source paths are made relative to it.
    pub lockfile_dir: PathBuf,
}

/// Result of a lock run.
pub struct LockOutcome {
    pub lockfile: Lockfile,
    pub relocked: Vec<Platform>,
    /// Platforms whose stored content hash was still current.
    pub skipped: Vec<Platform>,
    pub failures: Vec<SolveError>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    /// An engine with the default capability set and `main` before `dev`.
    pub fn new() -> Self {
        Self {
            virtual_packages: Some(default_virtual_package_repo(DEFAULT_CUDA_VERSION)),
            category_priority: vec![MAIN_CATEGORY.to_owned(), DEV_CATEGORY.to_owned()],
            name_mapper: None,
        }
    }

    #[must_use]
    pub fn with_virtual_packages(mut self, repo: Option<VirtualPackageRepo>) -> Self {
        self.virtual_packages = repo;
        self
    }

    #[must_use]
    pub fn with_category_priority(mut self, priority: Vec<String>) -> Self {
        self.category_priority = priority;
        self
    }

    #[must_use]
    pub fn with_name_mapper(mut self, mapper: Box<dyn NameMapper>) -> Self {
        self.name_mapper = Some(mapper);
        self
    }

    pub fn virtual_packages(&self) -> Option<&VirtualPackageRepo> {
        self.virtual_packages.as_ref()
    }

    /// Parse, normalize and merge source manifests into one specification.
    ///
    /// Without `platform_override` each manifest uses its own platforms, and
    /// manifests that disagree are an aggregation conflict.
    pub fn aggregate(
        &self,
        sources: &[PathBuf],
        platform_override: &[Platform],
    ) -> Result<LockSpecification, CoreError> {
        if sources.is_empty() {
            return Err(CoreError::NoSources);
        }
        let mut specs = Vec::with_capacity(sources.len());
        for source in sources {
            info!("reading {}", source.display());
            let manifest = parse_manifest_file(source)?;
            specs.push(manifest.normalize(source, platform_override)?);
        }
        let platforms = specs[0].platforms();
        let spec = aggregate_lock_specs(&specs, &platforms)?;
        debug!(
            "aggregated specification: {} platform(s), {} channel(s)",
            spec.dependencies.len(),
            spec.channels.len()
        );
        Ok(spec)
    }

    pub fn content_hashes(
        &self,
        spec: &LockSpecification,
    ) -> Result<BTreeMap<Platform, ContentHash>, CoreError> {
        Ok(compute_content_hashes(spec, self.virtual_packages.as_ref())?)
    }

    /// Platforms of `lockfile` whose stored hash matches `spec` under any
    /// compatible hashing variant.
    pub fn current_platforms(
        &self,
        lockfile: &Lockfile,
        spec: &LockSpecification,
    ) -> Result<BTreeSet<Platform>, CoreError> {
        let mut current = BTreeSet::new();
        for platform in lockfile.platforms() {
            let Some(stored) = lockfile.metadata.content_hash.get(platform) else {
                continue;
            };
            if !spec.dependencies.contains_key(platform) {
                continue;
            }
            let allowed =
                backwards_compatible_content_hashes(spec, self.virtual_packages.as_ref(), platform)?;
            if allowed.contains(stored) {
                current.insert(platform.clone());
            }
        }
        Ok(current)
    }

    /// Solve every platform whose lock is stale and merge into `existing`.
    ///
    /// A platform that fails to solve keeps its previous packages (if any)
    /// and is reported in `failures`. Platforms not in `spec` are dropped.
    pub fn lock(
        &self,
        spec: &LockSpecification,
        solver: &dyn Solver,
        existing: Option<&Lockfile>,
        options: &LockOptions,
    ) -> Result<LockOutcome, CoreError> {
        let platforms = spec.platforms();
        let current = match existing {
            Some(lockfile) if options.update.is_empty() => self.current_platforms(lockfile, spec)?,
            _ => BTreeSet::new(),
        };
        let (skipped, to_solve): (Vec<Platform>, Vec<Platform>) =
            platforms.iter().cloned().partition(|p| current.contains(p));
        for platform in &skipped {
            info!("{platform}: lock is up to date");
        }

        let results = if to_solve.is_empty() {
            BTreeMap::new()
        } else {
            solve_platforms(solver, spec, &to_solve, existing, &options.update)
        };

        let mut relocked = Vec::new();
        let mut failures = Vec::new();
        let mut packages = Vec::new();
        for (platform, result) in results {
            match result {
                Ok(mut solved) => {
                    self.assign_categories(spec, &platform, &mut solved);
                    packages.extend(solved);
                    relocked.push(platform);
                }
                Err(e) => {
                    warn!("{e}");
                    failures.push(e);
                }
            }
        }

        let mut lockfile = if relocked.is_empty() {
            existing.cloned().unwrap_or_default()
        } else {
            let fresh = self.fresh_lockfile(spec, &relocked, packages, options)?;
            match existing {
                Some(previous) => {
                    let mut merged = previous.merge(&fresh);
                    merged.metadata.channels.clone_from(&spec.channels);
                    merged
                }
                None => {
                    let mut fresh = fresh;
                    fresh.toposort();
                    fresh
                }
            }
        };
        retain_platforms(&mut lockfile, &platforms);

        info!(
            "locked {} platform(s), {} up to date, {} failed",
            relocked.len(),
            skipped.len(),
            failures.len()
        );
        Ok(LockOutcome {
            lockfile,
            relocked,
            skipped,
            failures,
        })
    }

    /// Check `lockfile` against `spec` for the selected categories, without solving.
    pub fn check(
        &self,
        lockfile: &Lockfile,
        spec: &LockSpecification,
        categories: &[String],
    ) -> Result<CheckReport, CoreError> {
        let current = self.current_platforms(lockfile, spec)?;
        check_lockfile(lockfile, spec, categories, &current)
    }

    /// Export `spec` as a platform-reduced project manifest.
    pub fn render(
        &self,
        spec: &LockSpecification,
        editables: &[EditableDependency],
    ) -> Result<String, CoreError> {
        render_project_manifest(spec, editables)
    }

    fn fresh_lockfile(
        &self,
        spec: &LockSpecification,
        relocked: &[Platform],
        packages: Vec<LockedDependency>,
        options: &LockOptions,
    ) -> Result<Lockfile, CoreError> {
        let mut content_hash = self.content_hashes(spec)?;
        content_hash.retain(|p, _| relocked.contains(p));

        let lockfile_dir = lockfile_dir_or_cwd(&options.lockfile_dir);
        let provenance = collect_provenance(&options.metadata, &spec.sources, lockfile_dir)?;
        let metadata = LockMeta {
            content_hash,
            channels: spec.channels.clone(),
            platforms: relocked.to_vec(),
            sources: spec
                .sources
                .iter()
                .map(|s| relative_source_path(s, lockfile_dir))
                .collect(),
            time_metadata: provenance.time,
            git_metadata: provenance.git,
            inputs_metadata: provenance.inputs,
            custom_metadata: options.custom_metadata.clone(),
        };
        Ok(Lockfile::new(metadata, packages))
    }

    fn assign_categories(
        &self,
        spec: &LockSpecification,
        platform: &Platform,
        packages: &mut [LockedDependency],
    ) {
        let requested = spec.dependencies_for(platform);
        let mixed = requested.iter().any(|d| d.manager == Manager::Pip)
            || packages.iter().any(|p| p.manager == Manager::Pip);
        let view = match (&self.name_mapper, mixed) {
            (Some(mapper), true) => NameView::Mapped(mapper.as_ref()),
            _ => NameView::Native,
        };
        apply_categories(requested, packages, &self.category_priority, view);
    }
}

fn lockfile_dir_or_cwd(dir: &Path) -> &Path {
    if dir.as_os_str().is_empty() {
        Path::new(".")
    } else {
        dir
    }
}

fn retain_platforms(lockfile: &mut Lockfile, platforms: &[Platform]) {
    let before = lockfile.package.len();
    lockfile.package.retain(|p| platforms.contains(&p.platform));
    lockfile.metadata.platforms.retain(|p| platforms.contains(p));
    lockfile.metadata.content_hash.retain(|p, _| platforms.contains(p));
    let dropped = before - lockfile.package.len();
    if dropped > 0 {
        debug!("dropped {dropped} packages of platforms no longer requested");
    }
}
