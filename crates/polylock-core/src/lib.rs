//! Aggregation, solving orchestration, and consistency checking for polylock.
//!
//! This crate ties the schema layer together into the `Engine`: it merges
//! source manifests into one `LockSpecification`, runs a `Solver` per
//! platform in parallel, propagates categories over the solved graph, merges
//! the result into an existing lockfile, and checks a lockfile against a
//! specification without solving. It also exports a specification as a
//! platform-reduced project manifest.

pub mod aggregate;
pub mod categories;
pub mod check;
pub mod engine;
pub mod index;
pub mod lookup;
pub mod platform_indep;
pub mod provenance;
pub mod solver;

pub use aggregate::{aggregate_lock_specs, suffix_union, AggregationError};
pub use categories::{apply_categories, NameView};
pub use check::{
    categories_to_check, check_lockfile, CategoryCheck, CheckReport, PlatformCheck, VersionMismatch,
};
pub use engine::{Engine, LockOptions, LockOutcome};
pub use index::{IndexError, IndexSolver, IndexedPackage};
pub use lookup::{canonicalize_name, LookupError, MappingTable, NameMapper};
pub use platform_indep::{
    render_project_manifest, unify_platform_independent_deps, DepKey, EditableDependency, Unified,
};
pub use provenance::{collect_provenance, relative_source_path, Provenance};
pub use solver::{solve_platforms, SolveError, SolveResults, Solver};

use polylock_schema::Platform;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("manifest error: {0}")]
    Manifest(#[from] polylock_schema::ManifestError),
    #[error("lock error: {0}")]
    Lock(#[from] polylock_schema::LockError),
    #[error("aggregation conflict: {0}")]
    Aggregation(#[from] AggregationError),
    #[error("virtual package error: {0}")]
    VirtualPackages(#[from] polylock_schema::VirtualPackageError),
    #[error("name mapping error: {0}")]
    Lookup(#[from] LookupError),
    #[error("package index error: {0}")]
    Index(#[from] IndexError),
    #[error("lockfile platforms {lockfile:?} and specification platforms {spec:?} have nothing in common")]
    NoCommonPlatforms {
        lockfile: Vec<Platform>,
        spec: Vec<Platform>,
    },
    #[error("no source files given")]
    NoSources,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("render error: {0}")]
    Render(#[from] toml::ser::Error),
}
