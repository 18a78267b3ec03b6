//! The solver seam: turning requested dependencies into pinned packages.

use polylock_schema::{Dependency, LockSpecification, LockedDependency, Lockfile, Platform};
use rayon::prelude::*;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("solve failed for {platform}: {message}")]
pub struct SolveError {
    pub platform: Platform,
    pub message: String,
}

impl SolveError {
    pub fn new(platform: &Platform, message: impl Into<String>) -> Self {
        Self {
            platform: platform.clone(),
            message: message.into(),
        }
    }
}

/// Resolves one platform at a time.
///
/// `locked` holds the previously pinned packages of that platform; a solver
/// should keep those pins for every name not listed in `update`.
pub trait Solver: Send + Sync {
    fn solve(
        &self,
        platform: &Platform,
        requested: &[Dependency],
        locked: &[LockedDependency],
        update: &[String],
    ) -> Result<Vec<LockedDependency>, SolveError>;
}

pub type SolveResults = BTreeMap<Platform, Result<Vec<LockedDependency>, SolveError>>;

/// Solve every platform in `platforms` concurrently.
///
/// Platforms are independent: a failure on one leaves the others untouched.
pub fn solve_platforms(
    solver: &dyn Solver,
    spec: &LockSpecification,
    platforms: &[Platform],
    existing: Option<&Lockfile>,
    update: &[String],
) -> SolveResults {
    info!("solving {} platform(s)", platforms.len());
    platforms
        .par_iter()
        .map(|platform| {
            let locked: Vec<LockedDependency> = existing
                .map(|l| l.packages_for(platform).cloned().collect())
                .unwrap_or_default();
            let result = solver.solve(platform, spec.dependencies_for(platform), &locked, update);
            match &result {
                Ok(packages) => debug!("{platform}: {} packages", packages.len()),
                Err(e) => debug!("{e}"),
            }
            (platform.clone(), result)
        })
        .collect()
}
