use super::{
    build_engine, colorize_status, json_pretty, platform_override, spin_fail, spin_ok, spinner,
    EngineOptions, EXIT_FAILURE, EXIT_SUCCESS,
};
use crate::config::CliConfig;
use polylock_core::{IndexSolver, LockOptions};
use polylock_schema::{Lockfile, MetadataOption};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::info;

pub struct LockArgs {
    pub files: Vec<PathBuf>,
    pub platforms: Vec<String>,
    pub index: PathBuf,
    pub lockfile: PathBuf,
    pub update: Vec<String>,
    pub metadata: Vec<MetadataOption>,
    pub custom_metadata: Vec<(String, String)>,
    pub help_text: bool,
}

pub fn run(
    config: &CliConfig,
    options: &EngineOptions,
    args: &LockArgs,
    json: bool,
) -> Result<u8, String> {
    let engine = build_engine(config, options)?;
    let spec = engine
        .aggregate(&args.files, &platform_override(&args.platforms, config))
        .map_err(|e| e.to_string())?;

    let mut solver = IndexSolver::from_file(&args.index)
        .map_err(|e| format!("package index error: {}: {e}", args.index.display()))?;
    if let Some(repo) = engine.virtual_packages() {
        solver = solver.with_virtual_packages(repo.clone());
    }

    let existing = if args.lockfile.exists() {
        info!("updating {}", args.lockfile.display());
        Some(Lockfile::read_from_file(&args.lockfile).map_err(|e| e.to_string())?)
    } else {
        None
    };

    let metadata: BTreeSet<MetadataOption> = if args.metadata.is_empty() {
        config.metadata.iter().copied().collect()
    } else {
        args.metadata.iter().copied().collect()
    };
    let mut custom: BTreeMap<String, String> = config.custom_metadata.clone();
    custom.extend(args.custom_metadata.iter().cloned());
    let lock_options = LockOptions {
        update: args.update.clone(),
        metadata: metadata.clone(),
        custom_metadata: (!custom.is_empty()).then_some(custom),
        lockfile_dir: lockfile_dir(&args.lockfile),
    };

    let pb = if json {
        None
    } else {
        Some(spinner("locking..."))
    };
    let outcome = match engine.lock(&spec, &solver, existing.as_ref(), &lock_options) {
        Ok(outcome) => outcome,
        Err(e) => {
            if let Some(ref pb) = pb {
                spin_fail(pb, "lock failed");
            }
            return Err(e.to_string());
        }
    };
    if let Some(ref pb) = pb {
        if outcome.failures.is_empty() {
            spin_ok(pb, "lock complete");
        } else {
            spin_fail(pb, "some platforms failed to solve");
        }
    }

    let changed = !outcome.relocked.is_empty()
        || existing.as_ref().is_some_and(|e| *e != outcome.lockfile);
    if changed {
        let choices: Vec<MetadataOption> = metadata.into_iter().collect();
        outcome
            .lockfile
            .write_to_file(&args.lockfile, &choices, args.help_text)
            .map_err(|e| e.to_string())?;
    }

    if json {
        let failures: BTreeMap<String, &str> = outcome
            .failures
            .iter()
            .map(|f| (f.platform.to_string(), f.message.as_str()))
            .collect();
        let payload = serde_json::json!({
            "lockfile": args.lockfile,
            "relocked": outcome.relocked,
            "up_to_date": outcome.skipped,
            "failed": failures,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        for platform in &outcome.relocked {
            println!("{:<16} {}", platform.as_str(), colorize_status("locked"));
        }
        for platform in &outcome.skipped {
            println!("{:<16} {}", platform.as_str(), colorize_status("up to date"));
        }
        for failure in &outcome.failures {
            println!(
                "{:<16} {}: {}",
                failure.platform.as_str(),
                colorize_status("failed"),
                failure.message
            );
        }
        if changed {
            println!("wrote {}", args.lockfile.display());
        }
    }

    if outcome.failures.is_empty() {
        Ok(EXIT_SUCCESS)
    } else {
        Ok(EXIT_FAILURE)
    }
}

fn lockfile_dir(lockfile: &Path) -> PathBuf {
    lockfile
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(PathBuf::new, Path::to_path_buf)
}
