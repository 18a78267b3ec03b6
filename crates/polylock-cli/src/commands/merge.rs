use super::{json_pretty, EXIT_SUCCESS};
use polylock_schema::Lockfile;
use std::path::{Path, PathBuf};
use tracing::debug;

pub fn run(lockfiles: &[PathBuf], output: Option<&Path>, json: bool) -> Result<u8, String> {
    let mut merged: Option<Lockfile> = None;
    for path in lockfiles {
        let next = Lockfile::read_from_file(path)
            .map_err(|e| format!("{e} ({})", path.display()))?;
        debug!(
            "merging {} ({} packages)",
            path.display(),
            next.package.len()
        );
        merged = Some(match merged {
            Some(acc) => acc.merge(&next),
            None => next,
        });
    }
    let Some(merged) = merged else {
        return Err("no lockfiles given".to_owned());
    };

    match output {
        Some(path) => {
            merged
                .write_to_file(path, &merged.metadata.recorded_options(), true)
                .map_err(|e| e.to_string())?;
            if json {
                let payload = serde_json::json!({
                    "output": path,
                    "platforms": merged.platforms(),
                    "packages": merged.package.len(),
                });
                println!("{}", json_pretty(&payload)?);
            } else {
                println!(
                    "merged {} lockfiles into {}",
                    lockfiles.len(),
                    path.display()
                );
            }
        }
        None => print!("{}", merged.render(None).map_err(|e| e.to_string())?),
    }
    Ok(EXIT_SUCCESS)
}
