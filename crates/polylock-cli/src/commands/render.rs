use super::{platform_override, EXIT_SUCCESS};
use crate::config::CliConfig;
use polylock_core::{EditableDependency, Engine};
use std::path::{Path, PathBuf};

pub fn run(
    config: &CliConfig,
    files: &[PathBuf],
    platforms: &[String],
    editables: &[(String, String)],
    output: Option<&Path>,
) -> Result<u8, String> {
    let engine = Engine::new();
    let spec = engine
        .aggregate(files, &platform_override(platforms, config))
        .map_err(|e| e.to_string())?;
    let editables: Vec<EditableDependency> = editables
        .iter()
        .map(|(name, path)| EditableDependency {
            name: name.clone(),
            path: path.clone(),
        })
        .collect();
    let rendered = engine
        .render(&spec, &editables)
        .map_err(|e| e.to_string())?;

    match output {
        Some(path) => {
            std::fs::write(path, rendered)
                .map_err(|e| format!("failed to write {}: {e}", path.display()))?;
            println!("wrote {}", path.display());
        }
        None => print!("{rendered}"),
    }
    Ok(EXIT_SUCCESS)
}
