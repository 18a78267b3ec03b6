use super::{build_engine, json_pretty, platform_override, EngineOptions, EXIT_SUCCESS};
use crate::config::CliConfig;
use std::path::PathBuf;

pub fn run(
    config: &CliConfig,
    options: &EngineOptions,
    files: &[PathBuf],
    platforms: &[String],
    json: bool,
) -> Result<u8, String> {
    let engine = build_engine(config, options)?;
    let spec = engine
        .aggregate(files, &platform_override(platforms, config))
        .map_err(|e| e.to_string())?;
    let hashes = engine.content_hashes(&spec).map_err(|e| e.to_string())?;

    if json {
        println!("{}", json_pretty(&hashes)?);
    } else {
        for (platform, hash) in &hashes {
            println!("{:<16} {hash}", platform.as_str());
        }
    }
    Ok(EXIT_SUCCESS)
}
