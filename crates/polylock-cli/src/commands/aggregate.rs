use super::{json_pretty, platform_override, EXIT_SUCCESS};
use crate::config::CliConfig;
use polylock_core::Engine;
use polylock_schema::DependencySource;
use std::path::PathBuf;

pub fn run(
    config: &CliConfig,
    files: &[PathBuf],
    platforms: &[String],
    json: bool,
) -> Result<u8, String> {
    let engine = Engine::new();
    let spec = engine
        .aggregate(files, &platform_override(platforms, config))
        .map_err(|e| e.to_string())?;

    if json {
        println!("{}", json_pretty(&spec)?);
        return Ok(EXIT_SUCCESS);
    }

    let channels: Vec<&str> = spec.channels.iter().map(|c| c.url.as_str()).collect();
    println!("channels: {}", channels.join(", "));
    if !spec.pip_repositories.is_empty() {
        let repos: Vec<&str> = spec.pip_repositories.iter().map(|r| r.url.as_str()).collect();
        println!("pip repositories: {}", repos.join(", "));
    }
    for (platform, deps) in &spec.dependencies {
        println!("{platform}: {} dependencies", deps.len());
        for dep in deps {
            let source = match &dep.source {
                DependencySource::Versioned { version, .. } => version.clone(),
                DependencySource::Url { url, .. } => url.clone(),
                DependencySource::Vcs { source, rev, .. } => match rev {
                    Some(rev) => format!("{source}@{rev}"),
                    None => source.clone(),
                },
                DependencySource::Path { path, .. } => path.clone(),
            };
            println!(
                "  {:<24} {:<5} {:<8} {source}",
                dep.name,
                dep.manager.as_str(),
                dep.category
            );
        }
    }
    Ok(EXIT_SUCCESS)
}
