use super::{
    build_engine, colorize_status, json_pretty, platform_override, EngineOptions, EXIT_OUT_OF_DATE,
    EXIT_SUCCESS,
};
use crate::config::CliConfig;
use polylock_core::CheckReport;
use polylock_schema::Lockfile;
use std::path::PathBuf;

pub struct CheckArgs {
    pub files: Vec<PathBuf>,
    pub platforms: Vec<String>,
    pub lockfile: PathBuf,
    pub categories: Vec<String>,
}

pub fn run(
    config: &CliConfig,
    options: &EngineOptions,
    args: &CheckArgs,
    json: bool,
    verbose: bool,
) -> Result<u8, String> {
    let engine = build_engine(config, options)?;
    let spec = engine
        .aggregate(&args.files, &platform_override(&args.platforms, config))
        .map_err(|e| e.to_string())?;
    let lockfile = Lockfile::read_from_file(&args.lockfile).map_err(|e| e.to_string())?;
    let report = engine
        .check(&lockfile, &spec, &args.categories)
        .map_err(|e| e.to_string())?;

    if json {
        println!("{}", json_pretty(&report)?);
    } else {
        print_report(&report, verbose);
    }

    if report.passed {
        Ok(EXIT_SUCCESS)
    } else {
        if !json {
            eprintln!(
                "error: {} is out of date with its sources",
                args.lockfile.display()
            );
        }
        Ok(EXIT_OUT_OF_DATE)
    }
}

fn print_report(report: &CheckReport, verbose: bool) {
    for platform in &report.platforms {
        let status = if platform.passed() { "ok" } else { "out of date" };
        let hash = if platform.content_hash_current {
            String::new()
        } else {
            format!(" ({})", colorize_status("stale"))
        };
        println!("{:<16} {}{hash}", platform.platform.as_str(), colorize_status(status));

        for check in &platform.categories {
            if check.passed() && !verbose {
                continue;
            }
            let label = format!("{}/{}", check.category, check.manager);
            if check.passed() {
                println!("  {label}: ok");
                continue;
            }
            if !check.missing.is_empty() {
                println!("  {label}: missing {}", check.missing.join(", "));
            }
            if !check.extra.is_empty() {
                println!("  {label}: not requested {}", check.extra.join(", "));
            }
            for m in &check.mismatched {
                println!(
                    "  {label}: {} {} does not match '{}'",
                    m.name, m.locked, m.constraint
                );
            }
        }
    }
}
