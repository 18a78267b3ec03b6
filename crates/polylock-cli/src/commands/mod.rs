pub mod aggregate;
pub mod check;
pub mod fmt;
pub mod hash;
pub mod lock;
pub mod merge;
pub mod render;

use crate::config::CliConfig;
use indicatif::{ProgressBar, ProgressStyle};
use polylock_core::{Engine, MappingTable};
use polylock_schema::{default_virtual_package_repo, Platform, VirtualPackageRepo};
use std::path::PathBuf;
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_MALFORMED_INPUT: u8 = 2;
pub const EXIT_AGGREGATION_CONFLICT: u8 = 3;
pub const EXIT_OUT_OF_DATE: u8 = 4;

const MALFORMED_PREFIXES: &[&str] = &[
    "manifest error:",
    "failed to parse manifest",
    "failed to read manifest",
    "lock error:",
    "lock file",
    "invalid lock file",
    "package index error:",
    "name mapping error:",
    "virtual package error:",
    "config error:",
];

/// Map a command error message to its process exit code.
pub fn exit_code_for(msg: &str) -> u8 {
    if msg.starts_with("aggregation conflict:") {
        EXIT_AGGREGATION_CONFLICT
    } else if MALFORMED_PREFIXES.iter().any(|p| msg.starts_with(p)) {
        EXIT_MALFORMED_INPUT
    } else {
        EXIT_FAILURE
    }
}

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .expect("valid template")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("✗ {msg}"));
}

pub fn colorize_status(status: &str) -> String {
    use console::Style;
    match status {
        "ok" | "locked" => Style::new().green().apply_to(status).to_string(),
        "up to date" => Style::new().cyan().apply_to(status).to_string(),
        "stale" => Style::new().yellow().apply_to(status).to_string(),
        "failed" | "out of date" => Style::new().red().bold().apply_to(status).to_string(),
        other => other.to_owned(),
    }
}

/// Split a `key=value` argument.
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_owned(), v.trim().to_owned())),
        _ => Err(format!("expected KEY=VALUE, got '{s}'")),
    }
}

/// `--platform` flags, else the configured platforms, else none (each
/// manifest decides).
pub fn platform_override(flags: &[String], config: &CliConfig) -> Vec<Platform> {
    let chosen = if flags.is_empty() {
        &config.platforms
    } else {
        flags
    };
    chosen.iter().map(|p| Platform::new(p.trim())).collect()
}

/// Engine knobs shared by every command that hashes or locks.
#[derive(Debug, Default, Clone)]
pub struct EngineOptions {
    pub with_cuda: Option<String>,
    pub virtual_package_spec: Option<PathBuf>,
    pub name_mapping: Option<PathBuf>,
}

pub fn build_engine(config: &CliConfig, options: &EngineOptions) -> Result<Engine, String> {
    let mut engine = Engine::new();

    if let Some(path) = &options.virtual_package_spec {
        let repo = VirtualPackageRepo::from_spec_file(path)
            .map_err(|e| format!("virtual package error: {}: {e}", path.display()))?;
        engine = engine.with_virtual_packages(Some(repo));
    } else if let Some(cuda) = &options.with_cuda {
        engine = engine.with_virtual_packages(Some(default_virtual_package_repo(cuda)));
    }

    if !config.category_priority.is_empty() {
        engine = engine.with_category_priority(config.category_priority.clone());
    }

    if options.name_mapping.is_some() || !config.name_overrides.is_empty() {
        let mut table = match &options.name_mapping {
            Some(path) => MappingTable::from_json_file(path)
                .map_err(|e| format!("name mapping error: {}: {e}", path.display()))?,
            None => MappingTable::new(),
        };
        table.set_overrides(&config.name_overrides);
        engine = engine.with_name_mapper(Box::new(table));
    }
    Ok(engine)
}
