mod commands;
mod config;

use clap::{Args, Parser, Subcommand};
use commands::{exit_code_for, parse_key_value, EngineOptions};
use config::CliConfig;
use polylock_schema::{MetadataOption, DEFAULT_LOCKFILE_NAME, MANIFEST_FILE_NAME};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "polylock",
    version,
    about = "Aggregate conda and pip lock specifications and keep lockfiles consistent"
)]
struct Cli {
    /// Path to a JSON config file (default: ~/.config/polylock/config.json).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Where the specification comes from.
#[derive(Debug, Args)]
struct SourceArgs {
    /// Source manifest; repeat to aggregate several.
    #[arg(short = 'f', long = "file", default_value = MANIFEST_FILE_NAME)]
    files: Vec<PathBuf>,
    /// Platform to lock for; repeat for several. Overrides the manifests.
    #[arg(short, long = "platform")]
    platforms: Vec<String>,
}

#[derive(Debug, Args)]
struct HashingArgs {
    /// Use the default virtual packages with this CUDA version.
    #[arg(long, value_name = "VERSION")]
    with_cuda: Option<String>,
    /// TOML file describing the virtual packages of each platform.
    #[arg(long, value_name = "PATH", conflicts_with = "with_cuda")]
    virtual_package_spec: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Merge source manifests and print the combined specification.
    Aggregate {
        #[command(flatten)]
        source: SourceArgs,
    },
    /// Print the content hash of each platform of the specification.
    Hash {
        #[command(flatten)]
        source: SourceArgs,
        #[command(flatten)]
        hashing: HashingArgs,
    },
    /// Solve stale platforms against a package index and write the lockfile.
    Lock {
        #[command(flatten)]
        source: SourceArgs,
        #[command(flatten)]
        hashing: HashingArgs,
        /// Package index TOML the solver resolves against.
        #[arg(long)]
        index: PathBuf,
        /// Lockfile to read and update.
        #[arg(long, default_value = DEFAULT_LOCKFILE_NAME)]
        lockfile: PathBuf,
        /// Re-resolve these packages instead of keeping their pins.
        #[arg(long)]
        update: Vec<String>,
        /// Provenance to record in the metadata section; repeat for several.
        #[arg(long = "md", value_name = "OPTION")]
        metadata: Vec<MetadataOption>,
        /// Extra KEY=VALUE pairs for the custom metadata section.
        #[arg(long = "custom-md", value_name = "KEY=VALUE", value_parser = parse_key_value)]
        custom_metadata: Vec<(String, String)>,
        /// JSON conda/PyPI name-mapping table.
        #[arg(long)]
        mapping: Option<PathBuf>,
        /// Leave out the explanatory comment header.
        #[arg(long, default_value_t = false)]
        without_help_text: bool,
    },
    /// Check a lockfile against the specification without solving.
    Check {
        #[command(flatten)]
        source: SourceArgs,
        #[command(flatten)]
        hashing: HashingArgs,
        /// Lockfile to check.
        #[arg(long, default_value = DEFAULT_LOCKFILE_NAME)]
        lockfile: PathBuf,
        /// Also check the dev category.
        #[arg(long, default_value_t = false)]
        dev: bool,
        /// Also check these extra categories.
        #[arg(short, long = "extras", value_name = "CATEGORY")]
        extras: Vec<String>,
    },
    /// Merge lockfiles; later files replace the platforms they cover.
    Merge {
        /// Lockfiles, oldest first.
        #[arg(required = true, num_args = 2..)]
        lockfiles: Vec<PathBuf>,
        /// Write here instead of printing to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Export the specification as a platform-reduced project manifest.
    Render {
        #[command(flatten)]
        source: SourceArgs,
        /// Editable pip dependency as NAME=PATH; repeat for several.
        #[arg(long = "editable", value_name = "NAME=PATH", value_parser = parse_key_value)]
        editables: Vec<(String, String)>,
        /// Write here instead of printing to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Rewrite a lockfile in canonical order.
    Fmt {
        #[arg(default_value = DEFAULT_LOCKFILE_NAME)]
        lockfile: PathBuf,
        /// Only report whether the file is already formatted.
        #[arg(long, default_value_t = false)]
        check: bool,
    },
}

impl HashingArgs {
    fn engine_options(self, name_mapping: Option<PathBuf>) -> EngineOptions {
        EngineOptions {
            with_cuda: self.with_cuda,
            virtual_package_spec: self.virtual_package_spec,
            name_mapping,
        }
    }
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("POLYLOCK_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let json = cli.json;
    let verbose = cli.verbose || cli.trace;
    let result = CliConfig::resolve(cli.config.as_deref())
        .and_then(|config| dispatch(cli.command, &config, json, verbose));

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            ExitCode::from(exit_code_for(&msg))
        }
    }
}

fn dispatch(
    command: Commands,
    config: &CliConfig,
    json: bool,
    verbose: bool,
) -> Result<u8, String> {
    match command {
        Commands::Aggregate { source } => {
            commands::aggregate::run(config, &source.files, &source.platforms, json)
        }
        Commands::Hash { source, hashing } => commands::hash::run(
            config,
            &hashing.engine_options(None),
            &source.files,
            &source.platforms,
            json,
        ),
        Commands::Lock {
            source,
            hashing,
            index,
            lockfile,
            update,
            metadata,
            custom_metadata,
            mapping,
            without_help_text,
        } => commands::lock::run(
            config,
            &hashing.engine_options(mapping.or_else(|| config.name_mapping.clone())),
            &commands::lock::LockArgs {
                files: source.files,
                platforms: source.platforms,
                index,
                lockfile,
                update,
                metadata,
                custom_metadata,
                help_text: !without_help_text,
            },
            json,
        ),
        Commands::Check {
            source,
            hashing,
            lockfile,
            dev,
            extras,
        } => commands::check::run(
            config,
            &hashing.engine_options(None),
            &commands::check::CheckArgs {
                files: source.files,
                platforms: source.platforms,
                lockfile,
                categories: polylock_core::categories_to_check(dev, &extras),
            },
            json,
            verbose,
        ),
        Commands::Merge { lockfiles, output } => {
            commands::merge::run(&lockfiles, output.as_deref(), json)
        }
        Commands::Render {
            source,
            editables,
            output,
        } => commands::render::run(
            config,
            &source.files,
            &source.platforms,
            &editables,
            output.as_deref(),
        ),
        Commands::Fmt { lockfile, check } => commands::fmt::run(&lockfile, check, json),
    }
}
