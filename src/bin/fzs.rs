//! CLI entry point for the `fzs` fuzzy storage tool.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};

use fuzzy_store::cli::commands;
use fuzzy_store::FuzzyError;

#[derive(Parser)]
#[command(
    name = "fzs",
    about = "Fuzzy storage CLI: inspect and maintain fuzzy hash stores"
)]
struct Cli {
    /// Output format: "text" (default) or "json"
    #[arg(long, default_value = "text")]
    format: String,

    /// Enable debug logging
    #[arg(long)]
    verbose: bool,

    /// TOML configuration applied to the store
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new empty store
    Create {
        /// Path to the store file to create
        file: PathBuf,
    },
    /// Display information about a store
    Info {
        /// Path to the store file
        file: PathBuf,
    },
    /// Look up a digest, exactly and by shingles
    Check {
        /// Path to the store file
        file: PathBuf,
        /// Digest as 128 hex characters
        digest: String,
        /// Comma-separated list of 32 shingle values
        #[arg(long)]
        shingles: Option<String>,
        /// Only match entries with this flag
        #[arg(long)]
        flag: Option<u32>,
        /// Ignore entries idle for longer than this (e.g. "2d")
        #[arg(long, default_value = "2d")]
        expire: String,
    },
    /// Add or refresh a digest
    Add {
        /// Path to the store file
        file: PathBuf,
        /// Digest as 128 hex characters
        digest: String,
        /// Source performing the update
        #[arg(long, default_value = "fzs")]
        source: String,
        /// Comma-separated list of 32 shingle values
        #[arg(long)]
        shingles: Option<String>,
        /// Flag (list number)
        #[arg(long, default_value = "0")]
        flag: u32,
        /// Weight
        #[arg(long, default_value = "1")]
        weight: u64,
    },
    /// Delete a digest
    Del {
        /// Path to the store file
        file: PathBuf,
        /// Digest as 128 hex characters
        digest: String,
        /// Source performing the update
        #[arg(long, default_value = "fzs")]
        source: String,
    },
    /// Remove expired entries and checkpoint
    Sync {
        /// Path to the store file
        file: PathBuf,
        /// Expire entries idle for longer than this (e.g. "90d")
        #[arg(long, default_value = "2d")]
        expire: String,
        /// Also prune orphaned index references
        #[arg(long)]
        clean_orphaned: bool,
    },
    /// Rewrite storage compactly
    Vacuum {
        /// Path to the store file
        file: PathBuf,
    },
    /// Convert a legacy file to the current format
    Migrate {
        /// Path to the legacy file
        file: PathBuf,
    },
    /// Print the committed version of a source
    Version {
        /// Path to the store file
        file: PathBuf,
        /// Source name
        source: String,
    },
}

fn main() {
    let cli = Cli::parse();
    let json = cli.format == "json";

    let level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let config = cli.config.as_deref();
    let result = match cli.command {
        Commands::Create { file } => {
            commands::resolve_config(&file, config).and_then(commands::cmd_create)
        }
        Commands::Info { file } => commands::resolve_config(&file, config)
            .and_then(|cfg| commands::cmd_info(cfg, json)),
        Commands::Check {
            file,
            digest,
            shingles,
            flag,
            expire,
        } => fuzzy_store::config::parse_duration(&expire).and_then(|expire| {
            commands::resolve_config(&file, config).and_then(|cfg| {
                commands::cmd_check(cfg, &digest, shingles.as_deref(), flag, expire, json)
            })
        }),
        Commands::Add {
            file,
            digest,
            source,
            shingles,
            flag,
            weight,
        } => commands::resolve_config(&file, config).and_then(|cfg| {
            commands::cmd_add(cfg, &source, &digest, shingles.as_deref(), flag, weight, json)
        }),
        Commands::Del {
            file,
            digest,
            source,
        } => commands::resolve_config(&file, config)
            .and_then(|cfg| commands::cmd_del(cfg, &source, &digest, json)),
        Commands::Sync {
            file,
            expire,
            clean_orphaned,
        } => fuzzy_store::config::parse_duration(&expire).and_then(|expire| {
            commands::resolve_config(&file, config)
                .and_then(|cfg| commands::cmd_sync(cfg, expire, clean_orphaned, json))
        }),
        Commands::Vacuum { file } => commands::resolve_config(&file, config)
            .and_then(|cfg| commands::cmd_vacuum(cfg, json)),
        Commands::Migrate { file } => commands::resolve_config(&file, config)
            .and_then(|cfg| commands::cmd_migrate(cfg, json)),
        Commands::Version { file, source } => commands::resolve_config(&file, config)
            .and_then(|cfg| commands::cmd_version(cfg, &source, json)),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        let code = match &e {
            FuzzyError::Io(_) => 1,
            e if e.is_fatal() => 2,
            FuzzyError::Busy { .. } | FuzzyError::Conflict { .. } => 3,
            _ => 5,
        };
        process::exit(code);
    }
}
