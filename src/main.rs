//! dumpsync: incremental ingestion of wiki dumps
//!
//! Discovers the dumps of a wiki project, downloads what is missing and streams
//! deduplicated revisions, entity documents or sites to JSON lines.

mod commands;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dumpsync::config::Config;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "dumpsync")]
#[command(about = "Incremental wiki dump ingestion with cross-dump deduplication")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "dumpsync.toml")]
    config: PathBuf,

    /// Download root of the local dump cache
    #[arg(short, long)]
    download_root: Option<PathBuf>,

    /// Project (database) name, e.g. wikidatawiki
    #[arg(short, long)]
    project: Option<String>,

    /// Only use dumps that are already cached
    #[arg(long)]
    offline: bool,

    /// Quiet mode (no progress output)
    #[arg(short, long)]
    quiet: bool,

    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List known dumps
    List {
        /// Dump type (incr, current, full, sites, json); the covering set if omitted
        #[arg(short = 't', long = "type")]
        content_type: Option<String>,

        /// Base the covering set on a full-history dump
        #[arg(long)]
        full_history: bool,
    },

    /// Process all recent revision dumps to JSON lines
    Process {
        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Only revisions of this content model
        #[arg(short, long)]
        model: Option<String>,

        /// Only the current revision of each page
        #[arg(long)]
        current_only: bool,

        /// Write decoded entity documents instead of raw revisions
        #[arg(long)]
        documents: bool,

        /// Only process the most recent main dump
        #[arg(long)]
        main_only: bool,
    },

    /// Process the most recent JSON snapshot to JSON lines
    Json {
        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Only entities of this content model, e.g. wikibase-property
        #[arg(short, long)]
        model: Option<String>,
    },

    /// Process the most recent sites table to JSON lines
    Sites {
        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Write a default configuration file
    Init {
        /// Output directory
        #[arg(default_value = ".")]
        path: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Init { path } = &cli.command {
        return commands::init::init_config(path);
    }

    let mut config = if cli.config.exists() {
        Config::load(&cli.config)?
    } else {
        Config::default()
    };

    if let Some(download_root) = cli.download_root {
        config.dumps.download_root = download_root;
    }
    if let Some(project) = cli.project {
        config.dumps.project = project;
    }
    if cli.offline {
        config.dumps.offline = true;
    }
    if cli.quiet {
        config.processing.quiet = true;
    }
    config
        .validate()
        .context("Invalid settings after applying command line overrides")?;

    config.logging.init(cli.verbose)?;

    match cli.command {
        Commands::List {
            content_type,
            full_history,
        } => commands::list::list_dumps(config, content_type, full_history),
        Commands::Process {
            output,
            model,
            current_only,
            documents,
            main_only,
        } => commands::process::process_revisions(
            config,
            commands::process::ProcessOptions {
                output,
                model,
                current_only,
                documents,
                main_only,
            },
        ),
        Commands::Json { output, model } => commands::json::process_json(config, output, model),
        Commands::Sites { output } => commands::sites::process_sites(config, output),
        Commands::Init { .. } => Ok(()),
    }
}
