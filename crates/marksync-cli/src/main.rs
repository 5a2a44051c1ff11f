//! marksync CLI
//!
//! Command-line interface for marksync - bookmark aggregation across
//! browsers and files.

use std::fs::OpenOptions;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use marksync_core::{Config, Pagination, SourceFormat, StorageError};

mod commands;
mod output;

use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "marksync")]
#[command(about = "marksync - Aggregate bookmarks from many sources into one store")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Config file to use instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch the configured sources and keep the database current
    Daemon,
    /// Import bookmarks from a file
    Import {
        /// File to read (JSON, text, or a buku database)
        file: PathBuf,
        /// File format (guessed from the extension when omitted)
        #[arg(short, long, value_enum)]
        format: Option<FormatArg>,
        /// Source id recorded on imported bookmarks (defaults to the file name)
        #[arg(long)]
        id: Option<String>,
    },
    /// List bookmarks
    #[command(alias = "ls")]
    List {
        /// Filter by tag
        #[arg(short, long)]
        tag: Option<String>,
        /// Free-text search over URL, title and tags
        #[arg(short, long)]
        search: Option<String>,
        /// Page number, starting at 1
        #[arg(long, default_value_t = 1)]
        page: usize,
        /// Bookmarks per page
        #[arg(long, default_value_t = 50)]
        size: usize,
        /// Show every match on one page
        #[arg(long, conflicts_with_all = ["page", "size"])]
        all: bool,
    },
    /// List all tags
    Tags,
    /// Show database status
    Status,
    /// Show the effective configuration
    Config,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FormatArg {
    Json,
    Text,
    Buku,
}

impl From<FormatArg> for SourceFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Json => SourceFormat::Json,
            FormatArg::Text => SourceFormat::Text,
            FormatArg::Buku => SourceFormat::Buku,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));

    let config_path = cli.config.clone().unwrap_or_else(Config::config_file_path);
    let config = Config::load_from_path(&config_path).context("Failed to load configuration")?;

    let daemon = matches!(cli.command, Commands::Daemon);
    init_logging(&config, cli.verbose, daemon);

    let result = match cli.command {
        Commands::Daemon => commands::daemon::run(config, &output).await,
        Commands::Import { file, format, id } => {
            commands::import::run(config, file, format.map(Into::into), id, &output)
        }
        Commands::List {
            tag,
            search,
            page,
            size,
            all,
        } => {
            let pagination = if all {
                Pagination::all()
            } else {
                Pagination { page, size }
            };
            commands::bookmark::list(&config, tag, search, pagination, &output)
        }
        Commands::Tags => commands::tag::list(&config, &output),
        Commands::Status => commands::status::show(&config, &output),
        Commands::Config => commands::config::show(&config, &config_path, &output),
    };

    if let Err(ref e) = result {
        print_storage_hint(e);
    }
    result
}

/// Point at a fix when the failure came from the storage layer
fn print_storage_hint(error: &anyhow::Error) {
    let Some(storage) = error
        .chain()
        .find_map(|cause| cause.downcast_ref::<StorageError>())
    else {
        return;
    };

    if let Some(hint) = storage.recovery_suggestion() {
        eprintln!("Hint: {}", hint);
    }
    if storage.is_recoverable() {
        eprintln!("The command can be re-run once this is resolved.");
    }
}

/// Initialize logging
///
/// RUST_LOG takes precedence. Otherwise the level follows `--verbose`,
/// starting at `info` for the daemon and `warn` for one-shot commands.
/// Logs go to `log_file` when configured, stderr otherwise.
fn init_logging(config: &Config, verbose: u8, daemon: bool) {
    let base = if daemon { 1 } else { 0 };
    let level = match base + verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("marksync_core={},marksync_cli={}", level, level))
    });

    if let Some(ref log_path) = config.log_file {
        match OpenOptions::new().create(true).append(true).open(log_path) {
            Ok(file) => {
                // Ignore error if already initialized
                let _ = tracing_subscriber::fmt()
                    .with_env_filter(env_filter)
                    .with_target(false)
                    .with_ansi(false)
                    .with_writer(file)
                    .try_init();
                return;
            }
            Err(e) => {
                eprintln!("Warning: Could not open log file {:?}: {}", log_path, e);
            }
        }
    }

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
