//! Promptgrid CLI: runs prompting-technique sweeps against remote LLMs.
//!
//! Runs the sweep by default; subcommands inspect, verify, report on, and
//! repair an existing run.

mod commands;

use clap::Parser;
use promptgrid_core::config::SweepConfig;
use std::path::{Path, PathBuf};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Promptgrid: resumable prompting-technique sweeps
#[derive(Parser, Debug)]
#[command(name = "promptgrid", version, about, long_about = None)]
struct Cli {
    /// Workspace directory (relative paths in the config resolve against it)
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Configuration file path (defaults to <workspace>/promptgrid.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the result sink path
    #[arg(long)]
    results: Option<PathBuf>,

    /// Override the checkpoint path
    #[arg(long)]
    checkpoint: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    /// Subcommand (runs the sweep if omitted)
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand, Debug)]
pub(crate) enum Commands {
    /// Run (or resume) the sweep
    Run {
        /// Run one worker per provider instead of a single sequential stream
        #[arg(long)]
        parallel: bool,
    },
    /// Show how much of the grid is done
    Status,
    /// Check task files, exemplars, and credentials without calling any provider
    Verify,
    /// Print accuracy and token metrics per model and technique
    Report,
    /// Export the result sink as CSV
    Export {
        /// Output file
        #[arg(short, long, default_value = "results.csv")]
        out: PathBuf,
    },
    /// Rebuild the checkpoint from the result sink
    Repair,
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
pub(crate) enum ConfigAction {
    /// Write a default promptgrid.toml into the workspace
    Init,
    /// Print the resolved configuration
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    // Loaded before tracing so a configured log directory takes effect
    let loaded = promptgrid_core::config::load_config(Some(&workspace), cli.config.as_deref());

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    // Human-readable layer for stderr (always active)
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_filter(EnvFilter::new(filter));

    // JSON file layer for structured logging
    let log_dir = loaded
        .as_ref()
        .ok()
        .and_then(|c| c.paths.logs.as_ref())
        .map(|logs| workspace.join(logs))
        .or_else(|| {
            directories::ProjectDirs::from("dev", "promptgrid", "promptgrid")
                .map(|d| d.data_dir().join("logs"))
        })
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "promptgrid.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let mut config = loaded.map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    apply_path_overrides(&mut config, &workspace, cli.results, cli.checkpoint);

    let command = cli.command.unwrap_or(Commands::Run { parallel: false });
    commands::handle_command(command, &workspace, config).await
}

/// Apply `--results`/`--checkpoint`, then resolve every relative path against the workspace.
fn apply_path_overrides(
    config: &mut SweepConfig,
    workspace: &Path,
    results: Option<PathBuf>,
    checkpoint: Option<PathBuf>,
) {
    if let Some(results) = results {
        config.paths.results = results;
    }
    if let Some(checkpoint) = checkpoint {
        config.paths.checkpoint = checkpoint;
    }
    config.resolve_paths(workspace);
}
