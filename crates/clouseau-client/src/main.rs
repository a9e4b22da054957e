//! Clouseau client - follows a terminal session and records its commands.

use anyhow::Result;
use clap::Parser;
use clouseau_client::app::{self, RunOptions};
use clouseau_client::config::Config;
use clouseau_client::logging::{self, LogConfig, LogFormat};
use std::path::PathBuf;

/// Clouseau client - terminal session history recorder.
#[derive(Parser, Debug)]
#[command(name = "clouseau-client")]
#[command(about = "Attach to a terminal session server and record its command history")]
#[command(version)]
struct Cli {
    /// Path to config file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override the WebSocket URL from config
    #[arg(short, long)]
    url: Option<String>,

    /// Override the history file from config
    #[arg(long, value_name = "FILE")]
    history_file: Option<PathBuf>,

    /// Accept confirmation prompts and mark the prompted command as the run command
    #[arg(long)]
    accept_prompts: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Enable trace logging, including raw frames
    #[arg(long)]
    trace: bool,

    /// Quiet mode (WARN and ERROR only)
    #[arg(short, long)]
    quiet: bool,

    /// Set log level for specific targets (e.g., "transport=debug").
    /// Targets are prefixed with "clouseau::" automatically.
    #[arg(long = "log", value_name = "TARGET=LEVEL")]
    log_overrides: Vec<String>,

    /// Log output format
    #[arg(long = "log-format", value_name = "FORMAT", default_value = "text")]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = LogConfig::from_cli(
        cli.verbose,
        cli.debug,
        cli.trace,
        cli.quiet,
        cli.log_overrides,
        cli.log_format,
    );
    logging::init(&log_config);

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(url) = cli.url {
        config.url = url;
    }
    if let Some(history_file) = cli.history_file {
        config.history_file = history_file;
    }

    tracing::info!(target: "clouseau::startup", "Loaded configuration (url: {})", config.url);

    let summary = app::run(
        config,
        RunOptions {
            accept_prompts: cli.accept_prompts,
        },
    )
    .await?;

    if let Some(item) = summary.history.run_command_item() {
        tracing::info!(target: "clouseau::startup", "Run command: {}", item.text);
    }
    Ok(())
}
