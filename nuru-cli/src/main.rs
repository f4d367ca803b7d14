//! Nuru CLI - Command-line interface
//!
//! Starts the streaming server or cleans up after one.

mod commands;

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use nuru_core::tracing_setup::{CliLogLevel, init_tracing};

#[derive(Parser)]
#[command(name = "nuru")]
#[command(about = "Watch torrents while they download")]
struct Cli {
    /// Console log level; `NURU_LOG` or `RUST_LOG` overrides it
    #[arg(long, value_enum, default_value = "info", global = true)]
    log_level: CliLogLevel,

    /// Directory for the per-run trace log
    #[arg(long, global = true)]
    logs_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: commands::Commands,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_tracing_level(), cli.logs_dir.as_deref())
        .context("failed to initialize tracing")?;

    let exit_code = commands::handle_command(cli.command).await?;
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}
