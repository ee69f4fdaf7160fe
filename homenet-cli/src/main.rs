//! Homenet CLI - Command-line interface
//!
//! Runs the home network scenario and inspects its configuration.

mod commands;

use std::path::PathBuf;

use clap::Parser;
use homenet_core::tracing_setup::{CliLogLevel, init_tracing};

#[derive(Parser)]
#[command(name = "homenet")]
#[command(about = "Discrete-event simulation of a home network")]
struct Cli {
    /// Console log level
    #[arg(long, value_enum, default_value_t = CliLogLevel::Info, global = true)]
    log_level: CliLogLevel,

    /// Directory for the per-run debug log
    #[arg(long, global = true)]
    logs_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: commands::Commands,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_tracing_level(), cli.logs_dir.as_deref())?;

    commands::handle_command(cli.command)
}
