//! CLI command implementations

use std::path::PathBuf;

use anyhow::Context;
use clap::Subcommand;
use homenet_core::SimTime;
use homenet_core::config::HomeNetworkConfig;
use homenet_sim::HomeNetworkScenario;

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Run the home network scenario
    Run {
        #[command(flatten)]
        overrides: Overrides,
        /// Log every trace record, including per-packet signals
        #[arg(short, long)]
        verbose: bool,
    },
    /// Print the effective configuration as JSON
    Config {
        #[command(flatten)]
        overrides: Overrides,
    },
}

/// Settings layered over defaults and `HOMENET_*` environment variables.
#[derive(clap::Args)]
pub struct Overrides {
    /// Simulated run length in seconds
    #[arg(long)]
    simulation_time: Option<f64>,
    /// Number of WiFi stations
    #[arg(long)]
    n_wifi: Option<u32>,
    /// Seed for every random draw in the run
    #[arg(long)]
    seed: Option<u64>,
    /// Write every trace record to this file as JSON lines
    #[arg(long)]
    trace_file: Option<PathBuf>,
}

impl Overrides {
    fn resolve(self) -> anyhow::Result<HomeNetworkConfig> {
        let mut config = HomeNetworkConfig::from_env();
        if let Some(secs) = self.simulation_time {
            config.run.simulation_time =
                SimTime::try_from_secs_f64(secs).context("invalid --simulation-time")?;
        }
        if let Some(n_wifi) = self.n_wifi {
            config.topology.n_wifi = n_wifi;
        }
        if let Some(seed) = self.seed {
            config.run.seed = seed;
        }
        if self.trace_file.is_some() {
            config.run.trace_file = self.trace_file;
        }
        config.validate()?;
        Ok(config)
    }
}

/// Handle the CLI command
///
/// # Errors
/// - `SimError::Configuration` - Invalid overrides or environment
/// - `SimError::ActionFault` - An endpoint failed during the run
pub fn handle_command(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Run { overrides, verbose } => {
            let mut config = overrides.resolve()?;
            config.run.verbose = verbose;
            tracing::debug!(?config, "effective configuration");
            run_scenario(config)
        }
        Commands::Config { overrides } => show_config(&overrides.resolve()?),
    }
}

/// Build and run the scenario, then print its summary
///
/// # Errors
/// - `SimError::Io` - Trace file could not be created
/// - `SimError::ActionFault` - An endpoint failed during the run
pub fn run_scenario(config: HomeNetworkConfig) -> anyhow::Result<()> {
    let scenario = HomeNetworkScenario::build(config).context("failed to build scenario")?;
    let report = scenario.run().context("simulation aborted")?;

    println!("{}", report.summary());
    Ok(())
}

/// Print the effective configuration
///
/// # Errors
/// - `serde_json::Error` - Configuration could not be serialized
pub fn show_config(config: &HomeNetworkConfig) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}
