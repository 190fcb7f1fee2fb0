use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::level_filters::LevelFilter;

/// Default location of the compiled Hardhat artifacts.
const DEFAULT_ARTIFACTS_DIR: &str = "artifacts";

#[derive(Parser)]
#[command(name = "crossdeploy")]
#[command(
    author,
    version,
    about = "Deploy interdependent smart contracts across several EVM chains"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, env = "CROSSDEPLOY_VERBOSITY", default_value_t = LevelFilter::INFO)]
    pub verbosity: LevelFilter,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run a deployment plan.
    Run(RunArgs),
}

#[derive(clap::Args)]
pub struct RunArgs {
    /// Path to the deployment plan (TOML).
    pub plan: PathBuf,

    /// Directory holding the compiled contract artifacts.
    #[arg(long, env = "CROSSDEPLOY_ARTIFACTS", default_value = DEFAULT_ARTIFACTS_DIR)]
    pub artifacts: PathBuf,

    /// Path to the run state file.
    ///
    /// If not provided, the state is stored next to the plan as `<plan>.state.json`.
    #[arg(long, env = "CROSSDEPLOY_STATE")]
    pub state: Option<PathBuf>,

    /// Write a JSON summary of the run to this path.
    #[arg(long, env = "CROSSDEPLOY_SUMMARY")]
    pub summary: Option<PathBuf>,

    /// Redeploy every contract.
    /// If not provided, contracts confirmed by a previous run of the same plan are reused.
    #[arg(long, env = "CROSSDEPLOY_REDEPLOY", default_value_t = false)]
    pub redeploy: bool,

    /// Validate the plan and print the deployment order without submitting anything.
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
}
