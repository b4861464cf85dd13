//! CLI command definitions and dispatch.

pub mod check;
pub mod config;
pub mod run;

use clap::{Parser, Subcommand};

use crate::output::OutputFormat;
use jobrelay_core::config::AppConfig;
use jobrelay_core::error::AppError;

/// JobRelay: run batches of command jobs on a bounded worker pool
#[derive(Debug, Parser)]
#[command(name = "jobrelay", version, about, long_about = None)]
pub struct Cli {
    /// Path to a configuration file, layered over config/default.toml
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table", global = true)]
    pub format: OutputFormat,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run every job in a job file
    Run(run::RunArgs),
    /// Validate a job file and list the steps it would run
    Check(check::CheckArgs),
    /// Configuration management
    Config(config::ConfigArgs),
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(&self) -> Result<(), AppError> {
        let config_path = self.config.as_deref();
        match &self.command {
            Commands::Run(args) => run::execute(args, config_path, self.format).await,
            Commands::Check(args) => check::execute(args, config_path, self.format).await,
            Commands::Config(args) => config::execute(args, config_path, self.format).await,
        }
    }
}

/// Helper: load configuration
pub fn load_config(config_path: Option<&str>) -> Result<AppConfig, AppError> {
    AppConfig::load(config_path)
}
