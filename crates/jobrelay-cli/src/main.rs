//! JobRelay CLI entry point.

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt};

use jobrelay_core::config::AppConfig;
use jobrelay_core::config::logging::LoggingConfig;

mod commands;
mod output;

use commands::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Commands report configuration errors themselves; logging just falls
    // back to defaults.
    let logging = AppConfig::load(cli.config.as_deref())
        .map(|config| config.logging)
        .unwrap_or_default();
    init_logging(&logging, cli.verbose);

    if let Err(e) = cli.execute().await {
        tracing::debug!("Command failed: {:?}", e);
        output::print_error(&e.to_string());
        std::process::exit(1);
    }
}

/// Initialize tracing. Everything goes to stderr so stdout carries only
/// command output.
fn init_logging(config: &LoggingConfig, verbose: u8) {
    let level = match verbose {
        0 => config.level.as_str(),
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match config.format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(true)
                .init();
        }
        "pretty" => {
            fmt()
                .pretty()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_ansi(config.ansi)
                .with_target(true)
                .init();
        }
        _ => {
            fmt()
                .compact()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_ansi(config.ansi)
                .with_target(false)
                .init();
        }
    }
}
