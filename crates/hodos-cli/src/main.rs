//! Hodos - local routing proxy for LLM coding tools

use clap::Parser;
use colored::Colorize;
use hodos_config::HodosPaths;
use hodos_telemetry::TelemetryConfig;

mod code;
mod commands;
mod service;

use commands::{Cli, Commands};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // `start` installs its own subscriber once it knows whether it is detached.
    if !matches!(cli.command, Commands::Start { detach: false }) {
        hodos_telemetry::init_subscriber(&TelemetryConfig {
            level: "warn".to_string(),
            json_output: false,
        });
    }

    let result = match HodosPaths::resolve() {
        Ok(paths) => run(cli.command, &paths).await,
        Err(e) => Err(e.into()),
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("{}: {:#}", "Error".red().bold(), e);
            std::process::exit(1);
        }
    }
}

async fn run(command: Commands, paths: &HodosPaths) -> anyhow::Result<i32> {
    match command {
        Commands::Start { detach } => service::run_start(paths, detach).await?,
        Commands::Stop => service::run_stop(paths)?,
        Commands::Restart => service::run_restart(paths).await?,
        Commands::Status => service::run_status(paths)?,
        Commands::Code { args } => return code::run_code(paths, args).await,
    }
    Ok(0)
}
