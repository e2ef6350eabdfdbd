//! CLI commands

use clap::{Parser, Subcommand};

/// Hodos - local routing proxy for LLM coding tools
#[derive(Parser, Debug)]
#[command(name = "hodos")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the proxy service
    Start {
        /// Start it in the background and return once it is ready
        #[arg(short, long)]
        detach: bool,
    },

    /// Stop the background service
    Stop,

    /// Stop the service and start it again in the background
    Restart,

    /// Show whether the service is running
    Status,

    /// Run the coding CLI against the proxy, starting it if needed
    Code {
        /// Arguments passed through to the coding CLI
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_passes_flags_through() {
        let cli = Cli::parse_from(["hodos", "code", "--resume", "-p", "fix the build"]);
        match cli.command {
            Commands::Code { args } => assert_eq!(args, vec!["--resume", "-p", "fix the build"]),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_start_detach_flag() {
        let cli = Cli::parse_from(["hodos", "start", "--detach"]);
        assert!(matches!(cli.command, Commands::Start { detach: true }));

        let cli = Cli::parse_from(["hodos", "start"]);
        assert!(matches!(cli.command, Commands::Start { detach: false }));
    }
}
