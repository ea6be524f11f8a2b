//! Watchpost CLI entry point.
//!
//! Parses arguments, initializes tracing, and dispatches to the
//! subcommand handlers. Errors are mapped to Unix exit codes via
//! [`error::CliError::exit_code`].

mod cli;
mod commands;
mod error;

use clap::Parser;

use crate::cli::{Cli, Commands};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = match &cli.command {
        Commands::Upload(args) if args.verbose => "debug".to_owned(),
        _ => cli.log_level.clone().unwrap_or_else(|| "info".to_owned()),
    };
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or(level))
        .init();

    let result = match cli.command {
        Commands::Upload(args) => commands::upload::execute(args, &cli.config).await,
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "command failed");
        eprintln!("watchpost: {e}");
        std::process::exit(e.exit_code());
    }
}
