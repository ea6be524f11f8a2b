//! Daemon argument parsing.

use std::path::PathBuf;

use clap::Parser;

/// Watchpost collector daemon.
#[derive(Parser, Debug)]
#[command(name = "watchpost-daemon", version, about)]
pub struct DaemonArgs {
    /// Path to the watchpost.toml configuration file.
    #[arg(short, long, default_value = "watchpost.toml")]
    pub config: PathBuf,
}
