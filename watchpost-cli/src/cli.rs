//! CLI argument parsing using clap derive API
//!
//! This module defines the command-line interface structure using clap's
//! derive macros. It is purely declarative with no side effects or I/O.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Watchpost -- edge log uploader for the watchpost collector.
///
/// Use `watchpost <COMMAND> --help` for subcommand details.
#[derive(Parser, Debug)]
#[command(name = "watchpost", version, about, long_about = None)]
pub struct Cli {
    /// Path to the watchpost.toml configuration file.
    #[arg(short, long, default_value = "watchpost.toml")]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Stream log data from a file or directory to the collector.
    Upload(UploadArgs),
}

// ---- upload ----

/// Stream Zeek-style log files to the collector backend.
#[derive(Args, Debug)]
pub struct UploadArgs {
    /// File or directory containing Zeek log(s).
    pub path: PathBuf,

    /// Hostname and port of the collector (e.g. "collector.internal:4850").
    #[arg(long, alias = "host")]
    pub hostname: Option<String>,

    /// Unique asset (network tap) identifier, alphanumeric only.
    #[arg(long, alias = "uid")]
    pub asset: Option<String>,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,

    /// Delay in seconds before recovering a failed connection.
    #[arg(long, value_name = "SECONDS")]
    pub delay: Option<u64>,

    /// How often in seconds to scan the file system for new files.
    #[arg(long, value_name = "SECONDS")]
    pub scan: Option<u64>,

    /// Number of lines to send per frame.
    #[arg(long, value_name = "LINES")]
    pub chunk_size: Option<usize>,

    /// Encrypt payload lines with the shared key.
    #[arg(long)]
    pub encrypt: bool,

    /// Shared encryption key (base64, 32 bytes). Stored in the state file.
    #[arg(long, value_name = "BASE64")]
    pub key: Option<String>,

    /// Override the local state file location.
    #[arg(long, value_name = "PATH")]
    pub state_file: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parse_upload_basic() {
        let args = Cli::try_parse_from(["watchpost", "upload", "/var/log/zeek"]);
        assert!(args.is_ok(), "should parse 'upload' subcommand");
        let cli = args.expect("parse succeeded");
        match cli.command {
            Commands::Upload(upload) => {
                assert_eq!(upload.path, PathBuf::from("/var/log/zeek"));
                assert!(upload.hostname.is_none());
                assert!(!upload.verbose);
                assert!(!upload.encrypt);
            }
        }
    }

    #[test]
    fn test_cli_parse_upload_full_flags() {
        let args = Cli::try_parse_from([
            "watchpost",
            "upload",
            "/var/log/zeek/conn.log",
            "--hostname",
            "collector:4850",
            "--asset",
            "tap01",
            "--verbose",
            "--delay",
            "10",
            "--scan",
            "30",
            "--chunk-size",
            "50",
            "--encrypt",
            "--key",
            "c2VjcmV0",
        ]);
        assert!(args.is_ok(), "should parse upload with all flags");
        let cli = args.expect("parse succeeded");
        match cli.command {
            Commands::Upload(upload) => {
                assert_eq!(upload.hostname, Some("collector:4850".to_owned()));
                assert_eq!(upload.asset, Some("tap01".to_owned()));
                assert!(upload.verbose);
                assert_eq!(upload.delay, Some(10));
                assert_eq!(upload.scan, Some(30));
                assert_eq!(upload.chunk_size, Some(50));
                assert!(upload.encrypt);
                assert_eq!(upload.key, Some("c2VjcmV0".to_owned()));
            }
        }
    }

    #[test]
    fn test_cli_parse_upload_host_alias() {
        let args =
            Cli::try_parse_from(["watchpost", "upload", "/logs", "--host", "collector:4850"]);
        assert!(args.is_ok(), "should accept --host alias");
        let cli = args.expect("parse succeeded");
        match cli.command {
            Commands::Upload(upload) => {
                assert_eq!(upload.hostname, Some("collector:4850".to_owned()));
            }
        }
    }

    #[test]
    fn test_cli_parse_upload_missing_path_fails() {
        let args = Cli::try_parse_from(["watchpost", "upload"]);
        assert!(args.is_err(), "should fail without path argument");
    }

    #[test]
    fn test_cli_parse_upload_multiple_paths_fails() {
        let args = Cli::try_parse_from(["watchpost", "upload", "/a", "/b"]);
        assert!(args.is_err(), "should fail with multiple path arguments");
    }

    #[test]
    fn test_cli_parse_state_file_override() {
        let args = Cli::try_parse_from([
            "watchpost",
            "upload",
            "/logs",
            "--state-file",
            "/tmp/agent.json",
        ]);
        assert!(args.is_ok(), "should parse state-file override");
        let cli = args.expect("parse succeeded");
        match cli.command {
            Commands::Upload(upload) => {
                assert_eq!(upload.state_file, Some(PathBuf::from("/tmp/agent.json")));
            }
        }
    }

    #[test]
    fn test_cli_parse_custom_config_path() {
        let args = Cli::try_parse_from(["watchpost", "-c", "/custom/config.toml", "upload", "/l"]);
        assert!(args.is_ok(), "should parse with custom config path");
        let cli = args.expect("parse succeeded");
        assert_eq!(cli.config, PathBuf::from("/custom/config.toml"));
    }

    #[test]
    fn test_cli_parse_missing_command_fails() {
        let args = Cli::try_parse_from(["watchpost"]);
        assert!(args.is_err(), "should fail when no command provided");
    }

    #[test]
    fn test_cli_verify_command_structure() {
        let cmd = Cli::command();
        assert_eq!(cmd.get_name(), "watchpost");
        let subcommands: Vec<_> = cmd.get_subcommands().map(|s| s.get_name()).collect();
        assert!(
            subcommands.contains(&"upload"),
            "should have 'upload' subcommand"
        );
    }
}
