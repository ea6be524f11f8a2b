//! CLI-specific error types and exit code mapping

use watchpost_core::error::WatchpostError;
use watchpost_ingest::IngestError;

/// CLI-specific error type.
///
/// Each variant carries enough context for a user-friendly message.
/// The `exit_code()` method maps errors to standard Unix exit codes.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Configuration loading or validation failure.
    #[error("configuration error: {0}")]
    Config(String),

    /// Invalid command-line argument combination.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A subcommand-specific operation failed.
    #[error("{0}")]
    Command(String),

    /// Upload agent domain error.
    #[error("upload error: {0}")]
    Upload(#[from] IngestError),

    /// IO error (file read, stdout write, etc.).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Wrapped domain error from watchpost-core.
    #[error("{0}")]
    Core(#[from] WatchpostError),
}

impl CliError {
    /// Map the error to a process exit code.
    ///
    /// | Code | Meaning                  |
    /// |------|--------------------------|
    /// | 0    | Success                  |
    /// | 1    | General / command error  |
    /// | 2    | Config / argument error  |
    /// | 10   | IO error                 |
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::InvalidArgument(_) => 2,
            Self::Io(_) => 10,
            Self::Command(_) | Self::Upload(_) | Self::Core(_) => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_config_error() {
        let err = CliError::Config("test error".to_owned());
        assert_eq!(err.exit_code(), 2, "config error should return exit code 2");
    }

    #[test]
    fn test_exit_code_invalid_argument() {
        let err = CliError::InvalidArgument("missing hostname".to_owned());
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_exit_code_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = CliError::Io(io_err);
        assert_eq!(err.exit_code(), 10, "io error should return exit code 10");
    }

    #[test]
    fn test_exit_code_command_error() {
        let err = CliError::Command("test error".to_owned());
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_error_display_invalid_argument() {
        let err = CliError::InvalidArgument("must provide hostname of backend".to_owned());
        let display_str = format!("{}", err);
        assert!(display_str.contains("invalid argument"));
        assert!(display_str.contains("hostname"));
    }

    #[test]
    fn test_from_upload_error() {
        let upload_err = IngestError::PathNotFound {
            path: "/gone".to_owned(),
        };
        let cli_err: CliError = upload_err.into();
        assert_eq!(cli_err.exit_code(), 1);
        assert!(cli_err.to_string().contains("/gone"));
    }
}
