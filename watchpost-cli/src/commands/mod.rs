//! Subcommand handlers.

pub mod upload;
