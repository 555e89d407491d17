//! CLI module for strata
//!
//! Provides command-line interface for:
//! - serve: load the catalog and serve the HTTP API
//! - check-config: validate a configuration file

mod args;
mod commands;
mod config;
mod errors;

pub use args::{Cli, Command};
pub use commands::{check_config, open_catalog, run_command, serve};
pub use config::Config;
pub use errors::{CliError, CliResult};

/// Parses arguments and runs the selected command.
pub fn run() -> CliResult<()> {
    run_command(Cli::parse_args().command)
}
