//! CLI-specific error types
//!
//! Every CLI error ends the process with a non-zero exit code.

use std::io;

use thiserror::Error;

use crate::catalog::CatalogError;

#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration file missing, unreadable or invalid
    #[error("{0}")]
    Config(String),

    #[error("{0}")]
    Io(String),

    /// Catalog could not be loaded
    #[error("{0}")]
    Catalog(#[from] CatalogError),

    /// Runtime or listener could not start
    #[error("{0}")]
    BootFailed(String),
}

impl CliError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        CliError::Config(msg.into())
    }

    pub fn boot_failed(msg: impl Into<String>) -> Self {
        CliError::BootFailed(msg.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            CliError::Config(_) => "STRATA_CLI_CONFIG_ERROR",
            CliError::Io(_) => "STRATA_CLI_IO_ERROR",
            CliError::Catalog(_) => "STRATA_CLI_CATALOG_ERROR",
            CliError::BootFailed(_) => "STRATA_CLI_BOOT_FAILED",
        }
    }
}

impl From<io::Error> for CliError {
    fn from(e: io::Error) -> Self {
        CliError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        CliError::Config(format!("JSON error: {}", e))
    }
}

/// CLI result type
pub type CliResult<T> = Result<T, CliError>;
