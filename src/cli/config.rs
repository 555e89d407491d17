//! Configuration file
//!
//! `strata.json`:
//!
//! ```json
//! {
//!   "data_dir": "./data",
//!   "http": {"host": "0.0.0.0", "port": 54321, "cors_origins": []},
//!   "changes_page_size": 1000,
//!   "log_level": "info"
//! }
//! ```
//!
//! Every key is optional. Without `data_dir` the catalog lives in memory.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::errors::{CliError, CliResult};
use crate::http_server::HttpServerConfig;
use crate::observability::LogLevel;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Snapshot directory; `None` keeps layers in memory
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    #[serde(default)]
    pub http: HttpServerConfig,

    /// Fids per change-feed page when the request names no limit
    #[serde(default = "default_changes_page_size")]
    pub changes_page_size: usize,

    #[serde(default)]
    pub log_level: LogLevel,
}

fn default_changes_page_size() -> usize {
    1000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: None,
            http: HttpServerConfig::default(),
            changes_page_size: default_changes_page_size(),
            log_level: LogLevel::default(),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load(path: &Path) -> CliResult<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| CliError::config_error(format!("Failed to read config {}: {}", path.display(), e)))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> CliResult<Self> {
        let config: Config = serde_json::from_str(content)
            .map_err(|e| CliError::config_error(format!("Invalid config JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> CliResult<()> {
        if self.changes_page_size == 0 {
            return Err(CliError::config_error("changes_page_size must be > 0"));
        }
        if self.http.host.trim().is_empty() {
            return Err(CliError::config_error("http.host must not be empty"));
        }
        if let Some(dir) = &self.data_dir {
            if dir.as_os_str().is_empty() {
                return Err(CliError::config_error("data_dir must not be empty"));
            }
        }
        Ok(())
    }
}
