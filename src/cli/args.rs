//! CLI argument definitions using clap
//!
//! Commands:
//! - strata serve --config <path> [--port <n>]
//! - strata check-config --config <path>

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// strata - a versioned vector feature store
#[derive(Parser, Debug)]
#[command(name = "strata")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Load the catalog and serve the HTTP API
    Serve {
        /// Path to configuration file
        #[arg(long, default_value = "./strata.json")]
        config: PathBuf,

        /// Overrides `http.port` from the configuration
        #[arg(long)]
        port: Option<u16>,
    },

    /// Validate a configuration file and print the effective configuration
    CheckConfig {
        /// Path to configuration file
        #[arg(long, default_value = "./strata.json")]
        config: PathBuf,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serve_with_port() {
        let cli = Cli::try_parse_from(["strata", "serve", "--config", "a.json", "--port", "8080"]).unwrap();
        match cli.command {
            Command::Serve { config, port } => {
                assert_eq!(config, PathBuf::from("a.json"));
                assert_eq!(port, Some(8080));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_check_config_default_path() {
        let cli = Cli::try_parse_from(["strata", "check-config"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::CheckConfig { config } if config == PathBuf::from("./strata.json")
        ));
    }
}
