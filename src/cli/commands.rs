//! CLI command implementations

use std::path::Path;
use std::sync::Arc;

use super::args::Command;
use super::config::Config;
use super::errors::{CliError, CliResult};
use crate::catalog::Catalog;
use crate::http_server::HttpServer;
use crate::observability::{log_event_with_fields, Event, Logger};

pub fn run_command(cmd: Command) -> CliResult<()> {
    match cmd {
        Command::Serve { config, port } => serve(&config, port),
        Command::CheckConfig { config } => check_config(&config),
    }
}

/// Boots the catalog described by `config`.
pub fn open_catalog(config: &Config) -> CliResult<Catalog> {
    let catalog = match &config.data_dir {
        Some(dir) => Catalog::open(dir)?,
        None => Catalog::in_memory(),
    };
    Ok(catalog)
}

/// Loads the configuration and catalog, then serves HTTP until the
/// listener fails.
pub fn serve(config_path: &Path, port: Option<u16>) -> CliResult<()> {
    let mut config = Config::load(config_path)?;
    if let Some(port) = port {
        config.http.port = port;
    }
    Logger::set_level(config.log_level);

    let data_dir = config
        .data_dir
        .as_ref()
        .map(|d| d.display().to_string())
        .unwrap_or_else(|| "(memory)".to_string());
    log_event_with_fields(
        Event::ConfigLoaded,
        &[("path", &config_path.display().to_string()), ("data_dir", &data_dir)],
    );

    let catalog = Arc::new(open_catalog(&config)?);
    let layers = catalog.layer_ids().len().to_string();
    let server = HttpServer::with_catalog(config.http.clone(), catalog, config.changes_page_size);
    let addr = server.socket_addr();

    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| CliError::boot_failed(format!("Failed to create tokio runtime: {}", e)))?;

    log_event_with_fields(Event::ServerStarted, &[("addr", &addr), ("layers", &layers)]);
    rt.block_on(async { server.start().await }).map_err(|e| {
        log_event_with_fields(Event::ServerFailed, &[("addr", &addr), ("reason", &e.to_string())]);
        CliError::boot_failed(format!("HTTP server failed: {}", e))
    })
}

/// Prints the effective configuration as JSON.
pub fn check_config(config_path: &Path) -> CliResult<()> {
    let config = Config::load(config_path)?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
