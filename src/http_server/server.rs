//! # HTTP Server
//!
//! Axum router over a shared catalog.

use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use super::config::HttpServerConfig;
use super::layer_routes::layer_routes;
use super::observability_routes::observability_routes;
use super::txn_routes::txn_routes;
use crate::catalog::Catalog;
use crate::observability::Logger;

/// State shared by every handler.
pub struct AppState {
    pub catalog: Arc<Catalog>,
    /// Default change-feed page size
    pub page_size: usize,
}

pub struct HttpServer {
    config: HttpServerConfig,
    router: Router,
}

impl HttpServer {
    /// Serves an empty in-memory catalog.
    pub fn new() -> Self {
        Self::with_catalog(HttpServerConfig::default(), Arc::new(Catalog::in_memory()), 1000)
    }

    pub fn with_catalog(config: HttpServerConfig, catalog: Arc<Catalog>, page_size: usize) -> Self {
        let state = Arc::new(AppState {
            catalog,
            page_size: page_size.max(1),
        });
        let router = Self::build_router(&config, state);
        Self { config, router }
    }

    fn build_router(config: &HttpServerConfig, state: Arc<AppState>) -> Router {
        let cors = if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|s| s.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(origins))
                .allow_methods(Any)
                .allow_headers(Any)
        };

        Router::new()
            .merge(observability_routes(state.clone()))
            .merge(layer_routes(state.clone()))
            .merge(txn_routes(state))
            .layer(cors)
    }

    pub fn socket_addr(&self) -> String {
        self.config.socket_addr()
    }

    /// Get the router (for testing)
    pub fn router(self) -> Router {
        self.router
    }

    pub async fn start(self) -> Result<(), std::io::Error> {
        let addr = self.config.bind_addr()?;
        let listener = TcpListener::bind(addr).await?;
        Logger::info("HTTP_LISTENING", &[("addr", &addr.to_string())]);
        axum::serve(listener, self.router).await
    }
}

impl Default for HttpServer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_creation() {
        let server = HttpServer::new();
        assert_eq!(server.socket_addr(), "0.0.0.0:54321");
    }

    #[test]
    fn test_router_builds_with_origins() {
        let config = HttpServerConfig {
            cors_origins: vec!["http://localhost:5173".into()],
            ..HttpServerConfig::with_port(8080)
        };
        let server = HttpServer::with_catalog(config, Arc::new(Catalog::in_memory()), 10);
        assert_eq!(server.socket_addr(), "0.0.0.0:8080");
        let _router = server.router();
    }
}
