//! # strata HTTP Server
//!
//! JSON API over the layer catalog.
//!
//! # Endpoints
//!
//! - `/health`, `/metrics`
//! - `/layer/*` - layers, schema, versioning, features, change feed, revert
//! - `/layer/:id/txn/*` - batched transactions

pub mod config;
mod errors;
mod layer_routes;
mod observability_routes;
pub mod server;
mod txn_routes;

pub use config::HttpServerConfig;
pub use errors::{ApiError, ApiResult};
pub use server::{AppState, HttpServer};
