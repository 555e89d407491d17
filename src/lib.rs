//! strata - a versioned vector feature store
//!
//! Layers of features with optional full-history versioning, point-in-time
//! reads, change feeds and revert, written through batched optimistic
//! transactions.

pub mod actions;
pub mod catalog;
pub mod cli;
pub mod extensions;
pub mod geometry;
pub mod http_server;
pub mod layer;
pub mod observability;
pub mod store;
pub mod txn;
pub mod versioning;
