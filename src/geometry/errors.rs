//! Geometry error types

use thiserror::Error;

/// Result type for geometry operations
pub type GeometryResult<T> = Result<T, GeometryError>;

/// Errors raised while decoding, validating or converting geometries
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryError {
    /// WKT text could not be parsed
    #[error("Invalid WKT at position {position}: {reason}")]
    InvalidWkt { position: usize, reason: String },

    /// WKB bytes could not be decoded
    #[error("Invalid WKB: {0}")]
    InvalidWkb(String),

    /// Unknown geometry type name or WKB type code
    #[error("Unknown geometry type: {0}")]
    UnknownType(String),

    /// Structurally invalid geometry (too few points, open ring, ...)
    #[error("Invalid geometry: {0}")]
    Invalid(String),

    /// Conversion between two geometry types is not possible
    #[error("Cannot convert {from} to {to}: {reason}")]
    Conversion {
        from: String,
        to: String,
        reason: String,
    },
}
