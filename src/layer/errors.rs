//! Layer definition error types

use thiserror::Error;

use crate::geometry::GeometryError;

/// Result type for layer definition and value coercion
pub type LayerResult<T> = Result<T, LayerError>;

/// Errors raised while validating definitions, rows or field values
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LayerError {
    /// Keyname does not match `^[A-Za-z_][A-Za-z0-9_]*$`
    #[error("Invalid field keyname: '{0}'")]
    InvalidKeyname(String),

    /// Two fields share a keyname
    #[error("Duplicate field keyname: '{0}'")]
    DuplicateField(String),

    /// Field referenced by a payload is not part of the definition
    #[error("Unknown field: '{0}'")]
    UnknownField(String),

    /// Unknown datatype name
    #[error("Unknown field datatype: '{0}'")]
    UnknownDatatype(String),

    /// JSON value does not fit the declared datatype
    #[error("Field '{field}' expects {expected}: {reason}")]
    InvalidValue {
        field: String,
        expected: String,
        reason: String,
    },

    /// Geometry type differs from the layer geometry type
    #[error("Geometry type mismatch: layer is {expected}, got {found}")]
    GeometryTypeMismatch { expected: String, found: String },

    /// Geometry failed to decode or validate
    #[error(transparent)]
    Geometry(#[from] GeometryError),
}
