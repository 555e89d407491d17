//! Versioning error types
//!
//! `Conflict` is an expected outcome of optimistic writes and is returned to
//! the caller. `Storage` marks a broken invariant and is fatal for the
//! write that produced it.

use thiserror::Error;

use super::types::{Epoch, Vid};
use crate::layer::LayerError;

/// Result type for versioned storage operations
pub type VersionResult<T> = Result<T, VersionError>;

/// Errors from versioned tables and the feature version schema
#[derive(Debug, Clone, PartialEq, Error)]
pub enum VersionError {
    /// No live row for the key
    #[error("Not found: {0}")]
    NotFound(String),

    /// Expected version does not match the stored one
    #[error("Version conflict on {key}: expected {expected}, current {actual}")]
    Conflict {
        key: String,
        expected: Vid,
        actual: Vid,
    },

    /// Insert of a key that already has a live or deleted row
    #[error("Key already exists: {0}")]
    KeyExists(String),

    /// Restore of a key whose last operation is not a delete
    #[error("Not deleted: {0}")]
    NotDeleted(String),

    /// Operation needs versioning but the layer is not versioned
    #[error("Versioning is not enabled")]
    VersioningDisabled,

    /// Versioning enable on an already versioned layer
    #[error("Versioning is already enabled")]
    VersioningEnabled,

    /// Epoch supplied by the caller is not the current one
    #[error("Epoch mismatch: expected {expected:?}, got {found:?}")]
    EpochMismatch {
        expected: Option<Epoch>,
        found: Option<Epoch>,
    },

    /// Version window outside `0..=latest` or reversed
    #[error("Invalid version range: {0}")]
    InvalidRange(String),

    /// Row or schema validation failure
    #[error(transparent)]
    Layer(#[from] LayerError),

    /// Invariant violation between current, event and history state
    #[error("Storage invariant violated: {0}")]
    Storage(String),
}

impl VersionError {
    /// Returns true for errors that indicate corrupted state.
    pub fn is_fatal(&self) -> bool {
        matches!(self, VersionError::Storage(_))
    }

    pub fn code(&self) -> &'static str {
        match self {
            VersionError::NotFound(_) => "not_found",
            VersionError::Conflict { .. } | VersionError::KeyExists(_) => "version.conflict",
            VersionError::NotDeleted(_) => "version.not_deleted",
            VersionError::VersioningDisabled => "versioning.required",
            VersionError::VersioningEnabled => "versioning.enabled",
            VersionError::EpochMismatch { .. } => "epoch_mismatch",
            VersionError::InvalidRange(_) => "version.invalid_range",
            VersionError::Layer(_) => "layer.invalid",
            VersionError::Storage(_) => "storage.error",
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            VersionError::NotFound(_) => 404,
            VersionError::Conflict { .. } | VersionError::KeyExists(_) => 409,
            VersionError::Storage(_) => 500,
            _ => 422,
        }
    }
}
