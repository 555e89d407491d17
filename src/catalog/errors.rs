//! Catalog errors

use thiserror::Error;

use super::LayerId;
use crate::layer::LayerError;
use crate::txn::TxnError;
use crate::versioning::VersionError;

/// Result type for catalog operations
pub type CatalogResult<T> = Result<T, CatalogError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CatalogError {
    #[error("layer {0} not found")]
    LayerNotFound(LayerId),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Version(#[from] VersionError),

    #[error(transparent)]
    Txn(#[from] TxnError),

    /// Snapshot on disk failed its checks
    #[error("corrupted layer snapshot {path}: {reason}")]
    CorruptedSnapshot { path: String, reason: String },

    #[error("i/o error: {0}")]
    Io(String),
}

impl From<LayerError> for CatalogError {
    fn from(err: LayerError) -> Self {
        CatalogError::Version(VersionError::Layer(err))
    }
}

impl CatalogError {
    pub fn code(&self) -> &'static str {
        match self {
            CatalogError::LayerNotFound(_) => "layer.not_found",
            CatalogError::InvalidRequest(_) => "layer.invalid",
            CatalogError::Version(e) => e.code(),
            CatalogError::Txn(e) => e.code(),
            CatalogError::CorruptedSnapshot { .. } => "snapshot.corrupted",
            CatalogError::Io(_) => "storage.io",
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            CatalogError::LayerNotFound(_) => 404,
            CatalogError::InvalidRequest(_) => 422,
            CatalogError::Version(e) => e.status_code(),
            CatalogError::Txn(e) => e.status_code(),
            CatalogError::CorruptedSnapshot { .. } | CatalogError::Io(_) => 500,
        }
    }

    /// Errors that leave the process unable to trust its data.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CatalogError::CorruptedSnapshot { .. })
    }
}
