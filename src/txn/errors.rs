//! Transaction errors
//!
//! Whole-request failures of the transaction protocol. Per-operation
//! failures are not errors here: they are reported inside a commit outcome.

use thiserror::Error;

use super::transaction::TxnId;
use crate::actions::ErrorBody;
use crate::versioning::{Epoch, VersionError};

/// Result type for transaction operations
pub type TxnResult<T> = Result<T, TxnError>;

fn show_epoch(epoch: &Option<Epoch>) -> String {
    epoch.map_or_else(|| "none".to_string(), |e| e.to_string())
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TxnError {
    #[error("transaction {0} not found")]
    NotFound(TxnId),

    #[error("slot {0} is already staged with a different operation")]
    SlotConflict(u64),

    #[error("transaction {0} is not committed")]
    NotCommitted(TxnId),

    #[error("transaction {0} is already committed")]
    Committed(TxnId),

    #[error("epoch mismatch: layer is at {}, transaction is bound to {}", show_epoch(.expected), show_epoch(.found))]
    EpochMismatch {
        expected: Option<Epoch>,
        found: Option<Epoch>,
    },

    #[error("invalid transaction request: {0}")]
    Invalid(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl TxnError {
    pub fn code(&self) -> &'static str {
        match self {
            TxnError::NotFound(_) => "txn.not_found",
            TxnError::SlotConflict(_) => "txn.slot_conflict",
            TxnError::NotCommitted(_) => "txn.not_committed",
            TxnError::Committed(_) => "txn.committed",
            TxnError::EpochMismatch { .. } => "epoch_mismatch",
            TxnError::Invalid(_) => "txn.invalid",
            TxnError::Storage(_) => "storage.error",
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            TxnError::NotFound(_) => 404,
            TxnError::SlotConflict(_) => 409,
            TxnError::Storage(_) => 500,
            _ => 422,
        }
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            error: self.code().to_string(),
            message: self.to_string(),
            status_code: self.status_code(),
        }
    }
}

impl From<VersionError> for TxnError {
    fn from(err: VersionError) -> Self {
        match err {
            VersionError::EpochMismatch { expected, found } => TxnError::EpochMismatch { expected, found },
            VersionError::Storage(message) => TxnError::Storage(message),
            other => TxnError::Invalid(other.to_string()),
        }
    }
}
