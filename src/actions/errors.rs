//! Action errors
//!
//! Per-operation failures reported in a commit's error list. Codes are
//! namespaced by the domain of the action that failed.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::versioning::VersionError;

/// Entity namespace an action belongs to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Domain {
    Feature,
    Description,
    Attachment,
    Revert,
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Feature => "feature",
            Domain::Description => "description",
            Domain::Attachment => "attachment",
            Domain::Revert => "revert",
        }
    }

    /// `[not_found, conflict, versioning_required, invalid]` codes.
    fn codes(&self) -> [&'static str; 4] {
        match self {
            Domain::Feature => [
                "feature.not_found",
                "feature.conflict",
                "feature.versioning_required",
                "feature.invalid",
            ],
            Domain::Description => [
                "description.not_found",
                "description.conflict",
                "description.versioning_required",
                "description.invalid",
            ],
            Domain::Attachment => [
                "attachment.not_found",
                "attachment.conflict",
                "attachment.versioning_required",
                "attachment.invalid",
            ],
            Domain::Revert => [
                "revert.not_found",
                "revert.conflict",
                "revert.versioning_required",
                "revert.invalid",
            ],
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result type for action operations
pub type ActionResult<T> = Result<T, ActionError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ActionError {
    #[error("unknown action: {0}")]
    UnknownAction(String),

    #[error("invalid operation payload: {0}")]
    InvalidPayload(String),

    #[error("{message}")]
    NotFound { domain: Domain, message: String },

    #[error("{message}")]
    Conflict { domain: Domain, message: String },

    #[error("{message}")]
    VersioningRequired { domain: Domain, message: String },

    #[error("{message}")]
    Invalid { domain: Domain, message: String },

    #[error("storage error: {0}")]
    Storage(String),
}

impl ActionError {
    pub fn not_found(domain: Domain, message: impl Into<String>) -> Self {
        ActionError::NotFound {
            domain,
            message: message.into(),
        }
    }

    pub fn conflict(domain: Domain, message: impl Into<String>) -> Self {
        ActionError::Conflict {
            domain,
            message: message.into(),
        }
    }

    pub fn versioning_required(domain: Domain, message: impl Into<String>) -> Self {
        ActionError::VersioningRequired {
            domain,
            message: message.into(),
        }
    }

    pub fn invalid(domain: Domain, message: impl Into<String>) -> Self {
        ActionError::Invalid {
            domain,
            message: message.into(),
        }
    }

    /// Maps a storage-level error into the action's domain.
    pub fn from_version(domain: Domain, err: VersionError) -> Self {
        let message = err.to_string();
        match err {
            VersionError::NotFound(_) => Self::not_found(domain, message),
            VersionError::Conflict { .. } | VersionError::KeyExists(_) => {
                Self::conflict(domain, message)
            }
            VersionError::VersioningDisabled => Self::versioning_required(domain, message),
            VersionError::Storage(_) => ActionError::Storage(message),
            VersionError::NotDeleted(_)
            | VersionError::VersioningEnabled
            | VersionError::EpochMismatch { .. }
            | VersionError::InvalidRange(_)
            | VersionError::Layer(_) => Self::invalid(domain, message),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ActionError::UnknownAction(_) => "action.unknown",
            ActionError::InvalidPayload(_) => "action.invalid",
            ActionError::NotFound { domain, .. } => domain.codes()[0],
            ActionError::Conflict { domain, .. } => domain.codes()[1],
            ActionError::VersioningRequired { domain, .. } => domain.codes()[2],
            ActionError::Invalid { domain, .. } => domain.codes()[3],
            ActionError::Storage(_) => "storage.error",
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            ActionError::NotFound { .. } => 404,
            ActionError::Conflict { .. } => 409,
            ActionError::Storage(_) => 500,
            _ => 422,
        }
    }

    #[inline]
    pub fn is_fatal(&self) -> bool {
        matches!(self, ActionError::Storage(_))
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            error: self.code().to_string(),
            message: self.to_string(),
            status_code: self.status_code(),
        }
    }
}

/// Wire form of an error: `{"error", "message", "status_code"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
    pub status_code: u16,
}
