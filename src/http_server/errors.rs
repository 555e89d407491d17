//! HTTP error responses
//!
//! Every failure leaves the server as `{"error", "message", "status_code"}`
//! with the matching HTTP status.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use crate::actions::ErrorBody;
use crate::catalog::CatalogError;
use crate::layer::LayerError;
use crate::observability::Logger;
use crate::txn::TxnError;
use crate::versioning::VersionError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// Body or query string could not be decoded
    #[error("{message}")]
    BadRequest { status: u16, message: String },
}

impl ApiError {
    pub fn invalid(message: impl Into<String>) -> Self {
        ApiError::BadRequest {
            status: 422,
            message: message.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Catalog(e) => e.code(),
            ApiError::BadRequest { .. } => "request.invalid",
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::Catalog(e) => e.status_code(),
            ApiError::BadRequest { status, .. } => *status,
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

impl From<VersionError> for ApiError {
    fn from(err: VersionError) -> Self {
        ApiError::Catalog(err.into())
    }
}

impl From<LayerError> for ApiError {
    fn from(err: LayerError) -> Self {
        ApiError::Catalog(err.into())
    }
}

impl From<TxnError> for ApiError {
    fn from(err: TxnError) -> Self {
        ApiError::Catalog(err.into())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::invalid(err.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest {
            status: rejection.status().as_u16(),
            message: rejection.body_text(),
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest {
            status: rejection.status().as_u16(),
            message: rejection.body_text(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = self.body();
        if let ApiError::Catalog(e) = &self {
            if e.status_code() >= 500 {
                Logger::error(
                    "HTTP_REQUEST_FAILED",
                    &[("code", &body.error), ("message", &body.message)],
                );
            }
        }
        let status = StatusCode::from_u16(body.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::LayerId;

    #[test]
    fn test_catalog_errors_keep_their_codes() {
        let err: ApiError = CatalogError::LayerNotFound(LayerId::new(9)).into();
        let body = err.body();
        assert_eq!(body.error, "layer.not_found");
        assert_eq!(body.status_code, 404);
        assert_eq!(body.message, "layer 9 not found");
    }

    #[test]
    fn test_json_errors_are_validation_errors() {
        let err: ApiError = serde_json::from_str::<u64>("\"x\"").unwrap_err().into();
        assert_eq!(err.code(), "request.invalid");
        assert_eq!(err.status_code(), 422);
    }

    #[test]
    fn test_response_status() {
        let response = ApiError::from(TxnError::NotCommitted(crate::txn::TxnId::new(1))).into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
