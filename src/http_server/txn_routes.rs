//! Transaction HTTP Routes
//!
//! ```text
//! POST   /layer/:id/txn          {epoch?}                -> {id}
//! PUT    /layer/:id/txn/:txn     [[seqnum, op|null]...]  -> {}
//! POST   /layer/:id/txn/:txn                             -> commit outcome
//! GET    /layer/:id/txn/:txn                             -> [[seqnum, result]...]
//! DELETE /layer/:id/txn/:txn                             -> {}
//! ```

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use super::errors::{ApiError, ApiResult};
use super::server::AppState;
use crate::catalog::{Layer, LayerId};
use crate::txn::{CommitOutcome, TxnId};
use crate::versioning::Epoch;

pub fn txn_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/layer/:id/txn", post(open_handler))
        .route(
            "/layer/:id/txn/:txn",
            post(commit_handler)
                .put(put_handler)
                .get(results_handler)
                .delete(dispose_handler),
        )
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct OpenRequest {
    #[serde(default)]
    epoch: Option<u32>,
}

fn layer(state: &AppState, id: u64) -> ApiResult<Arc<Layer>> {
    Ok(state.catalog.layer(LayerId::new(id))?)
}

/// An empty body opens an unbound transaction.
fn open_request(body: &[u8]) -> ApiResult<OpenRequest> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(OpenRequest::default());
    }
    Ok(serde_json::from_slice(body)?)
}

async fn open_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let request = open_request(&body)?;
    let txn = layer(&state, id)?.txn_open(request.epoch.map(Epoch::new))?;
    Ok((StatusCode::CREATED, Json(json!({ "id": txn }))))
}

async fn put_handler(
    State(state): State<Arc<AppState>>,
    Path((id, txn)): Path<(u64, u64)>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(value) = payload?;
    let items: Vec<(u64, Option<Value>)> = serde_json::from_value(value)
        .map_err(|e| ApiError::invalid(format!("expected [[seqnum, operation|null], ...]: {}", e)))?;
    layer(&state, id)?.txn_put(TxnId::new(txn), items)?;
    Ok(Json(json!({})))
}

async fn commit_handler(
    State(state): State<Arc<AppState>>,
    Path((id, txn)): Path<(u64, u64)>,
) -> ApiResult<Json<CommitOutcome>> {
    Ok(Json(layer(&state, id)?.txn_commit(TxnId::new(txn))?))
}

async fn results_handler(
    State(state): State<Arc<AppState>>,
    Path((id, txn)): Path<(u64, u64)>,
) -> ApiResult<Json<Vec<(u64, Value)>>> {
    Ok(Json(layer(&state, id)?.txn_results(TxnId::new(txn))?))
}

async fn dispose_handler(
    State(state): State<Arc<AppState>>,
    Path((id, txn)): Path<(u64, u64)>,
) -> ApiResult<Json<Value>> {
    layer(&state, id)?.txn_dispose(TxnId::new(txn))?;
    Ok(Json(json!({})))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_request_body() {
        assert_eq!(open_request(b"").unwrap().epoch, None);
        assert_eq!(open_request(b" \n").unwrap().epoch, None);
        assert_eq!(open_request(br#"{"epoch": 12}"#).unwrap().epoch, Some(12));
        assert!(open_request(br#"{"epoc": 12}"#).is_err());
    }
}
