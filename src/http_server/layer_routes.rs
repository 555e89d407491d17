//! Layer HTTP Routes
//!
//! Layer lifecycle, schema evolution, versioning, feature reads, the
//! change feed, revert and attachment content.

use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use super::errors::{ApiError, ApiResult};
use super::server::AppState;
use crate::catalog::{Layer, LayerId};
use crate::extensions::Aid;
use crate::geometry::GeometryType;
use crate::layer::{Fid, FieldDef, LayerDefinition};
use crate::versioning::{Epoch, Vid};

pub fn layer_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/layer", post(create_layer_handler))
        .route("/layer/:id", get(describe_layer_handler).delete(delete_layer_handler))
        .route(
            "/layer/:id/versioning",
            get(get_versioning_handler).put(put_versioning_handler),
        )
        .route(
            "/layer/:id/fields",
            post(add_fields_handler).delete(delete_fields_handler),
        )
        .route("/layer/:id/geometry_type", put(geometry_type_handler))
        .route(
            "/layer/:id/feature",
            get(list_features_handler).delete(truncate_handler),
        )
        .route("/layer/:id/feature/:fid", get(get_feature_handler))
        .route("/layer/:id/changes", get(changes_handler))
        .route("/layer/:id/revert", post(revert_handler))
        .route("/layer/:id/attachment/:aid", get(attachment_content_handler))
        .with_state(state)
}

// ==================
// Request Types
// ==================

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CreateLayerRequest {
    geometry_type: GeometryType,
    #[serde(default)]
    fields: Vec<FieldDef>,
    #[serde(default)]
    versioning: bool,
}

#[derive(Debug, Deserialize)]
struct VersioningRequest {
    enabled: bool,
}

#[derive(Debug, Deserialize)]
struct GeometryTypeRequest {
    geometry_type: GeometryType,
}

#[derive(Debug, Deserialize)]
struct FeatureListParams {
    version: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ChangesParams {
    epoch: Option<u32>,
    initial: u64,
    target: Option<u64>,
    cursor: Option<u64>,
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RevertRequest {
    target: u64,
}

// ==================
// Helper Functions
// ==================

fn layer(state: &AppState, id: u64) -> ApiResult<Arc<Layer>> {
    Ok(state.catalog.layer(LayerId::new(id))?)
}

fn parse<T: serde::de::DeserializeOwned>(payload: Result<Json<Value>, JsonRejection>) -> ApiResult<T> {
    let Json(value) = payload?;
    Ok(serde_json::from_value(value)?)
}

fn continue_url(id: u64, params: &ChangesParams, target: Option<Vid>, limit: usize, cursor: Fid) -> String {
    let mut query = Vec::new();
    if let Some(epoch) = params.epoch {
        query.push(format!("epoch={}", epoch));
    }
    query.push(format!("initial={}", params.initial));
    if let Some(target) = target {
        query.push(format!("target={}", target));
    }
    query.push(format!("limit={}", limit));
    query.push(format!("cursor={}", cursor));
    format!("/layer/{}/changes?{}", id, query.join("&"))
}

// ==================
// Layer Handlers
// ==================

async fn create_layer_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let request: CreateLayerRequest = parse(payload)?;
    let definition = LayerDefinition::new(request.geometry_type, request.fields)?;
    let layer = state.catalog.create_layer(definition, request.versioning)?;
    Ok((StatusCode::CREATED, Json(json!({ "id": layer.id() }))))
}

async fn describe_layer_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> ApiResult<Json<Value>> {
    Ok(Json(layer(&state, id)?.describe()?))
}

async fn delete_layer_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> ApiResult<Json<Value>> {
    state.catalog.delete_layer(LayerId::new(id))?;
    Ok(Json(json!({})))
}

async fn get_versioning_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> ApiResult<Json<Value>> {
    let status = layer(&state, id)?.versioning()?;
    Ok(Json(serde_json::to_value(status)?))
}

async fn put_versioning_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let request: VersioningRequest = parse(payload)?;
    let status = layer(&state, id)?.set_versioning(request.enabled)?;
    Ok(Json(serde_json::to_value(status)?))
}

// ==================
// Schema Handlers
// ==================

async fn add_fields_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Json<LayerDefinition>> {
    let fields: Vec<FieldDef> = parse(payload)?;
    Ok(Json(layer(&state, id)?.add_fields(fields)?))
}

async fn delete_fields_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Json<LayerDefinition>> {
    let keynames: Vec<String> = parse(payload)?;
    Ok(Json(layer(&state, id)?.delete_fields(&keynames)?))
}

async fn geometry_type_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Json<LayerDefinition>> {
    let request: GeometryTypeRequest = parse(payload)?;
    Ok(Json(layer(&state, id)?.convert_geometry_type(request.geometry_type)?))
}

// ==================
// Feature Handlers
// ==================

async fn list_features_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
    params: Result<Query<FeatureListParams>, QueryRejection>,
) -> ApiResult<Json<Vec<Value>>> {
    let Query(params) = params?;
    Ok(Json(layer(&state, id)?.features(params.version.map(Vid::new))?))
}

async fn truncate_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> ApiResult<Json<Value>> {
    let status = layer(&state, id)?.truncate()?;
    Ok(Json(serde_json::to_value(status)?))
}

async fn get_feature_handler(
    State(state): State<Arc<AppState>>,
    Path((id, fid)): Path<(u64, u64)>,
) -> ApiResult<Json<Value>> {
    Ok(Json(layer(&state, id)?.feature(Fid::new(fid))?))
}

/// Entries of one page; a non-final page ends with a `continue` entry.
async fn changes_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
    params: Result<Query<ChangesParams>, QueryRejection>,
) -> ApiResult<Json<Vec<Value>>> {
    let Query(params) = params?;
    let layer = layer(&state, id)?;
    let limit = params.limit.unwrap_or(state.page_size);
    if limit == 0 {
        return Err(ApiError::invalid("limit must be > 0"));
    }
    // Later pages keep the target the first page resolved.
    let target = match params.target {
        Some(target) => Some(Vid::new(target)),
        None => layer.versioning()?.latest,
    };
    let page = layer.changes(
        params.epoch.map(Epoch::new),
        Vid::new(params.initial),
        target,
        params.cursor.map(Fid::new),
        limit,
    )?;

    let mut entries = page.entries;
    if let Some(next) = page.next {
        entries.push(json!({
            "action": "continue",
            "url": continue_url(id, &params, target, limit, next),
        }));
    }
    Ok(Json(entries))
}

async fn revert_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let request: RevertRequest = parse(payload)?;
    let (changed, version) = layer(&state, id)?.revert_to(Vid::new(request.target))?;
    Ok(Json(json!({ "changed": changed, "version": version })))
}

async fn attachment_content_handler(
    State(state): State<Arc<AppState>>,
    Path((id, aid)): Path<(u64, u64)>,
) -> ApiResult<impl IntoResponse> {
    let (mime_type, data) = layer(&state, id)?.attachment_content(Aid::new(aid))?;
    Ok(([(header::CONTENT_TYPE, mime_type)], data))
}
