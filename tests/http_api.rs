//! HTTP API Tests
//!
//! Drives the router in-process with `tower::ServiceExt::oneshot`.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use strata::catalog::Catalog;
use strata::http_server::{HttpServer, HttpServerConfig};
use tower::ServiceExt;

fn router_with_page_size(page_size: usize) -> Router {
    HttpServer::with_catalog(HttpServerConfig::default(), Arc::new(Catalog::in_memory()), page_size).router()
}

fn router() -> Router {
    router_with_page_size(1000)
}

async fn call(router: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(value) => {
            request = request.header("content-type", "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };
    let response = router.clone().oneshot(request.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

/// Creates a versioned point layer with a `name` field; returns its id and epoch.
async fn create_layer(router: &Router) -> (u64, Value) {
    let (status, body) = call(
        router,
        Method::POST,
        "/layer",
        Some(json!({
            "geometry_type": "POINT",
            "fields": [{"keyname": "name", "datatype": "STRING"}],
            "versioning": true,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = body["id"].as_u64().unwrap();
    let (_, versioning) = call(router, Method::GET, &format!("/layer/{}/versioning", id), None).await;
    (id, versioning["epoch"].clone())
}

async fn commit(router: &Router, layer: u64, epoch: &Value, ops: Vec<Value>) -> (u64, Value) {
    let (status, body) = call(
        router,
        Method::POST,
        &format!("/layer/{}/txn", layer),
        Some(json!({"epoch": epoch})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let txn = body["id"].as_u64().unwrap();
    let items: Vec<Value> = ops
        .into_iter()
        .enumerate()
        .map(|(i, op)| json!([i + 1, op]))
        .collect();
    let uri = format!("/layer/{}/txn/{}", layer, txn);
    let (status, _) = call(router, Method::PUT, &uri, Some(Value::Array(items))).await;
    assert_eq!(status, StatusCode::OK);
    let (status, outcome) = call(router, Method::POST, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    (txn, outcome)
}

// =============================================================================
// Health and Layers
// =============================================================================

#[tokio::test]
async fn test_health_and_metrics() {
    let router = router();
    let (status, body) = call(&router, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    create_layer(&router).await;
    let (status, metrics) = call(&router, Method::GET, "/metrics", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(metrics["layers_created"], 1);
}

#[tokio::test]
async fn test_layer_lifecycle() {
    let router = router();
    let (id, epoch) = create_layer(&router).await;
    assert!(epoch.is_u64());

    let (status, layer) = call(&router, Method::GET, &format!("/layer/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(layer["geometry_type"], "POINT");
    assert_eq!(layer["fields"][0]["keyname"], "name");
    assert_eq!(layer["versioning"]["latest"], 1);

    let (status, _) = call(&router, Method::DELETE, &format!("/layer/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = call(&router, Method::GET, &format!("/layer/{}", id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({"error": "layer.not_found", "message": format!("layer {} not found", id), "status_code": 404}));
}

#[tokio::test]
async fn test_invalid_layer_requests() {
    let router = router();
    let (status, body) = call(
        &router,
        Method::POST,
        "/layer",
        Some(json!({"geometry_type": "POINT", "fields": [{"keyname": "1bad", "datatype": "STRING"}]})),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "layer.invalid");

    let (status, body) = call(&router, Method::POST, "/layer", Some(json!({"geometry_type": "CIRCLE"}))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "request.invalid");
}

#[tokio::test]
async fn test_schema_and_versioning_endpoints() {
    let router = router();
    let (id, _) = create_layer(&router).await;

    let (status, definition) = call(
        &router,
        Method::POST,
        &format!("/layer/{}/fields", id),
        Some(json!([{"keyname": "height", "datatype": "REAL"}])),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(definition["fields"].as_array().unwrap().len(), 2);

    let (_, definition) = call(
        &router,
        Method::DELETE,
        &format!("/layer/{}/fields", id),
        Some(json!(["name"])),
    )
    .await;
    assert_eq!(definition["fields"], json!([{"keyname": "height", "datatype": "REAL"}]));

    let (status, definition) = call(
        &router,
        Method::PUT,
        &format!("/layer/{}/geometry_type", id),
        Some(json!({"geometry_type": "MULTIPOINT"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(definition["geometry_type"], "MULTIPOINT");

    let uri = format!("/layer/{}/versioning", id);
    let (_, off) = call(&router, Method::PUT, &uri, Some(json!({"enabled": false}))).await;
    assert_eq!(off, json!({"enabled": false, "epoch": null, "latest": null}));
    let (_, on) = call(&router, Method::PUT, &uri, Some(json!({"enabled": true}))).await;
    assert_eq!(on["enabled"], true);
    assert_eq!(on["latest"], 1);
}

// =============================================================================
// Transactions
// =============================================================================

#[tokio::test]
async fn test_transaction_round_trip() {
    let router = router();
    let (id, epoch) = create_layer(&router).await;
    let (txn, outcome) = commit(
        &router,
        id,
        &epoch,
        vec![
            json!({"action": "feature.create", "geom": "POINT (1 2)", "fields": {"name": "a"}}),
            json!({"action": "description.put", "fid": {"sn": 1}, "value": "hello"}),
        ],
    )
    .await;
    assert_eq!(outcome, json!({"status": "committed", "version": 2}));

    let uri = format!("/layer/{}/txn/{}", id, txn);
    let (status, again) = call(&router, Method::POST, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again, outcome);

    let (status, results) = call(&router, Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(results, json!([[1, {"fid": 1}], [2, {"fid": 1}]]));

    let (_, feature) = call(&router, Method::GET, &format!("/layer/{}/feature/1", id), None).await;
    assert_eq!(feature["geom"], "POINT (1 2)");
    assert_eq!(feature["description"], "hello");
    assert_eq!(feature["vid"], 2);

    let (status, _) = call(&router, Method::DELETE, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = call(&router, Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "txn.not_found");
}

#[tokio::test]
async fn test_slot_conflict_and_errors_outcome() {
    let router = router();
    let (id, epoch) = create_layer(&router).await;
    commit(
        &router,
        id,
        &epoch,
        vec![json!({"action": "feature.create", "fields": {"name": "a"}})],
    )
    .await;

    let (_, body) = call(&router, Method::POST, &format!("/layer/{}/txn", id), Some(json!({"epoch": epoch}))).await;
    let uri = format!("/layer/{}/txn/{}", id, body["id"]);
    let stale = json!({"action": "feature.update", "fid": 1, "vid": 0, "fields": {"name": "b"}});
    let (status, _) = call(&router, Method::PUT, &uri, Some(json!([[1, stale.clone()]]))).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = call(&router, Method::PUT, &uri, Some(json!([[1, stale]]))).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = call(&router, Method::PUT, &uri, Some(json!([[1, {"action": "feature.delete", "fid": 1}]]))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["status_code"], 409);

    let (_, results) = call(&router, Method::GET, &uri, None).await;
    assert_eq!(results["error"], "txn.not_committed");

    let (status, outcome) = call(&router, Method::POST, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["status"], "errors");
    assert_eq!(outcome["errors"][0][0], 1);
    assert_eq!(outcome["errors"][0][1]["error"], "feature.conflict");
    assert_eq!(outcome["errors"][0][1]["status_code"], 409);
}

#[tokio::test]
async fn test_open_without_epoch_on_versioned_layer() {
    let router = router();
    let (id, _) = create_layer(&router).await;
    let (status, body) = call(&router, Method::POST, &format!("/layer/{}/txn", id), None).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "epoch_mismatch");
}

// =============================================================================
// Reads, Change Feed and Revert
// =============================================================================

#[tokio::test]
async fn test_feature_list_at_version() {
    let router = router();
    let (id, epoch) = create_layer(&router).await;
    commit(&router, id, &epoch, vec![json!({"action": "feature.create", "fields": {"name": "a"}})]).await;
    commit(
        &router,
        id,
        &epoch,
        vec![json!({"action": "feature.update", "fid": 1, "vid": 2, "fields": {"name": "b"}})],
    )
    .await;

    let (_, current) = call(&router, Method::GET, &format!("/layer/{}/feature", id), None).await;
    assert_eq!(current[0]["fields"]["name"], "b");
    let (_, old) = call(&router, Method::GET, &format!("/layer/{}/feature?version=2", id), None).await;
    assert_eq!(old, json!([{"fid": 1, "vid": 2, "geom": null, "fields": {"name": "a"}}]));

    let (status, body) = call(&router, Method::GET, &format!("/layer/{}/feature/9", id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn test_change_feed_pages() {
    let router = router_with_page_size(2);
    let (id, epoch) = create_layer(&router).await;
    commit(
        &router,
        id,
        &epoch,
        (0..3)
            .map(|i| json!({"action": "feature.create", "fields": {"name": format!("f{}", i)}}))
            .collect(),
    )
    .await;

    let first = format!("/layer/{}/changes?epoch={}&initial=1", id, epoch);
    let (status, page) = call(&router, Method::GET, &first, None).await;
    assert_eq!(status, StatusCode::OK);
    let entries = page.as_array().unwrap();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[2]["action"], "continue");
    let next = entries[2]["url"].as_str().unwrap().to_string();
    assert!(next.ends_with("&cursor=2"));
    assert!(next.contains("target=2"));

    let (_, page) = call(&router, Method::GET, &next, None).await;
    assert_eq!(page, json!([{"action": "feature.create", "fid": 3, "vid": 2, "geom": null, "fields": {"name": "f2"}}]));

    let empty = format!("/layer/{}/changes?epoch={}&initial=2&target=2", id, epoch);
    let (_, page) = call(&router, Method::GET, &empty, None).await;
    assert_eq!(page, json!([]));

    let stale = format!("/layer/{}/changes?initial=1", id);
    let (status, body) = call(&router, Method::GET, &stale, None).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "epoch_mismatch");

    let (status, body) = call(&router, Method::GET, &format!("/layer/{}/changes", id), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "request.invalid");
}

#[tokio::test]
async fn test_revert_endpoint() {
    let router = router();
    let (id, epoch) = create_layer(&router).await;
    commit(&router, id, &epoch, vec![json!({"action": "feature.create", "fields": {"name": "a"}})]).await;

    let (status, body) = call(&router, Method::POST, &format!("/layer/{}/revert", id), Some(json!({"target": 1}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"changed": 1, "version": 3}));
    let (_, features) = call(&router, Method::GET, &format!("/layer/{}/feature", id), None).await;
    assert_eq!(features, json!([]));
}

#[tokio::test]
async fn test_attachment_content() {
    let router = router();
    let (id, epoch) = create_layer(&router).await;
    commit(
        &router,
        id,
        &epoch,
        vec![
            json!({"action": "feature.create", "fields": {}}),
            json!({
                "action": "attachment.create",
                "fid": {"sn": 1},
                "source": {"name": "hello.txt", "mime_type": "text/plain", "data": "aGVsbG8="},
            }),
        ],
    )
    .await;

    let request = Request::builder()
        .uri(format!("/layer/{}/attachment/1", id))
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "text/plain");
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"hello");
}
