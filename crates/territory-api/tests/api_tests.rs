//! Integration tests for the history API endpoints.
//!
//! Tests use Axum's `Router` directly via `tower::ServiceExt` without
//! starting a TCP server, over the in-memory store.

#![allow(clippy::unwrap_used, clippy::indexing_slicing, clippy::too_many_lines)]

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use territory_api::router::build_router;
use territory_api::state::AppState;
use territory_history::MemoryStore;
use tower::ServiceExt;
use uuid::Uuid;

fn app() -> Router {
    build_router(Arc::new(AppState::new(MemoryStore::new())))
}

async fn body_to_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    (status, body_to_json(response.into_body()).await)
}

async fn create_area(router: &Router) -> String {
    let (status, json) = send(
        router,
        "POST",
        "/api/areas",
        Some(json!({ "name": "Berlin", "granularity": "5digit" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    json["data"]["id"].as_str().unwrap().to_owned()
}

fn layer_json(area_id: &str, layer_id: &str, codes: &[&str]) -> Value {
    json!({
        "change_type": "create_layer",
        "layer": {
            "id": layer_id,
            "area_id": area_id,
            "name": "North",
            "color": "#ff0000",
            "opacity": 70,
            "is_visible": true,
            "order_index": 0,
            "postal_codes": codes,
        },
        "created_by": "alice",
    })
}

async fn create_layer(router: &Router, area_id: &str, codes: &[&str]) -> String {
    let layer_id = Uuid::now_v7().to_string();
    let (status, _) = send(
        router,
        "POST",
        &format!("/api/areas/{area_id}/changes/apply"),
        Some(layer_json(area_id, &layer_id, codes)),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    layer_id
}

// =========================================================================
// Tests
// =========================================================================

#[tokio::test]
async fn test_health() {
    let (status, json) = send(&app(), "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(json["data"]["status"], "ok");
}

#[tokio::test]
async fn test_create_and_get_area() {
    let router = app();
    let area_id = create_area(&router).await;

    let (status, json) = send(&router, "GET", &format!("/api/areas/{area_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["area"]["name"], "Berlin");
    assert_eq!(json["data"]["layers"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_unknown_area_is_not_found_envelope() {
    let router = app();
    let uri = format!("/api/areas/{}", Uuid::now_v7());
    let (status, json) = send(&router, "GET", &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["success"], false);
    assert_eq!(json["error"]["kind"], "not_found");
}

#[tokio::test]
async fn test_malformed_area_id_is_bad_request() {
    let (status, json) = send(&app(), "GET", "/api/areas/not-a-uuid", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["kind"], "invalid_request");
}

#[tokio::test]
async fn test_blank_area_name_fails_validation() {
    let (status, json) = send(
        &app(),
        "POST",
        "/api/areas",
        Some(json!({ "name": "", "granularity": "5digit" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["kind"], "invalid_request");
}

#[tokio::test]
async fn test_apply_undo_redo_flow() {
    let router = app();
    let area_id = create_area(&router).await;
    let layer_id = create_layer(&router, &area_id, &["10115"]).await;

    let (status, json) = send(
        &router,
        "POST",
        &format!("/api/areas/{area_id}/changes/apply"),
        Some(json!({
            "change_type": "add_postal_codes",
            "layer_id": layer_id,
            "codes": ["10117", "10119"],
            "previous": ["10115"],
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["data"]["sequence_number"], 2);

    let (status, json) = send(&router, "POST", &format!("/api/areas/{area_id}/undo"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["payload"]["change_type"], "add_postal_codes");

    let (_, json) = send(&router, "GET", &format!("/api/areas/{area_id}"), None).await;
    assert_eq!(json["data"]["layers"][0]["postal_codes"], json!(["10115"]));

    let (status, json) = send(
        &router,
        "GET",
        &format!("/api/areas/{area_id}/undo-redo"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["can_redo"], true);
    assert_eq!(json["data"]["undo_count"], 1);

    let (status, _) = send(&router, "POST", &format!("/api/areas/{area_id}/redo"), None).await;
    assert_eq!(status, StatusCode::OK);

    let (_, json) = send(&router, "GET", &format!("/api/areas/{area_id}"), None).await;
    assert_eq!(
        json["data"]["layers"][0]["postal_codes"],
        json!(["10115", "10117", "10119"])
    );

    let (status, json) = send(
        &router,
        "GET",
        &format!("/api/areas/{area_id}/undo-redo/verify"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["undo_count"], 2);
}

#[tokio::test]
async fn test_empty_undo_is_conflict() {
    let router = app();
    let area_id = create_area(&router).await;
    let (status, json) = send(&router, "POST", &format!("/api/areas/{area_id}/undo"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error"]["kind"], "empty_stack");
}

#[tokio::test]
async fn test_invalid_opacity_is_rejected() {
    let router = app();
    let area_id = create_area(&router).await;
    let mut body = layer_json(&area_id, &Uuid::now_v7().to_string(), &[]);
    body["layer"]["opacity"] = json!(150);

    let (status, json) = send(
        &router,
        "POST",
        &format!("/api/areas/{area_id}/changes"),
        Some(body),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["kind"], "invalid_operation");
}

#[tokio::test]
async fn test_unknown_change_type_is_bad_request() {
    let router = app();
    let area_id = create_area(&router).await;
    let (status, json) = send(
        &router,
        "POST",
        &format!("/api/areas/{area_id}/changes"),
        Some(json!({ "change_type": "merge_layers" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["kind"], "invalid_request");
}

#[tokio::test]
async fn test_history_filters_and_limits() {
    let router = app();
    let area_id = create_area(&router).await;
    create_layer(&router, &area_id, &[]).await;
    create_layer(&router, &area_id, &[]).await;
    create_layer(&router, &area_id, &[]).await;
    send(&router, "POST", &format!("/api/areas/{area_id}/undo"), None).await;

    let (status, json) = send(
        &router,
        "GET",
        &format!("/api/areas/{area_id}/history"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let seqs: Vec<i64> = json["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["sequence_number"].as_i64().unwrap())
        .collect();
    assert_eq!(seqs, vec![3, 2, 1]);

    let (_, json) = send(
        &router,
        "GET",
        &format!("/api/areas/{area_id}/history?include_undone=false&limit=1"),
        None,
    )
    .await;
    let records = json["data"].as_array().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["sequence_number"], 2);

    let (status, _) = send(
        &router,
        "GET",
        &format!("/api/areas/{area_id}/history?limit=0"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_version_lifecycle() {
    let router = app();
    let area_id = create_area(&router).await;
    create_layer(&router, &area_id, &["10115"]).await;

    let versions_uri = format!("/api/areas/{area_id}/versions");
    let (status, json) = send(&router, "POST", &versions_uri, Some(json!({}))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["data"]["version_number"], 1);
    assert_eq!(json["data"]["name"], "Version 1");

    create_layer(&router, &area_id, &["10117"]).await;
    let (status, json) = send(
        &router,
        "POST",
        &versions_uri,
        Some(json!({ "name": "Two layers", "created_by": "alice" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["data"]["version_number"], 2);

    let (_, json) = send(&router, "GET", &versions_uri, None).await;
    let numbers: Vec<i64> = json["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v["version_number"].as_i64().unwrap())
        .collect();
    assert_eq!(numbers, vec![2, 1]);

    let (status, json) = send(
        &router,
        "GET",
        &format!("/api/areas/{area_id}/versions/compare?a=1&b=2"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["codes_added"], json!(["10117"]));

    let (status, json) = send(
        &router,
        "DELETE",
        &format!("/api/areas/{area_id}/versions/2"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error"]["kind"], "invalid_operation");

    let (status, json) = send(
        &router,
        "POST",
        &format!("/api/areas/{area_id}/versions/1/restore"),
        Some(json!({ "create_branch": true, "branch_name": "retry" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["restored_version_number"], 1);
    assert_eq!(json["data"]["new_version_number"], 3);

    let (status, json) = send(
        &router,
        "GET",
        &format!("/api/areas/{area_id}/versions/3"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["branch_name"], "retry");
    assert_eq!(json["data"]["parent_version_number"], 1);
    assert_eq!(json["data"]["is_active"], true);

    let (status, _) = send(
        &router,
        "DELETE",
        &format!("/api/areas/{area_id}/versions/2"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, json) = send(
        &router,
        "GET",
        &format!("/api/areas/{area_id}/versions/2"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"]["kind"], "not_found");
}

#[tokio::test]
async fn test_delete_area() {
    let router = app();
    let area_id = create_area(&router).await;
    let uri = format!("/api/areas/{area_id}");

    let (status, _) = send(&router, "DELETE", &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&router, "GET", &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_restore_without_body() {
    let router = app();
    let area_id = create_area(&router).await;
    let versions_uri = format!("/api/areas/{area_id}/versions");
    send(&router, "POST", &versions_uri, Some(json!({}))).await;
    send(&router, "POST", &versions_uri, Some(json!({}))).await;

    let (status, json) = send(
        &router,
        "POST",
        &format!("/api/areas/{area_id}/versions/1/restore"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["restored_version_number"], 1);
    assert!(json["data"]["new_version_number"].is_null());

    let (_, json) = send(&router, "GET", &format!("/api/areas/{area_id}/versions/1"), None).await;
    assert_eq!(json["data"]["is_active"], true);
}
