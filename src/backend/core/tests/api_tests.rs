//! HTTP trigger tests driving the router in-process.

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

use ourarchive_stats::api::{build_router, AppState};
use ourarchive_stats::prelude::*;
use ourarchive_stats::stats::snapshot_path;

fn router_with(store: InMemoryStore) -> Router {
    build_router(AppState::new(Aggregator::new(Arc::new(store))))
}

fn seeded_store() -> InMemoryStore {
    let store = InMemoryStore::new();
    store.insert(CollectionPath::root("users").doc("u1"), Fields::new());
    let household = CollectionPath::root("households").doc("h1");
    store.insert(household.clone(), Fields::new());
    store.insert(
        household.collection("items").doc("i1"),
        Fields::from([("type".to_string(), FieldValue::from("box"))]),
    );
    store
}

async fn send(app: Router, method: Method, uri: &str) -> (StatusCode, axum::http::HeaderMap, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::ORIGIN, "https://ourarchive.app")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, headers, body)
}

#[tokio::test]
async fn test_aggregate_stats_success() {
    let store = seeded_store();
    let (status, _, body) = send(router_with(store.clone()), Method::POST, "/aggregate-stats").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["stats"]["userCount"], 1);
    assert_eq!(body["stats"]["householdCount"], 1);
    assert_eq!(body["stats"]["itemCount"], 1);
    assert_eq!(body["stats"]["containerCount"], 0);
    assert_eq!(body["stats"]["itemTypes"]["box"], 1);
    assert!(body["stats"]["lastUpdated"].is_string());

    assert!(store.get(&snapshot_path()).await.unwrap().is_some());
}

#[tokio::test]
async fn test_aggregate_stats_accepts_get() {
    let (status, _, body) = send(router_with(seeded_store()), Method::GET, "/aggregate-stats").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
}

#[tokio::test]
async fn test_aggregate_stats_accepts_any_method() {
    for method in [Method::PUT, Method::PATCH, Method::DELETE] {
        let (status, _, body) = send(router_with(seeded_store()), method, "/aggregate-stats").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
    }
}

#[tokio::test]
async fn test_aggregate_stats_failure() {
    let store = InMemoryStore::without_count_support();
    let (status, _, body) = send(router_with(store.clone()), Method::POST, "/aggregate-stats").await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["success"], false);
    let message = body["error"].as_str().unwrap();
    assert!(message.contains("count"));
    assert_eq!(store.write_count(), 0);
}

#[tokio::test]
async fn test_cors_allows_any_origin() {
    let (_, headers, _) = send(router_with(seeded_store()), Method::POST, "/aggregate-stats").await;
    assert_eq!(
        headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
        "*"
    );

    let preflight = Request::builder()
        .method(Method::OPTIONS)
        .uri("/aggregate-stats")
        .header(header::ORIGIN, "https://ourarchive.app")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .body(Body::empty())
        .unwrap();
    let response = router_with(seeded_store()).oneshot(preflight).await.unwrap();
    assert!(response.status().is_success());
    assert!(response.headers().contains_key(header::ACCESS_CONTROL_ALLOW_METHODS));
}

#[tokio::test]
async fn test_health() {
    let (status, _, body) = send(router_with(InMemoryStore::new()), Method::GET, "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["store"], "memory");
}
