use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use scaffold_sdk::{load_from_dir, resolve, AppState};
use serde_json::{json, Value};
use std::path::PathBuf;
use tower::ServiceExt;

fn sample_state() -> AppState {
    let dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config");
    let resolved = resolve(&load_from_dir(dir).unwrap()).unwrap();
    let mut state = AppState::in_memory();
    state.mount_config(&resolved).unwrap();
    state
}

async fn post(state: &AppState, uri: &str, user: &str, body: Value) -> (StatusCode, Value) {
    let req = Request::post(uri)
        .header("content-type", "application/json")
        .header("X-User-Id", user)
        .body(Body::from(body.to_string()))
        .unwrap();
    let res = state.router().oneshot(req).await.unwrap();
    let status = res.status();
    let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn sample_config_mounts_both_resources() {
    let state = sample_state();
    assert!(state.resource("/posts").is_some());
    let users = state.resource("/users").unwrap();
    assert!(users.config().requires_auth);
    assert_eq!(users.route_count(), 8);
}

#[tokio::test]
async fn validation_failures_surface_as_500_with_the_message() {
    let state = sample_state();
    let (status, body) = post(
        &state,
        "/users",
        "u1",
        json!({"username": "ann", "email": "not-an-email", "password": "secret1", "confirm_password": "secret1"}),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["statusMessage"], json!("Email is invalid"));
}

#[tokio::test]
async fn excluded_fields_never_leave_the_server() {
    let state = sample_state();
    let (status, body) = post(
        &state,
        "/users",
        "u1",
        json!({"username": "ann", "email": "ann@example.com", "password": "secret1", "confirm_password": "secret1"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["data"]["email"], json!("ann@example.com"));
    assert!(body["data"].get("password").is_none());
}

#[tokio::test]
async fn integer_fields_are_coerced() {
    let state = sample_state();
    let (status, body) = post(&state, "/posts", "u1", json!({"title": "t", "views": "12"})).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    // views is admin-only, so read it back as an admin.
    let id = body["data"]["_id"].as_str().unwrap().to_string();
    let req = Request::get(format!("/posts/{}", id))
        .header("X-User-Id", "root")
        .header("X-User-Role", "admin")
        .body(Body::empty())
        .unwrap();
    let res = state.router().oneshot(req).await.unwrap();
    let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["data"]["views"], json!(12));
    assert_eq!(body["data"]["status"], json!("draft"));
}
