//! Shared test helpers for server integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use trailsync_room::RoomRegistry;
use trailsync_server::routes;
use trailsync_server::state::AppState;
use trailsync_test_support::FixedClock;

/// Build the full app router with a deterministic clock. Uses the same
/// route structure as `main.rs`.
pub fn build_test_app() -> Router {
    let registry = RoomRegistry::new(Arc::new(FixedClock::default()));
    let app_state = AppState::new(registry);

    Router::new()
        .merge(routes::health::router())
        .merge(routes::session::router())
        .with_state(app_state)
}

/// Send a GET request and return the status and parsed JSON body.
pub async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, json)
}
