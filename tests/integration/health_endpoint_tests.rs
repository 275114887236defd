//! Integration tests for the HTTP health endpoint.
//!
//! Validates that `GET /health` returns `200 OK` with body `"ok"`.
//! Uses an ephemeral port to avoid conflicts with running instances.

use std::sync::Arc;

use exec_relay::config::DeltaMode;

use super::test_helpers::{fast_settings, spawn_server, FakePlatform};

#[tokio::test]
async fn health_endpoint_returns_ok() {
    let fake = Arc::new(FakePlatform::new());
    let (base, ct) = spawn_server(&fake, fast_settings(DeltaMode::Message)).await;

    let resp = reqwest::get(format!("{base}/health"))
        .await
        .expect("request");
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.expect("body"), "ok");

    ct.cancel();
}

#[tokio::test]
async fn unknown_route_is_not_found() {
    let fake = Arc::new(FakePlatform::new());
    let (base, ct) = spawn_server(&fake, fast_settings(DeltaMode::Message)).await;

    let resp = reqwest::get(format!("{base}/nope")).await.expect("request");
    assert_eq!(resp.status(), 404);

    ct.cancel();
}
