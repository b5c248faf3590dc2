//! HTTP surface tests, driven in-process with `oneshot`.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::*;
use http_body_util::BodyExt;
use relay_service::services::metrics::init_metrics;
use relay_service::services::upstream::mock::MockUpstream;
use relay_service::startup::router;
use tower::ServiceExt;

#[tokio::test]
async fn health_check_returns_ok() {
    let relay = TestRelay::new(MockUpstream::with_text(&["x"]));
    let app = router(relay.app_state());

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["service"], "relay-service");
    assert_eq!(json["active_connections"], 0);
}

#[tokio::test]
async fn readiness_check_returns_ok() {
    let relay = TestRelay::new(MockUpstream::with_text(&["x"]));
    let app = router(relay.app_state());

    let response = app
        .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn metrics_are_exposed() {
    init_metrics();
    let relay = TestRelay::new(MockUpstream::with_text(&["x"]));
    let mut frames = relay.connect("c1").await;
    relay.coordinator.on_message("c1", VALID_REQUEST).await;
    drain(&mut frames).await;

    let app = router(relay.app_state());
    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("relay_outcomes_total{outcome=\"completed\"}"));
    assert!(text.contains("relay_increments_total"));
}

#[tokio::test]
async fn plain_http_request_to_socket_route_is_rejected() {
    let relay = TestRelay::new(MockUpstream::with_text(&["x"]));
    let app = router(relay.app_state());

    let response = app
        .oneshot(Request::builder().uri("/ws").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert!(response.status().is_client_error());
    assert_eq!(relay.upstream.calls(), 0);
}
