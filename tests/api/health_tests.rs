//! Health Check and Metrics API Tests

use axum::body::to_bytes;
use axum::http::StatusCode;
use pretty_assertions::assert_eq;

use crate::common::TestApp;

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

/// Test basic health check endpoint returns 200 OK
#[tokio::test]
async fn test_health_check_returns_ok() {
    let app = TestApp::spawn().await;

    let response = app.get("/health").await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["status"], "healthy");
}

/// Test liveness probe endpoint
#[tokio::test]
async fn test_liveness_probe() {
    let app = TestApp::spawn().await;

    let response = app.get("/health/live").await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["status"], "alive");
}

/// Readiness reports the store and the hub, including live membership
#[tokio::test]
async fn test_readiness_reports_hub_membership() {
    let app = TestApp::spawn().await;
    let _ws = app.connect(11, "alice").await;
    app.wait_for_members(11, 1).await;

    let response = app.get("/health/ready").await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["checks"]["store"]["status"], "healthy");
    assert_eq!(json["checks"]["hub"]["status"], "healthy");
    assert_eq!(json["checks"]["hub"]["active_connections"], 1);
    assert_eq!(json["checks"]["hub"]["active_rooms"], 1);
}

/// A stopped hub makes the instance unready
#[tokio::test]
async fn test_readiness_unavailable_after_hub_shutdown() {
    let app = TestApp::spawn().await;
    app.hub.shutdown();

    let response = app.get("/health/ready").await;

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json_body(response).await["status"], "unhealthy");
}

#[tokio::test]
async fn test_metrics_endpoint_exposes_hub_metrics() {
    let app = TestApp::spawn().await;
    let _ws = app.connect(12, "alice").await;
    app.wait_for_members(12, 1).await;

    let response = app.get("/metrics").await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("chat_hub_websocket_connections_active"));
    assert!(text.contains("chat_hub_rooms_active"));
}
