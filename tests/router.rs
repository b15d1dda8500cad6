mod common;

use std::sync::Arc;

use axum::{
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use cascader::HttpHandler;
use tower::ServiceExt;

use common::{engine_for, local_config, start_echo_upstream};

#[tokio::test(flavor = "multi_thread")]
async fn test_router_forwards_through_pooled_client() {
    let upstream = start_echo_upstream().await;
    let engine = engine_for(local_config(upstream.port()));
    let app = Arc::new(HttpHandler::new(engine, 1024)).router();

    let request = Request::builder()
        .method("PUT")
        .uri("/docs/7?rev=3")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::ACCEPT, "text/plain")
        .body(Body::from("{\"title\":\"draft\"}"))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/plain");

    let body = to_bytes(response.into_body(), 1024).await.unwrap();
    assert_eq!(
        body,
        "PUT|/docs/7?rev=3|application/json|{\"title\":\"draft\"}".as_bytes()
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_router_relays_upstream_error_status() {
    let upstream = start_echo_upstream().await;
    let engine = engine_for(local_config(upstream.port()));
    let app = Arc::new(HttpHandler::new(engine, 1024)).router();

    let request = Request::builder()
        .method("OPTIONS")
        .uri("/status/418")
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
    // No Accept header: no content type is reported.
    assert!(response.headers().get(header::CONTENT_TYPE).is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_router_reports_dead_upstream_as_bad_gateway() {
    let port = common::closed_port().await;
    let engine = engine_for(local_config(port));
    let app = Arc::new(HttpHandler::new(engine, 1024)).router();

    let request = Request::builder()
        .method("GET")
        .uri("/anything")
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

    let body = to_bytes(response.into_body(), 4096).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["error"], "transport");
}
