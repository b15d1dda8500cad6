//! Shared helpers for the integration tests.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    Router,
    body::to_bytes,
    extract::Request,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use cascader::{
    ConnectionManager, ForwardingEngine,
    config::ProxyConfig,
};
use tokio::net::TcpListener;

/// Start an upstream that echoes what it received as
/// `METHOD|path?query|content-type|body`.
///
/// * `/status/{code}` answers with that status
/// * `/slow` waits two seconds before answering
pub async fn start_echo_upstream() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Router::new().fallback(echo);

    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

async fn echo(request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let body = to_bytes(body, usize::MAX).await.unwrap_or_default();

    let path = parts.uri.path();
    if path == "/slow" {
        tokio::time::sleep(Duration::from_secs(2)).await;
    }
    let status = path
        .strip_prefix("/status/")
        .and_then(|code| code.parse::<u16>().ok())
        .and_then(|code| StatusCode::from_u16(code).ok())
        .unwrap_or(StatusCode::OK);

    let content_type = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-");
    let target = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or(path);

    let echoed = format!(
        "{}|{}|{}|{}",
        parts.method,
        target,
        content_type,
        String::from_utf8_lossy(&body)
    );
    (status, echoed).into_response()
}

/// A port nothing is listening on.
#[allow(dead_code)]
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

/// Proxy config for a local upstream with short timeouts.
pub fn local_config(port: u16) -> ProxyConfig {
    let mut config = ProxyConfig::new("127.0.0.1");
    config.port = port;
    config.connection_timeout_ms = 500;
    config.operation_timeout_ms = 500;
    config
}

/// Engine backed by the real pooled client.
pub fn engine_for(config: ProxyConfig) -> Arc<ForwardingEngine> {
    let effective = Arc::new(config.resolve().unwrap());
    let client = Arc::new(ConnectionManager::new(Arc::clone(&effective)).unwrap());
    Arc::new(ForwardingEngine::new(effective, client))
}
