use std::{error::Error as StdError, sync::Arc};

use axum::{
    Json, Router,
    body::{Body, to_bytes},
    extract::{Request, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{MethodRouter, get},
};
use http_body_util::LengthLimitError;
use serde_json::json;

use crate::core::{
    ForwardingEngine, InboundRequest, QueryParams,
    error::ForwardError,
    method::MethodKind,
};

/// Name of the catch-all path parameter.
pub const PATH_PARAM: &str = "path";

/// Inbound HTTP surface: one handler per forwarded method on `/` and `/{*path}`.
pub struct HttpHandler {
    engine: Arc<ForwardingEngine>,
    max_body_bytes: usize,
}

impl HttpHandler {
    pub fn new(engine: Arc<ForwardingEngine>, max_body_bytes: usize) -> Self {
        Self {
            engine,
            max_body_bytes,
        }
    }

    /// Router with every forwarded method mounted on the root and the catch-all path.
    pub fn router(self: Arc<Self>) -> Router {
        fn methods() -> MethodRouter<Arc<HttpHandler>> {
            get(handle_get)
                .head(handle_head)
                .post(handle_post)
                .put(handle_put)
                .patch(handle_patch)
                .delete(handle_delete)
                .options(handle_options)
        }

        Router::new()
            .route("/", methods())
            .route("/{*path}", methods())
            .with_state(self)
    }

    /// Turn the framework request into an [`InboundRequest`] and run it through the engine.
    pub async fn handle_request(&self, method: MethodKind, request: Request) -> Response {
        let (parts, body) = request.into_parts();

        let body = if method.body_policy().accepts_body() {
            match to_bytes(body, self.max_body_bytes).await {
                Ok(bytes) => Some(bytes),
                Err(e) => return body_error_response(&e),
            }
        } else {
            None
        };

        // The catch-all capture, without the leading slash. Empty for `/`, which
        // lets the configured path template take over.
        let raw_path = parts.uri.path();
        let captured = raw_path.strip_prefix('/').unwrap_or(raw_path);
        let mut builder = InboundRequest::builder(method)
            .path(captured)
            .path_param(PATH_PARAM, captured)
            .query(QueryParams::parse(parts.uri.query().unwrap_or_default()))
            .body(body);
        if let Some(host) = parts
            .headers
            .get(header::HOST)
            .and_then(|h| h.to_str().ok())
            .filter(|h| !h.is_empty())
        {
            builder = builder.base_uri(format!("http://{host}/"));
        }

        let inbound = builder.headers(parts.headers).build();

        match self.engine.process(inbound).await {
            Ok(response) => response.into_response(),
            Err(e) => e.into_response(),
        }
    }
}

async fn handle_head(State(handler): State<Arc<HttpHandler>>, request: Request) -> Response {
    handler.handle_request(MethodKind::Head, request).await
}

async fn handle_get(State(handler): State<Arc<HttpHandler>>, request: Request) -> Response {
    handler.handle_request(MethodKind::Get, request).await
}

async fn handle_post(State(handler): State<Arc<HttpHandler>>, request: Request) -> Response {
    handler.handle_request(MethodKind::Post, request).await
}

async fn handle_put(State(handler): State<Arc<HttpHandler>>, request: Request) -> Response {
    handler.handle_request(MethodKind::Put, request).await
}

async fn handle_patch(State(handler): State<Arc<HttpHandler>>, request: Request) -> Response {
    handler.handle_request(MethodKind::Patch, request).await
}

async fn handle_delete(State(handler): State<Arc<HttpHandler>>, request: Request) -> Response {
    handler.handle_request(MethodKind::Delete, request).await
}

async fn handle_options(State(handler): State<Arc<HttpHandler>>, request: Request) -> Response {
    handler.handle_request(MethodKind::Options, request).await
}

fn body_error_response(err: &axum::Error) -> Response {
    let mut source = err.source();
    while let Some(cause) = source {
        if cause.is::<LengthLimitError>() {
            return error_body(
                StatusCode::PAYLOAD_TOO_LARGE,
                "body_too_large",
                "Request body exceeds the configured limit".to_string(),
            );
        }
        source = cause.source();
    }
    error_body(
        StatusCode::BAD_REQUEST,
        "body_read",
        format!("Failed to read request body: {err}"),
    )
}

fn error_body(status: StatusCode, kind: &str, message: String) -> Response {
    (status, Json(json!({ "error": kind, "message": message }))).into_response()
}

impl IntoResponse for ForwardError {
    fn into_response(self) -> Response {
        error_body(self.status_code(), self.kind(), self.to_string())
    }
}
