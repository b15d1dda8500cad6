//! The forwarding pipeline.
//!
//! `ForwardingEngine::process` takes one [`InboundRequest`] through path
//! resolution, target composition, request reconstruction, guarded execution
//! and response translation.
use std::sync::Arc;

use tracing::{Instrument, debug, error, info};

use crate::{
    config::EffectiveProxyConfig,
    core::{
        circuit_breaker::CircuitState,
        error::ForwardError,
        guard::ExecutionGuard,
        inbound::InboundRequest,
        outbound::OutboundRequestBuilder,
        path::PathResolver,
        response::{ProxyResponse, ResponseTranslator},
        target::TargetUrlBuilder,
    },
    metrics::{self, RequestTimer},
    ports::{lifecycle::LifecycleSignal, upstream::UpstreamClient},
    tracing_setup::create_request_span,
};

pub struct ForwardingEngine {
    config: Arc<EffectiveProxyConfig>,
    paths: PathResolver,
    targets: TargetUrlBuilder,
    guard: ExecutionGuard,
    client: Arc<dyn UpstreamClient>,
}

impl ForwardingEngine {
    pub fn new(config: Arc<EffectiveProxyConfig>, client: Arc<dyn UpstreamClient>) -> Self {
        Self {
            paths: PathResolver::new(config.path_template.clone()),
            targets: TargetUrlBuilder::new(&config),
            guard: ExecutionGuard::new(config.circuit_breaker.clone()),
            client,
            config,
        }
    }

    pub fn config(&self) -> &EffectiveProxyConfig {
        &self.config
    }

    /// Breaker state of a logical name, `None` until it has been used.
    pub async fn circuit_state(&self, logical_name: &str) -> Option<CircuitState> {
        self.guard.state(logical_name).await
    }

    /// Number of isolation units created so far.
    pub fn isolation_units(&self) -> usize {
        self.guard.unit_count()
    }

    /// Forward one inbound call and translate the upstream answer.
    pub async fn process(&self, request: InboundRequest) -> Result<ProxyResponse, ForwardError> {
        let method = request.method();
        let span = create_request_span(method.as_str(), request.path(), request.logical_name());
        let _timer = RequestTimer::new(method.as_str());

        let result = self.forward(&request).instrument(span.clone()).await;

        match &result {
            Ok(response) => {
                span.record("http.status_code", response.status.as_u16());
                metrics::increment_request_total(method.as_str(), response.status.as_u16());
            }
            Err(e) => {
                span.record("http.status_code", e.status_code().as_u16());
                span.record("error.kind", e.kind());
                metrics::increment_request_total(method.as_str(), e.status_code().as_u16());
            }
        }
        result
    }

    async fn forward(&self, request: &InboundRequest) -> Result<ProxyResponse, ForwardError> {
        let method = request.method();
        let path = self.paths.resolve(request.path(), request.path_params());

        debug!(
            "Proxying request to host {}, path {}, method {}",
            self.config.host, path, method
        );

        let target = self
            .targets
            .resolve(method, &path, request.query())
            .inspect_err(|e| {
                error!(
                    base_uri = request.logical_name(),
                    host = %self.config.host,
                    path = %path,
                    method = %method,
                    error = %e,
                    "Failed to resolve upstream target"
                );
            })?;

        let outbound = OutboundRequestBuilder::build(
            method,
            request.headers(),
            target.url,
            request.body().cloned(),
        )?;

        let outcome = self
            .guard
            .execute(request.logical_name(), Arc::clone(&self.client), outbound)
            .await
            .map_err(|e| {
                error!(
                    base_uri = request.logical_name(),
                    host = %self.config.host,
                    path = %path,
                    method = %method,
                    error = %e,
                    "Upstream call failed"
                );
                ForwardError::from(e)
            })?;

        Ok(ResponseTranslator::translate(
            outcome,
            request.accepted_media_type(),
        ))
    }
}

impl LifecycleSignal for ForwardingEngine {
    fn start(&self) {
        info!(
            name = %self.config.name,
            upstream = %format!("{}://{}:{}", self.config.scheme, self.config.host, self.config.port),
            "Forwarding engine started"
        );
    }

    fn stop(&self) {
        self.client.shutdown();
        info!(name = %self.config.name, "Forwarding engine stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    use async_trait::async_trait;
    use bytes::Bytes;
    use http::{HeaderMap, HeaderValue, StatusCode};

    use super::*;
    use crate::{
        config::ProxyConfig,
        core::{
            inbound::QueryParams, method::MethodKind, outbound::OutboundRequest,
            response::OutboundOutcome,
        },
        ports::upstream::{TransportError, TransportResult},
    };

    /// Records every request and answers with a canned outcome.
    struct RecordingClient {
        seen: Mutex<Vec<OutboundRequest>>,
        calls: AtomicUsize,
        fail: bool,
        shutdowns: AtomicUsize,
    }

    impl RecordingClient {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                seen: Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
                fail,
                shutdowns: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl UpstreamClient for RecordingClient {
        async fn execute(&self, request: OutboundRequest) -> TransportResult<OutboundOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(request);
            if self.fail {
                return Err(TransportError::Connect("connection refused".into()));
            }
            Ok(OutboundOutcome {
                status: StatusCode::ACCEPTED,
                content_type: Some(HeaderValue::from_static("text/plain")),
                body: Some(Bytes::from_static(b"upstream says hi")),
            })
        }

        fn shutdown(&self) {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn engine(client: Arc<RecordingClient>, volume: u32) -> ForwardingEngine {
        let mut config = ProxyConfig::new("backend.local");
        config.port = 9090;
        config.path_template = Some("/users/{id}".to_string());
        config.circuit_breaker.default.request_volume_threshold = volume;
        ForwardingEngine::new(Arc::new(config.resolve().unwrap()), client)
    }

    #[tokio::test]
    async fn test_process_forwards_and_translates() {
        let client = RecordingClient::new(false);
        let engine = engine(Arc::clone(&client), 20);

        let mut headers = HeaderMap::new();
        headers.insert("accept", HeaderValue::from_static("application/json"));
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        let request = InboundRequest::builder(MethodKind::Post)
            .path("/orders")
            .query([("a", "1"), ("a", "2")].into_iter().collect::<QueryParams>())
            .headers(headers)
            .body(Some(Bytes::from_static(b"{}")))
            .build();

        let response = engine.process(request).await.unwrap();
        assert_eq!(response.status, StatusCode::ACCEPTED);
        assert_eq!(
            response.media_type,
            Some(HeaderValue::from_static("application/json"))
        );
        assert_eq!(response.body, Some(Bytes::from_static(b"upstream says hi")));

        let seen = client.seen.lock().unwrap();
        assert_eq!(
            seen[0].uri().to_string(),
            "http://backend.local:9090/orders?a=1&a=2"
        );
        assert_eq!(seen[0].body(), Some(&Bytes::from_static(b"{}")));
    }

    #[tokio::test]
    async fn test_template_applies_when_path_is_empty() {
        let client = RecordingClient::new(false);
        let engine = engine(Arc::clone(&client), 20);

        let request = InboundRequest::builder(MethodKind::Get)
            .path_param("id", "42")
            .body(Some(Bytes::from_static(b"ignored")))
            .build();
        engine.process(request).await.unwrap();

        let seen = client.seen.lock().unwrap();
        assert_eq!(seen[0].uri().path(), "/users/42");
        assert!(seen[0].body().is_none());
    }

    #[tokio::test]
    async fn test_circuit_opens_for_default_name() {
        let client = RecordingClient::new(true);
        let engine = engine(Arc::clone(&client), 3);

        for _ in 0..3 {
            let err = engine
                .process(InboundRequest::builder(MethodKind::Get).path("/x").build())
                .await
                .unwrap_err();
            assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
        }
        assert_eq!(
            engine.circuit_state("default").await,
            Some(CircuitState::Open)
        );

        let err = engine
            .process(InboundRequest::builder(MethodKind::Get).path("/x").build())
            .await
            .unwrap_err();
        assert!(matches!(err, ForwardError::CircuitOpen { ref name } if name == "default"));
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
    }

    /// Answers after a delay and counts completed calls.
    struct SlowClient {
        delay: std::time::Duration,
        completed: AtomicUsize,
    }

    #[async_trait]
    impl UpstreamClient for SlowClient {
        async fn execute(&self, _request: OutboundRequest) -> TransportResult<OutboundOutcome> {
            tokio::time::sleep(self.delay).await;
            self.completed.fetch_add(1, Ordering::SeqCst);
            Ok(OutboundOutcome {
                status: StatusCode::OK,
                content_type: None,
                body: None,
            })
        }

        fn shutdown(&self) {}
    }

    #[tokio::test]
    async fn test_abandoned_request_completes_upstream_and_keeps_circuit_closed() {
        let client = Arc::new(SlowClient {
            delay: std::time::Duration::from_millis(100),
            completed: AtomicUsize::new(0),
        });
        let mut config = ProxyConfig::new("backend.local");
        config.circuit_breaker.default.request_volume_threshold = 1;
        let engine = ForwardingEngine::new(
            Arc::new(config.resolve().unwrap()),
            Arc::clone(&client) as Arc<dyn UpstreamClient>,
        );

        let request = || InboundRequest::builder(MethodKind::Get).path("/x").build();
        let abandoned =
            tokio::time::timeout(std::time::Duration::from_millis(10), engine.process(request()))
                .await;
        assert!(abandoned.is_err());

        tokio::time::sleep(std::time::Duration::from_millis(250)).await;
        assert_eq!(client.completed.load(Ordering::SeqCst), 1);
        assert_eq!(
            engine.circuit_state("default").await,
            Some(CircuitState::Closed)
        );

        let response = engine.process(request()).await.unwrap();
        assert_eq!(response.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_distinct_hosts_do_not_grow_isolation_units() {
        let client = RecordingClient::new(false);
        let engine = engine(Arc::clone(&client), 20);

        for i in 0..2000 {
            let request = InboundRequest::builder(MethodKind::Get)
                .path("/x")
                .base_uri(format!("http://host-{i}.example/"))
                .build();
            engine.process(request).await.unwrap();
        }
        assert_eq!(engine.isolation_units(), 1);
        assert_eq!(client.calls.load(Ordering::SeqCst), 2000);
    }

    #[tokio::test]
    async fn test_stop_shuts_client_down() {
        let client = RecordingClient::new(false);
        let engine = engine(Arc::clone(&client), 20);
        engine.start();
        engine.stop();
        assert_eq!(client.shutdowns.load(Ordering::SeqCst), 1);
    }
}
