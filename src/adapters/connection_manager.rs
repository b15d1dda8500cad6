use std::{error::Error as StdError, sync::Arc};

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use bytes::Bytes;
use eyre::Result;
use http::header;
use http_body_util::Full;
use hyper_rustls::HttpsConnector;
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::{TokioExecutor, TokioTimer},
};
use rustls_native_certs::load_native_certs;
use scc::HashMap;
use tokio::{sync::Semaphore, time::timeout};
use tracing::Instrument;

use crate::{
    config::EffectiveProxyConfig,
    core::{
        outbound::OutboundRequest,
        response::{OutboundOutcome, read_body},
    },
    metrics::ClientMetrics,
    ports::upstream::{TransportError, TransportResult, UpstreamClient},
    tracing_setup::create_upstream_span,
};

type PooledClient = Client<HttpsConnector<HttpConnector>, Full<Bytes>>;

/// Pooled upstream client built from the effective proxy configuration.
///
/// * At most `connections` calls are in flight overall, and at most
///   `connections` per destination authority
/// * Idle pooled connections are evicted after `idle_timeout`
/// * Connect is bounded by `connect_timeout`; sending the request and reading
///   the full response body are each bounded by `operation_timeout`
/// * TLS via rustls with the platform's native roots
///
/// Once [`UpstreamClient::shutdown`] has run the pool is gone and every call
/// fails with [`TransportError::Shutdown`].
pub struct ConnectionManager {
    config: Arc<EffectiveProxyConfig>,
    client: ArcSwapOption<PooledClient>,
    admission: Arc<Semaphore>,
    per_host: HashMap<String, Arc<Semaphore>>,
    metrics: Option<Arc<ClientMetrics>>,
}

impl ConnectionManager {
    pub fn new(config: Arc<EffectiveProxyConfig>) -> Result<Self> {
        Self::with_metrics(config, None)
    }

    /// Build the manager, optionally reporting activity to `metrics`.
    pub fn with_metrics(
        config: Arc<EffectiveProxyConfig>,
        metrics: Option<Arc<ClientMetrics>>,
    ) -> Result<Self> {
        let client = Self::build_client(&config);

        tracing::info!(
            name = %config.name,
            connections = config.connections,
            idle_timeout_secs = config.idle_timeout.as_secs(),
            connect_timeout_ms = config.connect_timeout.as_millis() as u64,
            operation_timeout_ms = config.operation_timeout.as_millis() as u64,
            "Created pooled upstream client"
        );

        Ok(Self {
            admission: Arc::new(Semaphore::new(config.connections)),
            client: ArcSwapOption::from_pointee(client),
            per_host: HashMap::new(),
            metrics,
            config,
        })
    }

    fn build_client(config: &EffectiveProxyConfig) -> PooledClient {
        // Another component may already have installed a provider.
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

        let mut http_connector = HttpConnector::new();
        http_connector.enforce_http(false);
        http_connector.set_connect_timeout(Some(config.connect_timeout));

        let mut root_cert_store = rustls::RootCertStore::empty();
        let native_certs = load_native_certs();
        for cert in native_certs.certs {
            if root_cert_store.add(cert).is_err() {
                tracing::warn!("Failed to add native certificate to rustls RootCertStore");
            }
        }
        if !native_certs.errors.is_empty() {
            tracing::warn!(
                "Some native certificates failed to load: {:?}",
                native_certs.errors
            );
        }
        tracing::debug!("Loaded {} native root certificates", root_cert_store.len());

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_cert_store)
            .with_no_client_auth();

        let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector);

        Client::builder(TokioExecutor::new())
            .pool_idle_timeout(config.idle_timeout)
            .pool_max_idle_per_host(config.connections)
            .pool_timer(TokioTimer::new())
            .build::<_, Full<Bytes>>(https_connector)
    }

    pub fn is_shut_down(&self) -> bool {
        self.client.load().is_none()
    }

    /// Calls that can still start right now without waiting.
    pub fn available_permits(&self) -> usize {
        self.admission.available_permits()
    }

    async fn host_slots(&self, authority: &str) -> Arc<Semaphore> {
        if let Some(entry) = self.per_host.get_async(authority).await {
            return Arc::clone(entry.get());
        }
        let slots = Arc::new(Semaphore::new(self.config.connections));
        match self
            .per_host
            .insert_async(authority.to_string(), Arc::clone(&slots))
            .await
        {
            Ok(()) => slots,
            Err(_) => self
                .per_host
                .get_async(authority)
                .await
                .map(|entry| Arc::clone(entry.get()))
                .unwrap_or(slots),
        }
    }

    async fn send(
        &self,
        client: Arc<PooledClient>,
        request: OutboundRequest,
    ) -> TransportResult<OutboundOutcome> {
        let limit = self.config.operation_timeout;

        let response = timeout(limit, client.request(request.into_http()))
            .await
            .map_err(|_| TransportError::Timeout {
                phase: "request",
                after: limit,
            })?
            .map_err(|e| {
                let detail = error_chain(&e);
                if e.is_connect() {
                    TransportError::Connect(detail)
                } else {
                    TransportError::Io(detail)
                }
            })?;

        let status = response.status();
        tracing::Span::current().record("http.status_code", status.as_u16());
        let content_type = response.headers().get(header::CONTENT_TYPE).cloned();
        let body = read_body(response.into_body(), limit).await?;

        Ok(OutboundOutcome {
            status,
            content_type,
            body,
        })
    }
}

#[async_trait]
impl UpstreamClient for ConnectionManager {
    async fn execute(&self, request: OutboundRequest) -> TransportResult<OutboundOutcome> {
        let client = self.client.load_full().ok_or(TransportError::Shutdown)?;

        let _admitted = Arc::clone(&self.admission)
            .acquire_owned()
            .await
            .map_err(|_| TransportError::Shutdown)?;
        let authority = request.authority().unwrap_or_default().to_string();
        let _host_slot = self
            .host_slots(&authority)
            .await
            .acquire_owned()
            .await
            .map_err(|_| TransportError::Shutdown)?;

        let method = request.method();
        let span = create_upstream_span(&authority, method.as_str(), request.uri().path());
        let timer = self.metrics.as_ref().map(|m| m.track(method.as_str()));
        let started = std::time::Instant::now();

        let result = self.send(client, request).instrument(span.clone()).await;

        span.record("duration_ms", started.elapsed().as_millis() as u64);
        if let Some(timer) = timer {
            timer.finish(if result.is_ok() { "success" } else { "error" });
        }
        if let Err(e) = &result {
            tracing::debug!(upstream = %authority, error = %e, "Upstream call failed");
        }
        result
    }

    fn shutdown(&self) {
        if self.client.swap(None).is_none() {
            return;
        }
        self.admission.close();
        self.per_host.iter_sync(|_, slots| {
            slots.close();
            true
        });
        tracing::info!(name = %self.config.name, "Upstream connection pool released");
    }
}

/// Render an error with its sources, outermost first.
fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut rendered = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        rendered.push_str(": ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}
