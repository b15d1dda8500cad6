//! Lightweight metrics helpers for Cascader.
//!
//! Convenience functions and RAII timers wrapping the `metrics` crate macros.
//! Recording is a no-op until a recorder is installed; the binary installs the
//! Prometheus exporter when `[metrics] enabled = true`.
//!
//! Provided metrics (labels vary by family):
//! * `cascader_requests_total` (counter)
//! * `cascader_request_duration_seconds` (histogram)
//! * `cascader_upstream_requests_total` (counter, per client name)
//! * `cascader_upstream_request_duration_seconds` (histogram, per client name)
//! * `cascader_upstream_in_flight` (gauge, per client name)
//! * `cascader_circuit_state` (gauge per logical name: 0 closed, 1 open, 2 half-open)
//! * `cascader_circuit_rejections_total` (counter)
//! * `cascader_bulkhead_rejections_total` (counter)
//!
//! The timer structs use `Drop` so durations are recorded on early returns too.
use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use eyre::WrapErr;
use metrics::{
    Unit, counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::Lazy;

pub const CASCADER_REQUESTS_TOTAL: &str = "cascader_requests_total";
pub const CASCADER_REQUEST_DURATION_SECONDS: &str = "cascader_request_duration_seconds";
pub const CASCADER_UPSTREAM_REQUESTS_TOTAL: &str = "cascader_upstream_requests_total";
pub const CASCADER_UPSTREAM_REQUEST_DURATION_SECONDS: &str =
    "cascader_upstream_request_duration_seconds";
pub const CASCADER_UPSTREAM_IN_FLIGHT: &str = "cascader_upstream_in_flight";
pub const CASCADER_CIRCUIT_STATE: &str = "cascader_circuit_state";
pub const CASCADER_CIRCUIT_REJECTIONS_TOTAL: &str = "cascader_circuit_rejections_total";
pub const CASCADER_BULKHEAD_REJECTIONS_TOTAL: &str = "cascader_bulkhead_rejections_total";

/// Registers metric descriptions once per process.
static DESCRIBED: Lazy<()> = Lazy::new(|| {
    describe_counter!(
        CASCADER_REQUESTS_TOTAL,
        Unit::Count,
        "Total number of inbound requests handled by the proxy."
    );
    describe_histogram!(
        CASCADER_REQUEST_DURATION_SECONDS,
        Unit::Seconds,
        "Latency of inbound requests handled by the proxy."
    );
    describe_counter!(
        CASCADER_UPSTREAM_REQUESTS_TOTAL,
        Unit::Count,
        "Total number of calls issued to the upstream."
    );
    describe_histogram!(
        CASCADER_UPSTREAM_REQUEST_DURATION_SECONDS,
        Unit::Seconds,
        "Latency of calls issued to the upstream, body read included."
    );
    describe_gauge!(
        CASCADER_UPSTREAM_IN_FLIGHT,
        "Number of upstream calls currently in flight."
    );
    describe_gauge!(
        CASCADER_CIRCUIT_STATE,
        "Circuit breaker state per logical name (0 closed, 1 open, 2 half-open)."
    );
    describe_counter!(
        CASCADER_CIRCUIT_REJECTIONS_TOTAL,
        Unit::Count,
        "Calls failed fast because the circuit was open."
    );
    describe_counter!(
        CASCADER_BULKHEAD_REJECTIONS_TOTAL,
        Unit::Count,
        "Calls rejected because no execution slot was available."
    );
});

/// Increment the total request counter for an inbound request.
pub fn increment_request_total(method: &str, status: u16) {
    counter!(
        CASCADER_REQUESTS_TOTAL,
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record a completed inbound request's duration.
pub fn record_request_duration(method: &str, duration: Duration) {
    histogram!(CASCADER_REQUEST_DURATION_SECONDS, "method" => method.to_string())
        .record(duration.as_secs_f64());
}

pub fn increment_upstream_request_total(client: &str, method: &str, outcome: &str) {
    counter!(
        CASCADER_UPSTREAM_REQUESTS_TOTAL,
        "client" => client.to_string(),
        "method" => method.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

pub fn record_upstream_request_duration(client: &str, method: &str, duration: Duration) {
    histogram!(
        CASCADER_UPSTREAM_REQUEST_DURATION_SECONDS,
        "client" => client.to_string(),
        "method" => method.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record the circuit state of a logical name (0 closed, 1 open, 2 half-open).
pub fn set_circuit_state(name: &str, state: f64) {
    gauge!(CASCADER_CIRCUIT_STATE, "name" => name.to_string()).set(state);
}

pub fn increment_circuit_rejections(name: &str) {
    counter!(CASCADER_CIRCUIT_REJECTIONS_TOTAL, "name" => name.to_string()).increment(1);
}

pub fn increment_bulkhead_rejections(name: &str) {
    counter!(CASCADER_BULKHEAD_REJECTIONS_TOTAL, "name" => name.to_string()).increment(1);
}

/// RAII helper measuring inbound request duration.
pub struct RequestTimer {
    start: Instant,
    method: &'static str,
}

impl RequestTimer {
    pub fn new(method: &'static str) -> Self {
        Self {
            start: Instant::now(),
            method,
        }
    }
}

impl Drop for RequestTimer {
    fn drop(&mut self) {
        record_request_duration(self.method, self.start.elapsed());
    }
}

/// Per-client upstream instrumentation, labelled with the configured client name.
#[derive(Debug)]
pub struct ClientMetrics {
    name: String,
    in_flight: AtomicU64,
}

impl ClientMetrics {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Lazy::force(&DESCRIBED);
        Arc::new(Self {
            name: name.into(),
            in_flight: AtomicU64::new(0),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Start tracking one upstream call. The returned timer records on drop.
    pub fn track(self: &Arc<Self>, method: &'static str) -> UpstreamRequestTimer {
        let current = self.in_flight.fetch_add(1, Ordering::Relaxed) + 1;
        gauge!(CASCADER_UPSTREAM_IN_FLIGHT, "client" => self.name.clone()).set(current as f64);
        UpstreamRequestTimer {
            metrics: Arc::clone(self),
            start: Instant::now(),
            method,
            outcome: "error",
        }
    }
}

/// RAII helper measuring one upstream call. Calls that never reach
/// [`UpstreamRequestTimer::finish`] are counted as errors.
pub struct UpstreamRequestTimer {
    metrics: Arc<ClientMetrics>,
    start: Instant,
    method: &'static str,
    outcome: &'static str,
}

impl UpstreamRequestTimer {
    pub fn finish(mut self, outcome: &'static str) {
        self.outcome = outcome;
    }
}

impl Drop for UpstreamRequestTimer {
    fn drop(&mut self) {
        let name = self.metrics.name();
        let remaining = self
            .metrics
            .in_flight
            .fetch_sub(1, Ordering::Relaxed)
            .saturating_sub(1);
        gauge!(CASCADER_UPSTREAM_IN_FLIGHT, "client" => name.to_string()).set(remaining as f64);
        record_upstream_request_duration(name, self.method, self.start.elapsed());
        increment_upstream_request_total(name, self.method, self.outcome);
    }
}

/// Initialize metric descriptions (idempotent).
pub fn init_metrics() -> eyre::Result<()> {
    tracing::info!("Initializing Cascader metrics system");
    Lazy::force(&DESCRIBED);
    Ok(())
}

/// Install the Prometheus recorder and its scrape endpoint.
pub fn install_prometheus_exporter(addr: SocketAddr) -> eyre::Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .wrap_err_with(|| format!("Failed to install Prometheus exporter on {addr}"))?;
    init_metrics()?;
    tracing::info!(address = %addr, "Prometheus metrics endpoint listening");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_metrics_track_in_flight() {
        let metrics = ClientMetrics::new("upstream-a");
        let first = metrics.track("GET");
        let second = metrics.track("POST");
        assert_eq!(metrics.in_flight(), 2);

        first.finish("success");
        assert_eq!(metrics.in_flight(), 1);
        drop(second);
        assert_eq!(metrics.in_flight(), 0);
    }

    #[test]
    fn test_request_timer() {
        let timer = RequestTimer::new("GET");
        drop(timer);
    }

    #[test]
    fn test_init_metrics_is_idempotent() {
        assert!(init_metrics().is_ok());
        assert!(init_metrics().is_ok());
    }

    #[test]
    fn test_circuit_state_without_recorder_is_noop() {
        set_circuit_state("metrics-test", 1.0);
        set_circuit_state("metrics-test", 0.0);
    }
}
