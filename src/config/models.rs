//! Configuration data structures for Cascader.
//!
//! These types map directly to TOML (also JSON / YAML) configuration files. They are
//! serde‑friendly and include defaults so that minimal configs remain concise.
//!
//! The raw [`ProxyConfig`] is what operators write. Before anything downstream uses it,
//! [`ProxyConfig::resolve`] turns it into an [`EffectiveProxyConfig`] where every
//! zero-valued numeric field has been replaced by its documented default.
use std::{collections::HashMap, fmt, time::Duration};

use serde::{Deserialize, Serialize};

use crate::config::validation::{ConfigurationError, ValidationResult};

/// Default maximum number of simultaneous upstream connections.
pub const DEFAULT_CONNECTIONS: usize = 10;
/// Default idle timeout for pooled upstream connections, in seconds.
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 30;
/// Default upstream connect timeout, in milliseconds.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;
/// Default upstream read/write timeout, in milliseconds.
pub const DEFAULT_OPERATION_TIMEOUT_MS: u64 = 10_000;
/// Default cap on inbound request bodies (16 MiB).
pub const DEFAULT_MAX_REQUEST_BODY_BYTES: usize = 16 * 1024 * 1024;

fn default_listen_addr() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_max_request_body_bytes() -> usize {
    DEFAULT_MAX_REQUEST_BODY_BYTES
}

fn default_scheme() -> String {
    "http".to_string()
}

fn default_port() -> u16 {
    80
}

fn default_name() -> String {
    "cascader".to_string()
}

/// Top level application configuration.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    /// Address the inbound HTTP surface binds to.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Largest inbound request body accepted for forwarding.
    #[serde(default = "default_max_request_body_bytes")]
    pub max_request_body_bytes: usize,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    pub proxy: ProxyConfig,
}

impl AppConfig {
    /// Create an application config around a proxy block, everything else defaulted.
    pub fn new(proxy: ProxyConfig) -> Self {
        Self {
            listen_addr: default_listen_addr(),
            max_request_body_bytes: DEFAULT_MAX_REQUEST_BODY_BYTES,
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
            proxy,
        }
    }
}

/// Logging output configuration.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is not set
    pub level: String,
    /// Emit JSON lines instead of the pretty console format
    pub json: bool,
    /// Include span context in JSON output
    pub include_spans: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: true,
            include_spans: true,
        }
    }
}

/// Metrics configuration.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct MetricsConfig {
    /// Record upstream client metrics and expose the Prometheus endpoint
    pub enabled: bool,
    /// Address for the Prometheus scrape endpoint
    pub listen_addr: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1:9000".to_string(),
        }
    }
}

/// Upstream forwarding configuration as written by the operator.
///
/// Numeric fields accept `0` to mean "use the default".
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProxyConfig {
    /// `http` or `https`, case-insensitive
    #[serde(default = "default_scheme")]
    pub scheme: String,
    pub host: String,
    /// Only used when the scheme is not https
    #[serde(default = "default_port")]
    pub port: u16,
    /// Logical name; labels client metrics
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default)]
    pub connections: usize,
    #[serde(default)]
    pub idle_timeout_seconds: u64,
    #[serde(default)]
    pub connection_timeout_ms: u64,
    #[serde(default)]
    pub operation_timeout_ms: u64,
    /// Template used to rebuild the path from path parameters when the captured
    /// path is empty, i.e. for requests to `/`. `{path}` expands to the capture
    #[serde(default)]
    pub path_template: Option<String>,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
}

impl ProxyConfig {
    /// Minimal config pointing at `host` over plain http on port 80.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            scheme: default_scheme(),
            host: host.into(),
            port: default_port(),
            name: default_name(),
            connections: 0,
            idle_timeout_seconds: 0,
            connection_timeout_ms: 0,
            operation_timeout_ms: 0,
            path_template: None,
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }

    /// Fill defaults and validate, producing the immutable configuration used everywhere
    /// downstream.
    pub fn resolve(&self) -> ValidationResult<EffectiveProxyConfig> {
        let host = self.host.trim();
        if host.is_empty() {
            return Err(ConfigurationError::MissingField {
                field: "proxy.host".to_string(),
            });
        }
        let scheme: UpstreamScheme = self.scheme.parse()?;

        let connect_timeout = Duration::from_millis(non_zero_or(
            self.connection_timeout_ms,
            DEFAULT_CONNECT_TIMEOUT_MS,
        ));
        let operation_timeout = Duration::from_millis(non_zero_or(
            self.operation_timeout_ms,
            DEFAULT_OPERATION_TIMEOUT_MS,
        ));

        Ok(EffectiveProxyConfig {
            scheme,
            host: host.to_string(),
            port: self.port,
            name: self.name.clone(),
            connections: if self.connections == 0 {
                DEFAULT_CONNECTIONS
            } else {
                self.connections
            },
            idle_timeout: Duration::from_secs(non_zero_or(
                self.idle_timeout_seconds,
                DEFAULT_IDLE_TIMEOUT_SECS,
            )),
            connect_timeout,
            operation_timeout,
            path_template: self.path_template.clone().filter(|t| !t.is_empty()),
            circuit_breaker: self
                .circuit_breaker
                .resolve(connect_timeout + operation_timeout),
        })
    }
}

fn non_zero_or(value: u64, default: u64) -> u64 {
    if value == 0 { default } else { value }
}

/// Upstream scheme after parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamScheme {
    Http,
    Https,
}

impl UpstreamScheme {
    pub fn as_str(self) -> &'static str {
        match self {
            UpstreamScheme::Http => "http",
            UpstreamScheme::Https => "https",
        }
    }
}

impl std::str::FromStr for UpstreamScheme {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let scheme = s.trim();
        if scheme.eq_ignore_ascii_case("https") {
            Ok(UpstreamScheme::Https)
        } else if scheme.eq_ignore_ascii_case("http") {
            Ok(UpstreamScheme::Http)
        } else {
            Err(ConfigurationError::InvalidField {
                field: "proxy.scheme".to_string(),
                message: format!("expected 'http' or 'https', got '{s}'"),
            })
        }
    }
}

impl fmt::Display for UpstreamScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fully resolved upstream configuration. Built once at startup, shared read-only.
#[derive(Debug, Clone)]
pub struct EffectiveProxyConfig {
    pub scheme: UpstreamScheme,
    pub host: String,
    pub port: u16,
    pub name: String,
    pub connections: usize,
    pub idle_timeout: Duration,
    pub connect_timeout: Duration,
    pub operation_timeout: Duration,
    pub path_template: Option<String>,
    pub circuit_breaker: EffectiveCircuitBreakerConfig,
}

/// Circuit breaker block: a default command plus per-logical-name overrides.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub default: CommandPolicy,
    /// Overrides keyed by logical name (usually the inbound base URI)
    pub commands: HashMap<String, CommandPolicy>,
}

impl CircuitBreakerConfig {
    fn resolve(&self, fallback_timeout: Duration) -> EffectiveCircuitBreakerConfig {
        EffectiveCircuitBreakerConfig {
            default: self.default.resolve(fallback_timeout),
            commands: self
                .commands
                .iter()
                .map(|(name, policy)| (name.clone(), policy.resolve(fallback_timeout)))
                .collect(),
        }
    }
}

/// Isolation policy for one logical endpoint.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct CommandPolicy {
    /// When false calls go straight through: no breaker, bulkhead or timeout
    pub enabled: bool,
    /// Whole-call deadline; absent means connect timeout + operation timeout
    pub timeout_ms: Option<u64>,
    pub max_concurrent_requests: usize,
    /// Callers allowed to wait for a bulkhead slot before being rejected
    pub max_queue_size: usize,
    /// Minimum calls in the rolling window before the breaker may open
    pub request_volume_threshold: u32,
    pub error_threshold_percentage: u8,
    /// Cooldown spent OPEN before a half-open trial
    pub sleep_window_ms: u64,
    pub rolling_window_ms: u64,
}

impl Default for CommandPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_ms: None,
            max_concurrent_requests: 10,
            max_queue_size: 0,
            request_volume_threshold: 20,
            error_threshold_percentage: 50,
            sleep_window_ms: 5_000,
            rolling_window_ms: 10_000,
        }
    }
}

impl CommandPolicy {
    fn resolve(&self, fallback_timeout: Duration) -> EffectivePolicy {
        EffectivePolicy {
            enabled: self.enabled,
            timeout: self
                .timeout_ms
                .filter(|ms| *ms > 0)
                .map_or(fallback_timeout, Duration::from_millis),
            max_concurrent_requests: self.max_concurrent_requests.max(1),
            max_queue_size: self.max_queue_size,
            request_volume_threshold: self.request_volume_threshold.max(1),
            error_threshold_percentage: self.error_threshold_percentage.min(100),
            sleep_window: Duration::from_millis(self.sleep_window_ms),
            rolling_window: Duration::from_millis(self.rolling_window_ms.max(1)),
        }
    }
}

/// Resolved breaker configuration.
#[derive(Debug, Clone)]
pub struct EffectiveCircuitBreakerConfig {
    pub default: EffectivePolicy,
    pub commands: HashMap<String, EffectivePolicy>,
}

impl EffectiveCircuitBreakerConfig {
    /// Policy for a logical name, falling back to the default command.
    pub fn policy_for(&self, name: &str) -> &EffectivePolicy {
        self.commands.get(name).unwrap_or(&self.default)
    }
}

/// Resolved isolation policy.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectivePolicy {
    pub enabled: bool,
    pub timeout: Duration,
    pub max_concurrent_requests: usize,
    pub max_queue_size: usize,
    pub request_volume_threshold: u32,
    pub error_threshold_percentage: u8,
    pub sleep_window: Duration,
    pub rolling_window: Duration,
}
