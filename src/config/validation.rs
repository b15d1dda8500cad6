#![allow(clippy::collapsible_if)]

use std::net::SocketAddr;

use crate::config::models::{AppConfig, CommandPolicy, MetricsConfig, ProxyConfig, UpstreamScheme};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ConfigurationError>;

/// Configuration error types. All of them are fatal at startup.
#[derive(Debug, thiserror::Error, Clone)]
pub enum ConfigurationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid listen address '{address}': {reason}")]
    InvalidListenAddress { address: String, reason: String },

    #[error("Invalid circuit breaker policy '{command}': {message}")]
    InvalidPolicy { command: String, message: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Application configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the entire application configuration, reporting every problem at once
    pub fn validate(config: &AppConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_listen_address("listen_addr", &config.listen_addr) {
            errors.push(e);
        }

        if config.max_request_body_bytes == 0 {
            errors.push(ConfigurationError::InvalidField {
                field: "max_request_body_bytes".to_string(),
                message: "Must be greater than zero".to_string(),
            });
        }

        if let Err(e) = Self::validate_metrics(&config.metrics) {
            errors.push(e);
        }

        if let Err(mut proxy_errors) = Self::validate_proxy(&config.proxy) {
            errors.append(&mut proxy_errors);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigurationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    /// Validate listen address format
    fn validate_listen_address(field: &str, address: &str) -> ValidationResult<()> {
        if address.parse::<SocketAddr>().is_err() {
            return Err(ConfigurationError::InvalidListenAddress {
                address: address.to_string(),
                reason: format!(
                    "{field} must be in format 'IP:PORT' (e.g., '127.0.0.1:3000' or '0.0.0.0:8080')"
                ),
            });
        }
        Ok(())
    }

    fn validate_metrics(config: &MetricsConfig) -> ValidationResult<()> {
        if config.enabled {
            Self::validate_listen_address("metrics.listen_addr", &config.listen_addr)?;
        }
        Ok(())
    }

    /// Validate the upstream block
    fn validate_proxy(config: &ProxyConfig) -> Result<(), Vec<ConfigurationError>> {
        let mut errors = Vec::new();

        let scheme = match config.scheme.parse::<UpstreamScheme>() {
            Ok(scheme) => Some(scheme),
            Err(e) => {
                errors.push(e);
                None
            }
        };

        if let Err(e) = Self::validate_host(&config.host) {
            errors.push(e);
        }

        if scheme == Some(UpstreamScheme::Http) && config.port == 0 {
            errors.push(ConfigurationError::InvalidField {
                field: "proxy.port".to_string(),
                message: "Port must be non-zero for http upstreams".to_string(),
            });
        }

        if config.name.trim().is_empty() {
            errors.push(ConfigurationError::MissingField {
                field: "proxy.name".to_string(),
            });
        }

        if let Some(template) = &config.path_template {
            if !template.is_empty() && !template.starts_with('/') {
                errors.push(ConfigurationError::InvalidField {
                    field: "proxy.path_template".to_string(),
                    message: "Path template must start with '/'".to_string(),
                });
            }
        }

        if let Err(e) = Self::validate_policy("default", &config.circuit_breaker.default) {
            errors.push(e);
        }
        for (name, policy) in &config.circuit_breaker.commands {
            if let Err(e) = Self::validate_policy(name, policy) {
                errors.push(e);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Validate host field format
    fn validate_host(host: &str) -> ValidationResult<()> {
        if host.trim().is_empty() {
            return Err(ConfigurationError::MissingField {
                field: "proxy.host".to_string(),
            });
        }

        if host.contains("://") {
            return Err(ConfigurationError::InvalidField {
                field: "proxy.host".to_string(),
                message: "Host should not contain protocol (e.g., use 'example.com' not 'http://example.com')".to_string(),
            });
        }

        if let Err(e) = url::Host::parse(host) {
            return Err(ConfigurationError::InvalidField {
                field: "proxy.host".to_string(),
                message: format!("Invalid hostname '{host}': {e}"),
            });
        }

        Ok(())
    }

    fn validate_policy(command: &str, policy: &CommandPolicy) -> ValidationResult<()> {
        if policy.max_concurrent_requests == 0 {
            return Err(ConfigurationError::InvalidPolicy {
                command: command.to_string(),
                message: "max_concurrent_requests must be greater than zero".to_string(),
            });
        }

        if policy.error_threshold_percentage > 100 {
            return Err(ConfigurationError::InvalidPolicy {
                command: command.to_string(),
                message: format!(
                    "error_threshold_percentage must be within 0..=100, got {}",
                    policy.error_threshold_percentage
                ),
            });
        }

        if policy.rolling_window_ms == 0 {
            return Err(ConfigurationError::InvalidPolicy {
                command: command.to_string(),
                message: "rolling_window_ms must be greater than zero".to_string(),
            });
        }

        Ok(())
    }

    /// Format multiple validation errors into a single message
    fn format_multiple_errors(errors: Vec<ConfigurationError>) -> String {
        if errors.is_empty() {
            return "No errors".to_string();
        }

        if errors.len() == 1 {
            return errors[0].to_string();
        }

        let mut message = format!("Found {} validation errors:\n", errors.len());
        for (i, error) in errors.iter().enumerate() {
            message.push_str(&format!("  {}. {}\n", i + 1, error));
        }
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_valid_config() -> AppConfig {
        AppConfig::new(ProxyConfig::new("backend.internal"))
    }

    #[test]
    fn validate_accepts_minimal_config() {
        assert!(ConfigValidator::validate(&minimal_valid_config()).is_ok());
    }

    #[test]
    fn validate_accepts_ip_host() {
        let mut config = minimal_valid_config();
        config.proxy.host = "10.0.0.12".to_string();
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn validate_rejects_host_with_protocol() {
        let mut config = minimal_valid_config();
        config.proxy.host = "http://backend.internal".to_string();
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn validate_rejects_unknown_scheme() {
        let mut config = minimal_valid_config();
        config.proxy.scheme = "gopher".to_string();
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn validate_rejects_zero_port_for_http_only() {
        let mut config = minimal_valid_config();
        config.proxy.port = 0;
        assert!(ConfigValidator::validate(&config).is_err());

        config.proxy.scheme = "https".to_string();
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn validate_rejects_bad_policy_override() {
        let mut config = minimal_valid_config();
        config.proxy.circuit_breaker.commands.insert(
            "http://edge/".to_string(),
            CommandPolicy {
                max_concurrent_requests: 0,
                ..CommandPolicy::default()
            },
        );
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn validate_reports_every_error() {
        let mut config = minimal_valid_config();
        config.listen_addr = "nowhere".to_string();
        config.proxy.host = String::new();

        match ConfigValidator::validate(&config) {
            Err(ConfigurationError::ValidationFailed { message }) => {
                assert!(message.starts_with("Found 2 validation errors"));
            }
            other => panic!("expected aggregated failure, got {other:?}"),
        }
    }
}
