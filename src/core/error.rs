use http::StatusCode;
use thiserror::Error;

use crate::{config::ConfigurationError, ports::upstream::TransportError};

/// The upstream target could not be built from the inbound request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ResolutionError {
    #[error("Upstream host is empty")]
    EmptyHost,

    #[error("Malformed upstream path '{0}'")]
    MalformedPath(String),

    #[error("Invalid upstream URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// Everything a forward can fail with, as seen by the inbound surface.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ForwardError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Resolution error: {0}")]
    Resolution(#[from] ResolutionError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The breaker for `name` is open; the network was not touched.
    #[error("Circuit open for '{name}'")]
    CircuitOpen { name: String },
}

impl ForwardError {
    /// Status code reported to the caller.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ForwardError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ForwardError::Resolution(_) => StatusCode::BAD_REQUEST,
            ForwardError::Transport(TransportError::Timeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
            ForwardError::Transport(_) => StatusCode::BAD_GATEWAY,
            ForwardError::CircuitOpen { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Short stable label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ForwardError::Configuration(_) => "configuration",
            ForwardError::Resolution(_) => "resolution",
            ForwardError::Transport(_) => "transport",
            ForwardError::CircuitOpen { .. } => "circuit_open",
        }
    }
}
