use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::core::{outbound::OutboundRequest, response::OutboundOutcome};

/// Failures raised while talking to the upstream.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TransportError {
    /// The connection could not be established.
    #[error("Connection error: {0}")]
    Connect(String),

    /// A phase of the exchange exceeded its budget.
    #[error("Timed out during {phase} after {after:?}")]
    Timeout { phase: &'static str, after: Duration },

    /// The exchange started but failed mid-flight.
    #[error("I/O error: {0}")]
    Io(String),

    /// No execution slot was available.
    #[error("Rejected: {0}")]
    Rejected(String),

    /// The transport was shut down before or during the call.
    #[error("Transport is shut down")]
    Shutdown,
}

pub type TransportResult<T> = Result<T, TransportError>;

/// UpstreamClient is the port for executing one composed call against the upstream.
///
/// Implementations read the response body completely before returning so that
/// body failures are part of the call's outcome.
#[async_trait]
pub trait UpstreamClient: Send + Sync + 'static {
    async fn execute(&self, request: OutboundRequest) -> TransportResult<OutboundOutcome>;

    /// Release pooled resources. Safe to call more than once.
    fn shutdown(&self);
}
