pub mod circuit_breaker;
pub mod engine;
pub mod error;
pub mod guard;
pub mod inbound;
pub mod lifecycle;
pub mod method;
pub mod outbound;
pub mod path;
pub mod response;
pub mod target;

pub use circuit_breaker::{CallPermit, CircuitBreaker, CircuitState};
pub use engine::ForwardingEngine;
pub use error::{ForwardError, ResolutionError};
pub use guard::{ExecutionGuard, GuardError};
pub use inbound::{InboundRequest, QueryParams};
pub use lifecycle::Lifecycle;
pub use method::{BodyPolicy, MethodKind};
pub use outbound::{OutboundRequest, OutboundRequestBuilder};
pub use path::PathResolver;
pub use response::{OutboundOutcome, ProxyResponse, ResponseTranslator};
pub use target::{ResolvedTarget, TargetUrlBuilder};
