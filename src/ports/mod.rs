pub mod lifecycle;
pub mod upstream;

pub use lifecycle::LifecycleSignal;
pub use upstream::{TransportError, TransportResult, UpstreamClient};
