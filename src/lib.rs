//! Cascader - a transparent HTTP forwarding proxy.
//!
//! Cascader receives an inbound HTTP call, resolves the matching upstream target,
//! reissues an equivalent request against one configured upstream host and relays
//! the answer back. Outbound calls go through a pooled, connection-bounded client
//! and run under a per-logical-name isolation unit (circuit breaker, bulkhead and
//! timeout).
//!
//! # Pipeline
//! `PathResolver` → `TargetUrlBuilder` → `OutboundRequestBuilder` →
//! `ExecutionGuard` (running the `ConnectionManager` call) → `ResponseTranslator`.
//! [`ForwardingEngine`] wires these together.
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use cascader::{ConnectionManager, ForwardingEngine, HttpHandler, config::ProxyConfig};
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let config = Arc::new(ProxyConfig::new("backend.internal").resolve()?);
//! let client = Arc::new(ConnectionManager::new(Arc::clone(&config))?);
//! let engine = Arc::new(ForwardingEngine::new(config, client));
//! let app = Arc::new(HttpHandler::new(engine, 1024 * 1024)).router();
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await?;
//! axum::serve(listener, app).await?;
//! # Ok(()) }
//! ```
//!
//! # Architecture
//! **Ports** (traits) live in [`ports`], their implementations in [`adapters`],
//! and the forwarding logic in [`core`].
//!
//! # Error Handling
//! Domain failures are typed (`ResolutionError`, `TransportError`, `GuardError`,
//! `ForwardError`); application plumbing returns `eyre::Result`.
//!
//! # Concurrency & Data Structures
//! Shared registries (isolation units, per-host connection slots) use
//! `scc::HashMap`; the pooled client sits behind an `ArcSwapOption` so shutdown
//! needs no lock.
pub mod config;
pub mod metrics;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod core;

pub use crate::{
    adapters::{ConnectionManager, HttpHandler},
    core::{ForwardError, ForwardingEngine, Lifecycle},
    ports::{LifecycleSignal, UpstreamClient},
    utils::GracefulShutdown,
};
