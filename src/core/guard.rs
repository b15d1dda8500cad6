//! Failure isolation around upstream calls.
//!
//! Every logical name configured under `circuit_breaker.commands` gets its own
//! [`IsolationUnit`]: a circuit breaker, a bulkhead (bounded concurrency with a
//! bounded wait queue) and a timeout. Any other name shares the unit of the
//! default command, so the registry never grows past the configured names.
//! Units are created on first use and live as long as the guard.
//!
//! The guarded call runs on its own task. A caller that goes away does not
//! cancel it; the outcome is still recorded against the breaker.
use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use scc::HashMap;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

use crate::{
    config::{EffectiveCircuitBreakerConfig, EffectivePolicy},
    core::{
        circuit_breaker::{CircuitBreaker, CircuitState},
        error::ForwardError,
        inbound::DEFAULT_LOGICAL_NAME,
        outbound::OutboundRequest,
        response::OutboundOutcome,
    },
    metrics,
    ports::upstream::{TransportError, TransportResult, UpstreamClient},
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GuardError {
    #[error("Circuit open for '{name}'")]
    CircuitOpen { name: String },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl From<GuardError> for ForwardError {
    fn from(err: GuardError) -> Self {
        match err {
            GuardError::CircuitOpen { name } => ForwardError::CircuitOpen { name },
            GuardError::Transport(e) => ForwardError::Transport(e),
        }
    }
}

/// Bounded concurrency with a bounded number of waiters.
#[derive(Debug)]
struct Bulkhead {
    slots: Arc<Semaphore>,
    max_queue: usize,
    queued: AtomicUsize,
}

enum Admission {
    Ready(OwnedSemaphorePermit),
    Queued(QueueTicket),
}

/// A reserved place in the wait queue, given back on drop.
struct QueueTicket {
    bulkhead: Arc<Bulkhead>,
}

impl Drop for QueueTicket {
    fn drop(&mut self) {
        self.bulkhead.queued.fetch_sub(1, Ordering::AcqRel);
    }
}

impl Bulkhead {
    fn new(max_concurrent: usize, max_queue: usize) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(max_concurrent)),
            max_queue,
            queued: AtomicUsize::new(0),
        }
    }

    /// Take a slot now, or a place in the queue, or fail fast.
    fn admit(self: &Arc<Self>, name: &str) -> TransportResult<Admission> {
        match Arc::clone(&self.slots).try_acquire_owned() {
            Ok(permit) => Ok(Admission::Ready(permit)),
            Err(TryAcquireError::Closed) => Err(TransportError::Shutdown),
            Err(TryAcquireError::NoPermits) => {
                let reserved = self
                    .queued
                    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |queued| {
                        (queued < self.max_queue).then_some(queued + 1)
                    });
                match reserved {
                    Ok(_) => Ok(Admission::Queued(QueueTicket {
                        bulkhead: Arc::clone(self),
                    })),
                    Err(_) => Err(TransportError::Rejected(format!(
                        "no execution slot available for '{name}'"
                    ))),
                }
            }
        }
    }
}

impl Admission {
    async fn slot(self) -> TransportResult<OwnedSemaphorePermit> {
        match self {
            Admission::Ready(permit) => Ok(permit),
            Admission::Queued(ticket) => {
                let slots = Arc::clone(&ticket.bulkhead.slots);
                let permit = slots
                    .acquire_owned()
                    .await
                    .map_err(|_| TransportError::Shutdown)?;
                drop(ticket);
                Ok(permit)
            }
        }
    }
}

/// Isolation state kept for one logical name.
#[derive(Debug)]
pub struct IsolationUnit {
    enabled: bool,
    breaker: Arc<CircuitBreaker>,
    bulkhead: Arc<Bulkhead>,
    timeout: Duration,
}

impl IsolationUnit {
    fn new(name: &str, policy: &EffectivePolicy) -> Self {
        Self {
            enabled: policy.enabled,
            breaker: Arc::new(CircuitBreaker::new(name, policy)),
            bulkhead: Arc::new(Bulkhead::new(
                policy.max_concurrent_requests,
                policy.max_queue_size,
            )),
            timeout: policy.timeout,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.breaker.state()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Runs upstream calls under per-logical-name isolation.
pub struct ExecutionGuard {
    policies: EffectiveCircuitBreakerConfig,
    units: HashMap<String, Arc<IsolationUnit>>,
}

impl ExecutionGuard {
    pub fn new(policies: EffectiveCircuitBreakerConfig) -> Self {
        Self {
            policies,
            units: HashMap::new(),
        }
    }

    /// Registry key for `name`: the name itself when it has its own command,
    /// the default command otherwise.
    pub fn unit_name<'a>(&self, name: &'a str) -> &'a str {
        if self.policies.commands.contains_key(name) {
            name
        } else {
            DEFAULT_LOGICAL_NAME
        }
    }

    /// Isolation unit serving `name`, created on first use.
    pub async fn unit(&self, name: &str) -> Arc<IsolationUnit> {
        let key = self.unit_name(name);
        if let Some(entry) = self.units.get_async(key).await {
            return Arc::clone(entry.get());
        }

        let unit = Arc::new(IsolationUnit::new(key, self.policies.policy_for(key)));
        match self
            .units
            .insert_async(key.to_string(), Arc::clone(&unit))
            .await
        {
            Ok(()) => unit,
            // Lost the race; use the unit that won.
            Err(_) => self
                .units
                .get_async(key)
                .await
                .map(|entry| Arc::clone(entry.get()))
                .unwrap_or(unit),
        }
    }

    /// Current breaker state of the unit serving `name`, if it exists yet.
    pub async fn state(&self, name: &str) -> Option<CircuitState> {
        self.units
            .get_async(self.unit_name(name))
            .await
            .map(|entry| entry.get().state())
    }

    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    /// Run `call` under the isolation unit serving `name`.
    ///
    /// Open circuit and full bulkhead fail fast without invoking `call`. Errors
    /// and timeouts of `call` are recorded as breaker failures; any `Ok` value
    /// is a success. A disabled policy runs `call` directly.
    ///
    /// Once admitted, `call` runs to completion or timeout on a spawned task
    /// even if the returned future is dropped.
    pub async fn run<T, F, Fut>(&self, name: &str, call: F) -> Result<T, GuardError>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = TransportResult<T>> + Send + 'static,
    {
        let key = self.unit_name(name);
        let unit = self.unit(key).await;
        if !unit.enabled {
            return detached(async move { call().await.map_err(GuardError::from) }).await;
        }

        let Some(permit) = unit.breaker.try_acquire() else {
            metrics::increment_circuit_rejections(key);
            return Err(GuardError::CircuitOpen {
                name: key.to_string(),
            });
        };

        let admission = match unit.bulkhead.admit(key) {
            Ok(admission) => admission,
            Err(e) => {
                permit.release();
                metrics::increment_bulkhead_rejections(key);
                return Err(e.into());
            }
        };

        let limit = unit.timeout;
        detached(async move {
            let guarded = tokio::time::timeout(limit, async move {
                let _slot = admission.slot().await?;
                call().await
            })
            .await;

            match guarded {
                Ok(Ok(value)) => {
                    permit.success();
                    Ok(value)
                }
                Ok(Err(e)) => {
                    permit.failure();
                    Err(e.into())
                }
                Err(_) => {
                    permit.failure();
                    Err(TransportError::Timeout {
                        phase: "command",
                        after: limit,
                    }
                    .into())
                }
            }
        })
        .await
    }

    /// Execute one composed request through `client` under `name`.
    pub async fn execute(
        &self,
        name: &str,
        client: Arc<dyn UpstreamClient>,
        request: OutboundRequest,
    ) -> Result<OutboundOutcome, GuardError> {
        self.run(name, move || async move { client.execute(request).await })
            .await
    }
}

/// Run `task` on its own task and wait for it. Dropping the returned future
/// detaches the task instead of cancelling it.
async fn detached<T, Fut>(task: Fut) -> Result<T, GuardError>
where
    T: Send + 'static,
    Fut: Future<Output = Result<T, GuardError>> + Send + 'static,
{
    tokio::spawn(task).await.unwrap_or_else(|e| {
        Err(TransportError::Io(format!("upstream task failed: {e}")).into())
    })
}
