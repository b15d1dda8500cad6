//! Rolling-window circuit breaker for one logical name.
use std::{
    collections::VecDeque,
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use tracing::{debug, info, warn};

use crate::{config::EffectivePolicy, metrics};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls flow; outcomes are recorded in the rolling window.
    Closed,
    /// Calls fail fast until the sleep window has elapsed.
    Open,
    /// One trial call is in flight; everything else fails fast.
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }

    fn gauge_value(self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::Open => 1.0,
            CircuitState::HalfOpen => 2.0,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    opened_at: Option<Instant>,
    /// (recorded at, failed)
    window: VecDeque<(Instant, bool)>,
}

impl BreakerState {
    fn prune(&mut self, now: Instant, rolling_window: Duration) {
        while let Some(&(at, _)) = self.window.front() {
            if now.duration_since(at) > rolling_window {
                self.window.pop_front();
            } else {
                break;
            }
        }
    }

    fn failures(&self) -> usize {
        self.window.iter().filter(|(_, failed)| *failed).count()
    }
}

/// Circuit breaker guarding calls made under one logical name.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    enabled: bool,
    request_volume_threshold: u32,
    error_threshold_percentage: u8,
    sleep_window: Duration,
    rolling_window: Duration,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, policy: &EffectivePolicy) -> Self {
        Self {
            name: name.into(),
            enabled: policy.enabled,
            request_volume_threshold: policy.request_volume_threshold,
            error_threshold_percentage: policy.error_threshold_percentage,
            sleep_window: policy.sleep_window,
            rolling_window: policy.rolling_window,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                opened_at: None,
                window: VecDeque::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Calls recorded in the current rolling window.
    pub fn window_len(&self) -> usize {
        let mut inner = self.lock();
        inner.prune(Instant::now(), self.rolling_window);
        inner.window.len()
    }

    /// Ask for permission to run one call.
    ///
    /// Returns `None` while the circuit is open, or while a half-open trial is
    /// already in flight. The first caller after the sleep window gets the trial.
    pub fn try_acquire(self: &Arc<Self>) -> Option<CallPermit> {
        if !self.enabled {
            return Some(CallPermit::new(self, false));
        }

        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => Some(CallPermit::new(self, false)),
            CircuitState::HalfOpen => None,
            CircuitState::Open => {
                let cooled = inner
                    .opened_at
                    .is_none_or(|at| at.elapsed() >= self.sleep_window);
                if !cooled {
                    return None;
                }
                self.transition(&mut inner, CircuitState::HalfOpen);
                debug!(name = %self.name, "Circuit breaker: letting one trial call through");
                Some(CallPermit::new(self, true))
            }
        }
    }

    fn record(&self, trial: bool, failed: bool) {
        if !self.enabled {
            return;
        }

        let now = Instant::now();
        let mut inner = self.lock();

        if trial {
            if failed {
                inner.opened_at = Some(now);
                self.transition(&mut inner, CircuitState::Open);
                warn!(name = %self.name, "Circuit breaker: HalfOpen -> Open (trial call failed)");
            } else {
                inner.window.clear();
                inner.opened_at = None;
                self.transition(&mut inner, CircuitState::Closed);
                info!(name = %self.name, "Circuit breaker: HalfOpen -> Closed (trial call succeeded)");
            }
            return;
        }

        // Late outcomes of calls admitted before the circuit opened do not count.
        if inner.state != CircuitState::Closed {
            return;
        }

        inner.window.push_back((now, failed));
        inner.prune(now, self.rolling_window);

        let total = inner.window.len();
        let failures = inner.failures();
        if failed
            && total >= self.request_volume_threshold as usize
            && failures * 100 >= usize::from(self.error_threshold_percentage) * total
        {
            inner.opened_at = Some(now);
            self.transition(&mut inner, CircuitState::Open);
            warn!(
                name = %self.name,
                failures,
                total,
                threshold = self.error_threshold_percentage,
                "Circuit breaker: Closed -> Open (error percentage reached threshold)"
            );
        }
    }

    /// Give a trial slot back without an outcome.
    fn abandon(&self, trial: bool) {
        if !self.enabled || !trial {
            return;
        }
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen {
            // Keep opened_at so the next caller is offered the trial straight away.
            self.transition(&mut inner, CircuitState::Open);
        }
    }

    fn transition(&self, inner: &mut BreakerState, next: CircuitState) {
        inner.state = next;
        metrics::set_circuit_state(&self.name, next.gauge_value());
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Permission to run one call, settled with [`CallPermit::success`] or
/// [`CallPermit::failure`]. Dropping it unsettled records no outcome, like
/// [`CallPermit::release`].
#[derive(Debug)]
#[must_use]
pub struct CallPermit {
    breaker: Arc<CircuitBreaker>,
    trial: bool,
    settled: bool,
}

impl CallPermit {
    fn new(breaker: &Arc<CircuitBreaker>, trial: bool) -> Self {
        Self {
            breaker: Arc::clone(breaker),
            trial,
            settled: false,
        }
    }

    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn success(mut self) {
        self.settled = true;
        self.breaker.record(self.trial, false);
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.record(self.trial, true);
    }

    /// Settle without recording an outcome (the call never ran).
    pub fn release(mut self) {
        self.settled = true;
        self.breaker.abandon(self.trial);
    }
}

impl Drop for CallPermit {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.abandon(self.trial);
        }
    }
}
