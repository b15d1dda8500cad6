use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use crate::ports::lifecycle::LifecycleSignal;

/// Runs registered start/stop hooks once each.
///
/// Hooks start in registration order and stop in reverse order.
#[derive(Default)]
pub struct Lifecycle {
    signals: Vec<Arc<dyn LifecycleSignal>>,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, signal: Arc<dyn LifecycleSignal>) {
        self.signals.push(signal);
    }

    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    pub fn start(&self) {
        if self.started.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::debug!(hooks = self.signals.len(), "Running lifecycle start hooks");
        for signal in &self.signals {
            signal.start();
        }
    }

    /// Stop hooks only run after a start, and only once.
    pub fn stop(&self) {
        if !self.started.load(Ordering::Acquire) || self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::debug!(hooks = self.signals.len(), "Running lifecycle stop hooks");
        for signal in self.signals.iter().rev() {
            signal.stop();
        }
    }
}
