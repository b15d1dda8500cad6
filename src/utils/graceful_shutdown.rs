use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use eyre::{Result, WrapErr};
use tokio::{signal, sync::broadcast, time::timeout};

/// Why the process is shutting down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// SIGINT / Ctrl+C
    Interrupt,
    /// SIGTERM
    Terminate,
    /// Triggered programmatically
    Requested,
    /// The drain deadline passed or the channel closed
    Force,
}

/// Fans a single shutdown decision out to the server and the lifecycle hooks.
pub struct GracefulShutdown {
    shutdown_tx: broadcast::Sender<ShutdownReason>,
    shutdown_initiated: Arc<AtomicBool>,
    /// Upper bound on draining in-flight requests once shutdown starts
    drain_timeout: Duration,
}

impl GracefulShutdown {
    /// Shutdown manager with a 30-second drain deadline
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(drain_timeout: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(4);
        Self {
            shutdown_tx,
            shutdown_initiated: Arc::new(AtomicBool::new(false)),
            drain_timeout,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownReason> {
        self.shutdown_tx.subscribe()
    }

    pub fn is_shutdown_initiated(&self) -> bool {
        self.shutdown_initiated.load(Ordering::Acquire)
    }

    pub fn drain_timeout(&self) -> Duration {
        self.drain_timeout
    }

    /// Start shutdown. Only the first call broadcasts; later calls are ignored.
    pub fn trigger(&self, reason: ShutdownReason) -> bool {
        if self
            .shutdown_initiated
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::warn!(?reason, "Shutdown already initiated, ignoring");
            return false;
        }
        tracing::info!(?reason, "Shutdown initiated");
        // No receivers simply means nobody is waiting yet.
        let _ = self.shutdown_tx.send(reason);
        true
    }

    /// Wait for SIGINT or SIGTERM and trigger shutdown.
    pub async fn run_signal_handler(&self) -> Result<()> {
        tracing::info!("Signal handler started, listening for SIGINT and SIGTERM");

        tokio::select! {
            result = signal::ctrl_c() => {
                result.wrap_err("Failed to listen for SIGINT")?;
                self.trigger(ShutdownReason::Interrupt);
            }
            result = wait_for_sigterm() => {
                result?;
                self.trigger(ShutdownReason::Terminate);
            }
        }
        Ok(())
    }

    /// Resolve once shutdown has been triggered.
    pub async fn wait_for_shutdown_signal(&self) -> ShutdownReason {
        let mut receiver = self.subscribe();
        if self.is_shutdown_initiated() {
            return receiver.try_recv().unwrap_or(ShutdownReason::Requested);
        }
        receiver.recv().await.unwrap_or(ShutdownReason::Force)
    }

    /// A `'static` future resolving on shutdown, for `axum::serve(..).with_graceful_shutdown`.
    pub fn signal(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut receiver = self.subscribe();
        let initiated = Arc::clone(&self.shutdown_initiated);
        async move {
            if initiated.load(Ordering::Acquire) {
                return;
            }
            let _ = receiver.recv().await;
        }
    }

    /// Run `drain` until it completes or the drain deadline passes.
    /// Returns false when the deadline won.
    pub async fn drain<F>(&self, drain: F) -> bool
    where
        F: Future<Output = ()>,
    {
        match timeout(self.drain_timeout, drain).await {
            Ok(()) => true,
            Err(_) => {
                tracing::error!(
                    "Drain deadline exceeded ({:?}), forcing shutdown",
                    self.drain_timeout
                );
                false
            }
        }
    }
}

impl Default for GracefulShutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
async fn wait_for_sigterm() -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};
    let mut sigterm =
        signal(SignalKind::terminate()).wrap_err("Failed to register SIGTERM handler")?;
    sigterm.recv().await;
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_sigterm() -> Result<()> {
    std::future::pending::<()>().await;
    Ok(())
}
