//! Graceful shutdown of the tracker.
//!
//! The coordinator moves through three phases:
//!
//! - **Running**: the periodic flush loop is active and writes are accepted.
//! - **Draining**: the shutdown signal has been sent; the coordinator waits
//!   for every background task to observe it and return.
//! - **Closed**: the sink has been flushed one last time and its stream
//!   released.
//!
//! An OS signal and an explicit `close` call both end up in
//! [`ShutdownCoordinator::close`], which is serialized and idempotent.

use crate::sink::{BufferedSink, SinkError};
use crate::task_manager::TaskManager;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{info, instrument, warn};

/// Lifecycle phase of the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Running,
    Draining,
    Closed,
}

/// Owns the shutdown signal and performs the drain-flush-close sequence once.
#[derive(Clone, Debug)]
pub struct ShutdownCoordinator {
    inner: Arc<CoordinatorInner>,
}

#[derive(Debug)]
struct CoordinatorInner {
    shutdown_tx: watch::Sender<bool>,
    phase_tx: watch::Sender<Phase>,
    task_manager: TaskManager,
    sink: BufferedSink,
    close_lock: Mutex<()>,
}

impl ShutdownCoordinator {
    /// Creates a coordinator in the `Running` phase for `sink`.
    pub fn new(sink: BufferedSink) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (phase_tx, _) = watch::channel(Phase::Running);
        Self {
            inner: Arc::new(CoordinatorInner {
                shutdown_tx,
                phase_tx,
                task_manager: TaskManager::new(shutdown_rx),
                sink,
                close_lock: Mutex::new(()),
            }),
        }
    }

    /// The manager whose tasks are drained before the final flush.
    pub fn task_manager(&self) -> &TaskManager {
        &self.inner.task_manager
    }

    /// A receiver that flips to `true` when shutdown starts.
    pub fn shutdown_rx(&self) -> watch::Receiver<bool> {
        self.inner.task_manager.get_shutdown_rx()
    }

    pub fn phase(&self) -> Phase {
        *self.inner.phase_tx.borrow()
    }

    /// Stops background work, waits for it, then flushes and closes the sink.
    ///
    /// Concurrent and repeated calls are safe: the sequence runs once and
    /// later callers return `Ok(())` after it has finished.
    #[instrument(skip_all)]
    pub async fn close(&self) -> Result<(), SinkError> {
        let _guard = self.inner.close_lock.lock().await;
        if self.phase() == Phase::Closed {
            return Ok(());
        }

        info!("Shutting down request tracker, draining background tasks...");
        self.inner.phase_tx.send_replace(Phase::Draining);
        self.inner.shutdown_tx.send_replace(true);
        self.inner.task_manager.shutdown().await;

        let result = self.inner.sink.close();
        self.inner.phase_tx.send_replace(Phase::Closed);
        match &result {
            Ok(()) => info!("Request log flushed and closed."),
            Err(e) => warn!(error = %e, "Final flush of the request log failed."),
        }
        result
    }

    /// Resolves once the coordinator reaches `Closed`.
    pub async fn wait_closed(&self) {
        let mut phase_rx = self.inner.phase_tx.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = phase_rx.wait_for(|phase| *phase == Phase::Closed).await;
    }
}

/// Resolves when the process receives SIGINT (Ctrl+C) or, on Unix, SIGTERM.
pub async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C.");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM.");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT."),
        _ = terminate => info!("Received SIGTERM."),
    }
}
