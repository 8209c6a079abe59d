//! The request tracker: owns the log sink, the record pool, the process probe
//! and the shutdown coordinator, and wraps routers with the tracking
//! middleware.

use crate::config::{TrackerConfig, TrackingMode};
use crate::core::{ProcessProbe, RequestRecord, Snapshot};
use crate::internal_metrics::Metrics;
use crate::middleware::track_request;
use crate::pool::{PoolStats, PooledRecord, RecordPool};
use crate::sampler::{SamplerError, SysinfoProbe};
use crate::shutdown::{self, Phase, ShutdownCoordinator};
use crate::sink::{run_periodic_flush, BufferedSink, SinkError, SinkStats};
use axum::Router;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

/// Errors raised while constructing or closing a `Tracker`.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("failed to open request log {path}: {source}")]
    OpenLog {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("flush interval must be greater than zero")]
    ZeroFlushInterval,
    #[error("failed to initialise the process sampler: {0}")]
    Sampler(#[from] SamplerError),
    #[error("a tokio runtime is required to start the periodic flush loop")]
    NoRuntime,
    #[error(transparent)]
    Sink(#[from] SinkError),
}

/// Request-tracking middleware together with everything it writes into.
///
/// Cloning is cheap; clones share one sink, pool and shutdown coordinator.
#[derive(Clone)]
pub struct Tracker {
    inner: Arc<TrackerInner>,
}

struct TrackerInner {
    sink: BufferedSink,
    pool: RecordPool,
    probe: Option<Arc<dyn ProcessProbe>>,
    coordinator: ShutdownCoordinator,
    metrics: Metrics,
}

impl std::fmt::Debug for Tracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracker")
            .field("sink", &self.inner.sink)
            .field("pool", &self.inner.pool.stats())
            .field("sampling", &self.inner.probe.is_some())
            .field("phase", &self.inner.coordinator.phase())
            .finish()
    }
}

impl Tracker {
    /// Creates a new `TrackerBuilder`.
    pub fn builder(config: TrackerConfig) -> TrackerBuilder {
        TrackerBuilder::new(config)
    }

    /// Wraps every route of `router` with the tracking middleware.
    ///
    /// Responses are passed through unchanged; one record per request is
    /// written to the request log.
    pub fn wrap<S>(&self, router: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        router.layer(axum::middleware::from_fn_with_state(
            self.clone(),
            track_request,
        ))
    }

    /// Stops the flush loop, waits for it, flushes and closes the request log.
    ///
    /// Safe to call more than once and concurrently with the signal handler.
    pub async fn close(&self) -> Result<(), TrackerError> {
        self.inner.coordinator.close().await?;
        Ok(())
    }

    /// Resolves once the tracker has been closed, by any path.
    pub async fn wait_closed(&self) {
        self.inner.coordinator.wait_closed().await
    }

    /// Spawns a task that closes the tracker on SIGINT or SIGTERM.
    ///
    /// The task never exits the process; await [`Tracker::wait_closed`] or the
    /// returned handle to learn when cleanup has finished.
    pub fn spawn_signal_handler(&self) -> JoinHandle<()> {
        let tracker = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown::wait_for_signal() => {
                    info!("Shutdown signal received, cleaning up...");
                    match tracker.close().await {
                        Ok(()) => info!("Cleanup complete."),
                        Err(e) => warn!(error = %e, "Cleanup finished with errors."),
                    }
                }
                _ = tracker.wait_closed() => {}
            }
        })
    }

    pub fn phase(&self) -> Phase {
        self.inner.coordinator.phase()
    }

    pub fn sink_stats(&self) -> SinkStats {
        self.inner.sink.stats()
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.inner.pool.stats()
    }

    pub fn metrics(&self) -> &Metrics {
        &self.inner.metrics
    }

    pub(crate) fn acquire_record(&self) -> PooledRecord {
        self.inner.pool.acquire()
    }

    /// Takes a process snapshot, or `None` when sampling is off or failed.
    pub(crate) fn sample(&self) -> Option<Snapshot> {
        let probe = self.inner.probe.as_ref()?;
        match probe.snapshot() {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                self.inner.metrics.sampler_failures_total.increment(1);
                warn!(error = %e, "Failed to sample process metrics, skipping for this request.");
                None
            }
        }
    }

    /// Appends a populated record to the request log. Errors stay here.
    pub(crate) fn submit(&self, record: &RequestRecord) {
        self.inner.metrics.requests_tracked_total.increment(1);
        self.inner
            .metrics
            .request_duration_seconds
            .record(record.latency.as_secs_f64());
        if let Err(e) = self.inner.sink.write(record) {
            warn!(
                error = %e,
                method = %record.method,
                path = %record.path,
                "Failed to write request record."
            );
        }
    }
}

/// Builder for a `Tracker`.
///
/// Overrides allow tests to capture the request log in memory and to inject
/// a process probe.
pub struct TrackerBuilder {
    config: TrackerConfig,
    writer_override: Option<Box<dyn Write + Send>>,
    probe_override: Option<Arc<dyn ProcessProbe>>,
    metrics_override: Option<Metrics>,
}

impl TrackerBuilder {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            writer_override: None,
            probe_override: None,
            metrics_override: None,
        }
    }

    /// Writes the request log into `writer` instead of `config.log_file`.
    pub fn writer_override(mut self, writer: Box<dyn Write + Send>) -> Self {
        self.writer_override = Some(writer);
        self
    }

    /// Uses `probe` instead of the `sysinfo` probe.
    pub fn probe_override(mut self, probe: Arc<dyn ProcessProbe>) -> Self {
        self.probe_override = Some(probe);
        self
    }

    /// Records internal metrics through `metrics`.
    pub fn metrics_override(mut self, metrics: Metrics) -> Self {
        self.metrics_override = Some(metrics);
        self
    }

    /// Opens the request log and starts the periodic flush loop.
    ///
    /// Must be called from within a tokio runtime.
    #[instrument(skip_all)]
    pub fn build(self) -> Result<Tracker, TrackerError> {
        let config = self.config;
        if config.flush_interval_ms == 0 {
            return Err(TrackerError::ZeroFlushInterval);
        }
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(TrackerError::NoRuntime);
        }
        let metrics = self.metrics_override.unwrap_or_default();

        let probe = match config.mode {
            TrackingMode::LatencyOnly => None,
            TrackingMode::Full => match self.probe_override {
                Some(probe) => Some(probe),
                None => Some(Arc::new(SysinfoProbe::new()?) as Arc<dyn ProcessProbe>),
            },
        };

        let sink = match self.writer_override {
            Some(writer) => BufferedSink::new(writer, config.buffer_capacity, metrics.clone()),
            None => BufferedSink::open(&config.log_file, config.buffer_capacity, metrics.clone())
                .map_err(|source| TrackerError::OpenLog {
                    path: config.log_file.clone(),
                    source,
                })?,
        };

        let coordinator = ShutdownCoordinator::new(sink.clone());
        coordinator.task_manager().spawn(
            "PeriodicFlush",
            run_periodic_flush(
                sink.clone(),
                config.flush_interval(),
                coordinator.shutdown_rx(),
            ),
        );

        info!(
            log_file = %config.log_file.display(),
            mode = ?config.mode,
            flush_interval_ms = config.flush_interval_ms,
            "Request tracker started."
        );

        Ok(Tracker {
            inner: Arc::new(TrackerInner {
                sink,
                pool: RecordPool::new(config.pool_max_idle),
                probe,
                coordinator,
                metrics,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_outside_runtime_fails() {
        let result = Tracker::builder(TrackerConfig::default())
            .writer_override(Box::new(io::sink()))
            .build();
        assert!(matches!(result, Err(TrackerError::NoRuntime)));
    }

    #[tokio::test]
    async fn test_zero_flush_interval_is_rejected() {
        let config = TrackerConfig {
            flush_interval_ms: 0,
            ..TrackerConfig::default()
        };
        let result = Tracker::builder(config)
            .writer_override(Box::new(io::sink()))
            .build();
        assert!(matches!(result, Err(TrackerError::ZeroFlushInterval)));
    }

    #[tokio::test]
    async fn test_unopenable_log_file_is_a_startup_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = TrackerConfig {
            log_file: dir.path().join("missing").join("requests.log"),
            mode: TrackingMode::LatencyOnly,
            ..TrackerConfig::default()
        };
        let result = Tracker::builder(config).build();
        assert!(matches!(result, Err(TrackerError::OpenLog { .. })));
    }

    #[tokio::test]
    async fn test_latency_only_mode_does_not_sample() {
        let config = TrackerConfig {
            mode: TrackingMode::LatencyOnly,
            ..TrackerConfig::default()
        };
        let tracker = Tracker::builder(config)
            .writer_override(Box::new(io::sink()))
            .build()
            .unwrap();
        assert!(tracker.sample().is_none());
        tracker.close().await.unwrap();
        assert_eq!(tracker.phase(), Phase::Closed);
    }
}
