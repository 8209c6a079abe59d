//! # Internal Metrics Module
//!
//! Counters and histograms describing the tracker itself, recorded through
//! the `metrics` facade.
//!
//! ## Components:
//!
//! - **`Metrics`**: A cloneable set of handles used by the sink and the
//!   middleware. Without an installed recorder every handle is a no-op.
//!
//! - **`MetricsBuilder`**: Installs the Prometheus recorder when metrics are
//!   enabled in the configuration and prepares the `MetricsServer`.
//!
//! - **`MetricsServer`**: (Defined in `server.rs`) An `axum` server exposing
//!   `/metrics` for Prometheus to scrape.

use crate::config::MetricsConfig;
use crate::internal_metrics::server::MetricsServer;
use metrics::{Counter, Histogram, Unit};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::error;

pub mod server;

/// Handles to every metric the tracker records.
#[derive(Clone)]
pub struct Metrics {
    pub requests_tracked_total: Counter,
    pub request_duration_seconds: Histogram,
    pub sink_records_written_total: Counter,
    pub sink_flushes_total: Counter,
    pub sink_errors_total: Counter,
    pub sampler_failures_total: Counter,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

impl Metrics {
    /// Registers descriptions with the global recorder and creates the handles.
    pub fn new() -> Self {
        metrics::describe_counter!("requests_tracked_total", Unit::Count, "Total number of requests that passed through the tracking middleware.");
        metrics::describe_histogram!("request_duration_seconds", Unit::Seconds, "Latency of tracked requests as measured by the middleware.");
        metrics::describe_counter!("sink_records_written_total", Unit::Count, "Total number of request records appended to the log buffer.");
        metrics::describe_counter!("sink_flushes_total", Unit::Count, "Total number of flushes of the request log, periodic and final.");
        metrics::describe_counter!("sink_errors_total", Unit::Count, "Total number of failed writes or flushes of the request log.");
        metrics::describe_counter!("sampler_failures_total", Unit::Count, "Total number of process metric snapshots that could not be taken.");

        Self {
            requests_tracked_total: metrics::counter!("requests_tracked_total"),
            request_duration_seconds: metrics::histogram!("request_duration_seconds"),
            sink_records_written_total: metrics::counter!("sink_records_written_total"),
            sink_flushes_total: metrics::counter!("sink_flushes_total"),
            sink_errors_total: metrics::counter!("sink_errors_total"),
            sampler_failures_total: metrics::counter!("sampler_failures_total"),
        }
    }

    /// Creates a `Metrics` instance that performs no operations.
    pub fn disabled() -> Self {
        Self {
            requests_tracked_total: Counter::noop(),
            request_duration_seconds: Histogram::noop(),
            sink_records_written_total: Counter::noop(),
            sink_flushes_total: Counter::noop(),
            sink_errors_total: Counter::noop(),
            sampler_failures_total: Counter::noop(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for the metrics system.
pub struct MetricsBuilder {
    config: MetricsConfig,
}

impl MetricsBuilder {
    pub fn new(config: MetricsConfig) -> Self {
        Self { config }
    }

    /// Installs the Prometheus recorder and binds the metrics listener.
    ///
    /// Metrics are an optional side channel: on any failure the error is
    /// logged and a disabled `Metrics` handle is returned instead.
    pub fn build(
        self,
        shutdown_rx: watch::Receiver<bool>,
    ) -> (Metrics, Option<(MetricsServer, SocketAddr)>) {
        if !self.config.enabled {
            return (Metrics::disabled(), None);
        }

        let recorder = match PrometheusBuilder::new().set_buckets_for_metric(
            Matcher::Suffix("duration_seconds".to_string()),
            &[0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0],
        ) {
            Ok(builder) => builder.build_recorder(),
            Err(e) => {
                error!("Failed to configure Prometheus buckets: {}", e);
                return (Metrics::disabled(), None);
            }
        };
        let handle = recorder.handle();

        let listener = match std::net::TcpListener::bind(self.config.listen_address) {
            Ok(listener) => listener,
            Err(e) => {
                error!(
                    "Failed to bind metrics server to {}: {}",
                    self.config.listen_address, e
                );
                return (Metrics::disabled(), None);
            }
        };
        let addr = match listener.local_addr() {
            Ok(addr) => addr,
            Err(e) => {
                error!("Failed to get local address for metrics server: {}", e);
                return (Metrics::disabled(), None);
            }
        };
        let listener = match listener
            .set_nonblocking(true)
            .and_then(|_| TcpListener::from_std(listener))
        {
            Ok(listener) => listener,
            Err(e) => {
                error!("Failed to register metrics listener with tokio: {}", e);
                return (Metrics::disabled(), None);
            }
        };

        if let Err(e) = metrics::set_global_recorder(recorder) {
            error!("Failed to install Prometheus recorder: {}", e);
            return (Metrics::disabled(), None);
        }

        let metrics = Metrics::new();
        let server = MetricsServer::new(listener, handle, shutdown_rx);
        (metrics, Some((server, addr)))
    }
}
