//! Request Tracker - demo server
//!
//! Serves `GET /hello` behind the tracking middleware and writes one JSON
//! line per request into the configured request log.

use anyhow::{Context, Result};
use axum::{routing::get, Router};
use clap::Parser;
use request_tracker::{
    cli::Cli,
    config::Config,
    internal_metrics::MetricsBuilder,
    shutdown::wait_for_signal,
    Tracker,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration by layering sources: defaults, file, environment, and CLI args.
    let config = Config::load(&cli).context("failed to load configuration")?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Request tracker starting up...");
    info!("-------------------- Configuration --------------------");
    info!("Log Level: {}", config.log_level);
    info!("Request Log: {}", config.tracker.log_file.display());
    info!("Flush Interval: {}ms", config.tracker.flush_interval_ms);
    info!("Tracking Mode: {:?}", config.tracker.mode);
    info!("Listen Address: {}", config.server.listen_address);
    info!(
        "Metrics: {}",
        if config.metrics.enabled {
            config.metrics.listen_address.to_string()
        } else {
            "Disabled".to_string()
        }
    );
    info!("-------------------------------------------------------");

    // The metrics server is built before the tracker and stops after it.
    let (metrics_shutdown_tx, metrics_shutdown_rx) = tokio::sync::watch::channel(false);
    let (metrics, metrics_server) = MetricsBuilder::new(config.metrics.clone()).build(metrics_shutdown_rx);
    let metrics_task = metrics_server.map(|(server, addr)| {
        info!("Metrics server listening on http://{}/metrics", addr);
        tokio::spawn(server.run())
    });

    let tracker = Tracker::builder(config.tracker.clone())
        .metrics_override(metrics)
        .build()
        .context("failed to start request tracker")?;

    let app = tracker.wrap(Router::new().route("/hello", get(hello)));

    let listener = tokio::net::TcpListener::bind(config.server.listen_address)
        .await
        .with_context(|| format!("failed to bind {}", config.server.listen_address))?;
    info!("Server is running on {}", config.server.listen_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_signal())
        .await
        .context("server exited with error")?;

    info!("Shutdown signal received, cleaning up...");
    tracker.close().await?;
    metrics_shutdown_tx.send_replace(true);
    if let Some(handle) = metrics_task {
        if let Err(e) = handle.await {
            tracing::error!("Metrics server task panicked: {:?}", e);
        }
    }
    info!("Cleanup complete. Exiting.");

    Ok(())
}

async fn hello() -> &'static str {
    "Hello, World!"
}
