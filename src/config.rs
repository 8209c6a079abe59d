//! Configuration management for the request tracker
//!
//! This module defines the main `Config` struct and its sub-structs. Settings
//! are layered with `figment`: built-in defaults, an optional TOML file,
//! `REQUEST_TRACKER_`-prefixed environment variables and finally the
//! command-line arguments.

use crate::cli::Cli;
use crate::pool::DEFAULT_MAX_IDLE;
use crate::sink::DEFAULT_BUFFER_CAPACITY;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Prefix for environment variable overrides, e.g.
/// `REQUEST_TRACKER_TRACKER__FLUSH_INTERVAL_MS=1000`.
pub const ENV_PREFIX: &str = "REQUEST_TRACKER_";

/// The main configuration struct for the application.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Config {
    /// The logging level for diagnostics (`RUST_LOG` takes precedence).
    pub log_level: String,
    /// Request tracking and the request log.
    pub tracker: TrackerConfig,
    /// The demo HTTP server.
    pub server: ServerConfig,
    /// Internal Prometheus metrics.
    pub metrics: MetricsConfig,
}

/// Which measurements the middleware takes for each request.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TrackingMode {
    /// Latency plus process CPU and memory deltas.
    #[default]
    Full,
    /// Method, path, status and latency only.
    LatencyOnly,
}

/// Configuration for request tracking.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct TrackerConfig {
    /// The request log file, opened in create/append mode.
    pub log_file: PathBuf,
    /// How often buffered records are flushed to the file.
    pub flush_interval_ms: u64,
    /// Size of the in-memory buffer in front of the file.
    pub buffer_capacity: usize,
    /// Measurements taken per request.
    pub mode: TrackingMode,
    /// Idle request records kept for reuse.
    pub pool_max_idle: usize,
}

impl TrackerConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            log_file: PathBuf::from("app.log"),
            flush_interval_ms: 5_000,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            mode: TrackingMode::Full,
            pool_max_idle: DEFAULT_MAX_IDLE,
        }
    }
}

/// Configuration for the demo HTTP server.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_address: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: ([0, 0, 0, 0], 8080).into(),
        }
    }
}

/// Configuration for the internal metrics endpoint.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct MetricsConfig {
    /// Expose Prometheus metrics.
    pub enabled: bool,
    /// Address of the `/metrics` endpoint.
    pub listen_address: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_address: ([127, 0, 0, 1], 9090).into(),
        }
    }
}

impl Config {
    /// Loads the configuration by layering defaults, the TOML file named on
    /// the command line (if any), the environment and the CLI arguments.
    pub fn load(cli: &Cli) -> Result<Self, figment::Error> {
        Self::figment(cli).extract()
    }

    fn figment(cli: &Cli) -> Figment {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));
        if let Some(path) = &cli.config {
            figment = figment.merge(Toml::file(path));
        }
        figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .merge(cli.clone())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            tracker: TrackerConfig::default(),
            server: ServerConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}
