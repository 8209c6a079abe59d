//! Command-Line Interface (CLI) argument parsing.
//!
//! These arguments are parsed at startup and merged over the configuration
//! file and environment variables, so anything given here wins.

use clap::Parser;
use figment::{
    value::{Dict, Map, Value},
    Error, Metadata, Profile, Provider,
};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Demo HTTP server whose requests are tracked into a buffered JSON log.
#[derive(Parser, Debug, Default, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Request log file (created if missing, appended otherwise).
    #[arg(long, value_name = "FILE")]
    pub log_file: Option<PathBuf>,

    /// Interval between periodic flushes of the request log, in milliseconds.
    #[arg(long, value_name = "MS")]
    pub flush_interval_ms: Option<u64>,

    /// Address the demo server listens on.
    #[arg(long, value_name = "ADDR")]
    pub listen: Option<SocketAddr>,

    /// Record latency only, without sampling process CPU and memory.
    #[arg(long)]
    pub latency_only: bool,

    /// Diagnostic log level (e.g. "debug").
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,
}

impl Provider for Cli {
    fn metadata(&self) -> Metadata {
        Metadata::named("Command-Line Arguments")
    }

    fn data(&self) -> Result<Map<Profile, Dict>, Error> {
        let mut tracker = Dict::new();
        if let Some(path) = &self.log_file {
            tracker.insert(
                "log_file".into(),
                Value::from(path.to_string_lossy().into_owned()),
            );
        }
        if let Some(interval) = self.flush_interval_ms {
            tracker.insert("flush_interval_ms".into(), Value::from(interval));
        }
        // The flag can only switch sampling off; absence keeps the configured mode.
        if self.latency_only {
            tracker.insert("mode".into(), Value::from("latency_only"));
        }

        let mut dict = Dict::new();
        if !tracker.is_empty() {
            dict.insert("tracker".into(), Value::from(tracker));
        }
        if let Some(addr) = self.listen {
            let mut server = Dict::new();
            server.insert("listen_address".into(), Value::from(addr.to_string()));
            dict.insert("server".into(), Value::from(server));
        }
        if let Some(level) = &self.log_level {
            dict.insert("log_level".into(), Value::from(level.clone()));
        }

        let mut map = Map::new();
        map.insert(Profile::Default, dict);
        Ok(map)
    }
}
