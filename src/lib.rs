//! Request Tracker - HTTP request-tracking middleware
//!
//! Wraps an `axum` router, measures per-request latency and the process CPU
//! and memory consumed while the request ran, and appends one JSON record per
//! request to a buffered, periodically flushed log file.

pub mod cli;
pub mod config;
pub mod core;
pub mod internal_metrics;
pub mod middleware;
pub mod pool;
pub mod sampler;
pub mod shutdown;
pub mod sink;
pub mod task_manager;
pub mod tracker;

// Re-export core types for convenience
pub use crate::core::*;
pub use crate::tracker::{Tracker, TrackerBuilder, TrackerError};
