//! Core domain types and service traits for the request tracker
//!
//! This module defines the per-request record that flows from the middleware
//! into the log sink, and the trait contract for the process-metrics source.

use crate::sampler::SamplerError;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::time::Duration;

/// The message attached to every request line in the log file.
pub const REQUEST_LOG_MESSAGE: &str = "Request details logged";

/// Everything recorded about one instrumented request.
///
/// Records are pooled and reused across requests, so a record handed out by
/// the pool may still carry the previous request's values until
/// [`RequestRecord::populate`] is called.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RequestRecord {
    /// When processing of the request started
    pub timestamp: DateTime<Utc>,
    /// HTTP method, e.g. "GET"
    pub method: String,
    /// Request path without the query string
    pub path: String,
    /// Status code of the response produced by the wrapped handler
    pub status: u16,
    /// Wall-clock time spent in the wrapped handler
    pub latency: Duration,
    /// CPU time consumed during the request, as a percentage of one core
    pub cpu_delta: Option<f64>,
    /// Change in resident memory during the request, in MB
    pub memory_delta: Option<f64>,
}

impl RequestRecord {
    /// Overwrites every field of the record.
    ///
    /// The string fields keep their allocations so a recycled record does not
    /// allocate again for paths of similar length.
    #[allow(clippy::too_many_arguments)]
    pub fn populate(
        &mut self,
        timestamp: DateTime<Utc>,
        method: &str,
        path: &str,
        status: u16,
        latency: Duration,
        cpu_delta: Option<f64>,
        memory_delta: Option<f64>,
    ) {
        self.timestamp = timestamp;
        self.method.clear();
        self.method.push_str(method);
        self.path.clear();
        self.path.push_str(path);
        self.status = status;
        self.latency = latency;
        self.cpu_delta = cpu_delta;
        self.memory_delta = memory_delta;
    }

    /// Borrows the record as the structured line written to the log file.
    pub fn log_line(&self, logged_at: DateTime<Utc>) -> RequestLogLine<'_> {
        RequestLogLine {
            level: "info",
            msg: REQUEST_LOG_MESSAGE,
            time: logged_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            date_time: self.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            request_method: &self.method,
            request_url: &self.path,
            status: self.status,
            latency: format!("{:?}", self.latency),
            cpu_delta: self.cpu_delta,
            memory_delta: self.memory_delta,
        }
    }
}

/// The JSON shape of one line in the request log.
#[derive(Debug, Serialize)]
pub struct RequestLogLine<'a> {
    pub level: &'static str,
    pub msg: &'static str,
    pub time: String,
    #[serde(rename = "dateTime")]
    pub date_time: String,
    #[serde(rename = "requestMethod")]
    pub request_method: &'a str,
    #[serde(rename = "requestURL")]
    pub request_url: &'a str,
    pub status: u16,
    pub latency: String,
    #[serde(rename = "cpuDelta", skip_serializing_if = "Option::is_none")]
    pub cpu_delta: Option<f64>,
    #[serde(rename = "memoryDelta", skip_serializing_if = "Option::is_none")]
    pub memory_delta: Option<f64>,
}

/// A point-in-time reading of the process resource counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Snapshot {
    /// Cumulative user + system CPU time of the process
    pub cpu_time: Duration,
    /// Resident set size in bytes
    pub memory_bytes: u64,
}

// =============================================================================
// Service Traits
// =============================================================================

/// Reads resource counters of the current process.
///
/// Implementations are queried twice per request from many requests at once,
/// so they must be cheap and internally synchronized.
pub trait ProcessProbe: Send + Sync {
    /// Returns the current CPU time and resident memory of this process.
    ///
    /// # Returns
    /// * `Ok(Snapshot)` with both counters populated
    /// * `Err` if the operating system could not be queried
    fn snapshot(&self) -> Result<Snapshot, SamplerError>;
}
