//! The tracking middleware itself.
//!
//! Every request is measured by an `InFlight` guard. A request that completes
//! is logged with its real status; a request whose future is dropped before
//! the handler returns (the client went away) is still logged when the guard
//! drops, with status 499 and no resource deltas.

use crate::core::Snapshot;
use crate::pool::PooledRecord;
use crate::sampler::{cpu_delta, memory_delta_mb};
use crate::tracker::Tracker;
use axum::{
    extract::{Request, State},
    http::Method,
    middleware::Next,
    response::Response,
};
use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};
use tracing::debug;

/// Status logged for requests abandoned before the handler produced a
/// response (nginx's "client closed request").
pub const CLIENT_CLOSED_REQUEST: u16 = 499;

/// Axum middleware that records one `RequestRecord` per request.
///
/// The inner response is returned exactly as produced. Sampling and logging
/// failures only ever shrink the record; they never touch the response.
pub async fn track_request(State(tracker): State<Tracker>, request: Request, next: Next) -> Response {
    let in_flight = InFlight::start(tracker, request.method(), request.uri().path());

    let response = next.run(request).await;

    in_flight.complete(response.status().as_u16());
    response
}

/// One request being measured. Logs its record exactly once.
struct InFlight {
    tracker: Tracker,
    record: PooledRecord,
    method: Method,
    path: String,
    started_at: DateTime<Utc>,
    start: Instant,
    before: Option<Snapshot>,
    logged: bool,
}

impl InFlight {
    fn start(tracker: Tracker, method: &Method, path: &str) -> Self {
        let record = tracker.acquire_record();
        let started_at = Utc::now();
        let before = tracker.sample();
        // Latency covers the handler only, not the snapshots around it.
        let start = Instant::now();
        Self {
            tracker,
            record,
            method: method.clone(),
            path: path.to_owned(),
            started_at,
            start,
            before,
            logged: false,
        }
    }

    fn complete(mut self, status: u16) {
        let latency = self.start.elapsed();
        let after = self.before.and_then(|_| self.tracker.sample());

        let (cpu, memory) = match (self.before, after) {
            (Some(before), Some(after)) => (
                Some(cpu_delta(&before, &after, latency)),
                Some(memory_delta_mb(&before, &after)),
            ),
            _ => (None, None),
        };
        self.log(status, latency, cpu, memory);
    }

    fn log(&mut self, status: u16, latency: Duration, cpu: Option<f64>, memory: Option<f64>) {
        self.logged = true;
        self.record.populate(
            self.started_at,
            self.method.as_str(),
            &self.path,
            status,
            latency,
            cpu,
            memory,
        );
        self.tracker.submit(&self.record);
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.logged {
            return;
        }
        debug!(
            method = %self.method,
            path = %self.path,
            "Request dropped before a response was produced."
        );
        let latency = self.start.elapsed();
        self.log(CLIENT_CLOSED_REQUEST, latency, None, None);
    }
}
