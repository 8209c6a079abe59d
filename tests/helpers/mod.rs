#![allow(dead_code)]
pub mod mock_probe;
pub mod shared_writer;

use request_tracker::config::{TrackerConfig, TrackingMode};
use request_tracker::core::ProcessProbe;
use request_tracker::Tracker;
use shared_writer::SharedWriter;
use std::sync::Arc;

/// Builds a tracker that logs into memory and samples through `probe`.
pub fn tracker_with_probe(probe: Arc<dyn ProcessProbe>) -> (Tracker, SharedWriter) {
    let writer = SharedWriter::new();
    let tracker = Tracker::builder(TrackerConfig::default())
        .writer_override(Box::new(writer.clone()))
        .probe_override(probe)
        .build()
        .expect("tracker should build inside a runtime");
    (tracker, writer)
}

/// Builds a tracker that logs into memory and records latency only.
pub fn latency_only_tracker() -> (Tracker, SharedWriter) {
    let writer = SharedWriter::new();
    let config = TrackerConfig {
        mode: TrackingMode::LatencyOnly,
        ..TrackerConfig::default()
    };
    let tracker = Tracker::builder(config)
        .writer_override(Box::new(writer.clone()))
        .build()
        .expect("tracker should build inside a runtime");
    (tracker, writer)
}
