//! Buffered request log sink.
//!
//! `BufferedSink` appends one JSON line per request into an in-memory buffer
//! in front of the log file. Physical writes happen when the buffer fills up,
//! on every tick of the periodic flush loop, and once more at close.

use crate::core::RequestRecord;
use crate::internal_metrics::Metrics;
use chrono::Utc;
use std::fs::OpenOptions;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Default size of the in-memory buffer in front of the stream.
pub const DEFAULT_BUFFER_CAPACITY: usize = 64 * 1024;

/// Errors raised by the sink.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("log sink is closed")]
    Closed,
    #[error("failed to serialize request record: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("log sink I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Counters describing the sink's activity so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SinkStats {
    pub records_written: u64,
    pub flushes: u64,
    pub write_errors: u64,
    pub closed: bool,
}

type Stream = Box<dyn Write + Send>;

/// A thread-safe buffered writer for request records.
///
/// Cloning is cheap; all clones share the same buffer and stream.
#[derive(Clone)]
pub struct BufferedSink {
    inner: Arc<SinkInner>,
}

struct SinkInner {
    state: Mutex<SinkState>,
    metrics: Metrics,
    records_written: AtomicU64,
    flushes: AtomicU64,
    write_errors: AtomicU64,
}

struct SinkState {
    /// `None` once the sink has been closed.
    writer: Option<BufWriter<Stream>>,
    /// Reused serialization buffer so a record is appended whole or not at all.
    scratch: Vec<u8>,
}

impl std::fmt::Debug for BufferedSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferedSink")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl BufferedSink {
    /// Wraps an arbitrary stream.
    pub fn new(stream: Stream, buffer_capacity: usize, metrics: Metrics) -> Self {
        Self {
            inner: Arc::new(SinkInner {
                state: Mutex::new(SinkState {
                    writer: Some(BufWriter::with_capacity(buffer_capacity, stream)),
                    scratch: Vec::with_capacity(512),
                }),
                metrics,
                records_written: AtomicU64::new(0),
                flushes: AtomicU64::new(0),
                write_errors: AtomicU64::new(0),
            }),
        }
    }

    /// Opens `path` in create/append mode and wraps it.
    pub fn open(path: &Path, buffer_capacity: usize, metrics: Metrics) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::new(Box::new(file), buffer_capacity, metrics))
    }

    /// Serializes `record` as one JSON line and appends it to the buffer.
    pub fn write(&self, record: &RequestRecord) -> Result<(), SinkError> {
        let result = self.write_line(record);
        match &result {
            Ok(()) => {
                self.inner.records_written.fetch_add(1, Ordering::Relaxed);
                self.inner.metrics.sink_records_written_total.increment(1);
            }
            Err(_) => {
                self.inner.write_errors.fetch_add(1, Ordering::Relaxed);
                self.inner.metrics.sink_errors_total.increment(1);
            }
        }
        result
    }

    fn write_line(&self, record: &RequestRecord) -> Result<(), SinkError> {
        let mut state = self.lock();
        let SinkState { writer, scratch } = &mut *state;
        let writer = writer.as_mut().ok_or(SinkError::Closed)?;

        scratch.clear();
        serde_json::to_writer(&mut *scratch, &record.log_line(Utc::now()))?;
        scratch.push(b'\n');
        writer.write_all(scratch)?;
        Ok(())
    }

    /// Forces buffered bytes out to the underlying stream.
    pub fn flush(&self) -> Result<(), SinkError> {
        let mut state = self.lock();
        let writer = state.writer.as_mut().ok_or(SinkError::Closed)?;
        self.inner.flushes.fetch_add(1, Ordering::Relaxed);
        self.inner.metrics.sink_flushes_total.increment(1);
        writer.flush().map_err(|e| {
            self.inner.metrics.sink_errors_total.increment(1);
            SinkError::from(e)
        })
    }

    /// Performs the final flush and releases the stream.
    ///
    /// Closing an already closed sink does nothing and returns `Ok(())`.
    pub fn close(&self) -> Result<(), SinkError> {
        let mut state = self.lock();
        let Some(mut writer) = state.writer.take() else {
            debug!("Log sink already closed.");
            return Ok(());
        };
        drop(state);

        self.inner.flushes.fetch_add(1, Ordering::Relaxed);
        self.inner.metrics.sink_flushes_total.increment(1);
        // Dropping the writer afterwards closes the stream even if the flush failed.
        writer.flush().map_err(|e| {
            self.inner.metrics.sink_errors_total.increment(1);
            SinkError::from(e)
        })
    }

    pub fn is_closed(&self) -> bool {
        self.lock().writer.is_none()
    }

    pub fn stats(&self) -> SinkStats {
        SinkStats {
            records_written: self.inner.records_written.load(Ordering::Relaxed),
            flushes: self.inner.flushes.load(Ordering::Relaxed),
            write_errors: self.inner.write_errors.load(Ordering::Relaxed),
            closed: self.is_closed(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SinkState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Flushes `sink` every `interval` until the shutdown signal is observed.
///
/// The first tick happens one full interval after the loop starts. Once the
/// shutdown signal (or the sender being dropped) is seen, the loop returns
/// without flushing; the final flush belongs to `BufferedSink::close`.
pub async fn run_periodic_flush(
    sink: BufferedSink,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(interval_ms = interval.as_millis() as u64, "Periodic flush loop started.");

    loop {
        tokio::select! {
            biased;
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    debug!("Periodic flush loop received shutdown signal.");
                    break;
                }
            }
            _ = ticker.tick() => {
                if let Err(e) = sink.flush() {
                    warn!(error = %e, "Periodic flush of the request log failed.");
                }
            }
        }
    }
    info!("Periodic flush loop finished.");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuffer {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    fn record(path: &str) -> RequestRecord {
        let mut record = RequestRecord::default();
        record.populate(
            Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap(),
            "GET",
            path,
            200,
            Duration::from_millis(2),
            None,
            None,
        );
        record
    }

    fn buffered_sink(buffer: &SharedBuffer) -> BufferedSink {
        BufferedSink::new(
            Box::new(buffer.clone()),
            DEFAULT_BUFFER_CAPACITY,
            Metrics::disabled(),
        )
    }

    #[test]
    fn test_write_is_buffered_until_flush() {
        let buffer = SharedBuffer::default();
        let sink = buffered_sink(&buffer);

        sink.write(&record("/a")).unwrap();
        assert!(buffer.contents().is_empty(), "write must not hit the stream");

        sink.flush().unwrap();
        let contents = buffer.contents();
        assert_eq!(contents.lines().count(), 1);
        let line: serde_json::Value = serde_json::from_str(contents.trim_end()).unwrap();
        assert_eq!(line["requestURL"], "/a");
        assert_eq!(sink.stats().records_written, 1);
    }

    #[test]
    fn test_close_is_idempotent() {
        let buffer = SharedBuffer::default();
        let sink = buffered_sink(&buffer);
        sink.write(&record("/a")).unwrap();

        sink.close().unwrap();
        sink.close().unwrap();

        assert_eq!(buffer.contents().lines().count(), 1);
        let stats = sink.stats();
        assert!(stats.closed);
        assert_eq!(stats.flushes, 1, "only the first close flushes");
    }

    #[test]
    fn test_write_after_close_is_an_error() {
        let buffer = SharedBuffer::default();
        let sink = buffered_sink(&buffer);
        sink.close().unwrap();

        assert!(matches!(sink.write(&record("/late")), Err(SinkError::Closed)));
        assert!(matches!(sink.flush(), Err(SinkError::Closed)));
        assert_eq!(sink.stats().write_errors, 1);
        assert!(buffer.contents().is_empty());
    }

    #[test]
    fn test_open_appends_to_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("requests.log");
        std::fs::write(&path, "existing\n").unwrap();

        let sink = BufferedSink::open(&path, 1024, Metrics::disabled()).unwrap();
        sink.write(&record("/b")).unwrap();
        sink.close().unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "existing");
        assert!(lines[1].contains("\"requestURL\":\"/b\""));
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_flush_ticks_until_shutdown() {
        let buffer = SharedBuffer::default();
        let sink = buffered_sink(&buffer);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run_periodic_flush(
            sink.clone(),
            Duration::from_secs(5),
            shutdown_rx,
        ));

        sink.write(&record("/tick")).unwrap();
        time::sleep(Duration::from_millis(4_900)).await;
        assert_eq!(sink.stats().flushes, 0, "no tick before the first interval");

        time::sleep(Duration::from_millis(200)).await;
        assert_eq!(sink.stats().flushes, 1);
        assert_eq!(buffer.contents().lines().count(), 1);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        time::sleep(Duration::from_secs(30)).await;
        assert_eq!(sink.stats().flushes, 1, "no ticks after shutdown");
    }
}
