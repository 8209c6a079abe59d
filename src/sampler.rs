//! # Process Resource Sampler
//!
//! This module defines `SysinfoProbe`, the `ProcessProbe` backed by the
//! `sysinfo` crate, and the arithmetic that turns two snapshots taken around a
//! request into the CPU and memory deltas attributed to it.

use crate::core::{ProcessProbe, Snapshot};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use sysinfo::{Pid, ProcessesToUpdate, System};
use thiserror::Error;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Errors raised while querying the operating system for process metrics.
#[derive(Debug, Error)]
pub enum SamplerError {
    #[error("failed to determine the current process id: {0}")]
    Pid(String),
    #[error("process {0} not found")]
    ProcessNotFound(Pid),
}

/// A probe for the current process, backed by `sysinfo`.
///
/// `sysinfo::System` needs `&mut self` to refresh, so concurrent requests
/// serialize on the inner mutex for the duration of one refresh.
pub struct SysinfoProbe {
    pid: Pid,
    system: Mutex<System>,
}

impl SysinfoProbe {
    /// Creates a probe for the running process.
    pub fn new() -> Result<Self, SamplerError> {
        let pid = sysinfo::get_current_pid().map_err(|e| SamplerError::Pid(e.to_string()))?;
        Ok(Self {
            pid,
            system: Mutex::new(System::new()),
        })
    }
}

impl std::fmt::Debug for SysinfoProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SysinfoProbe")
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

impl ProcessProbe for SysinfoProbe {
    fn snapshot(&self) -> Result<Snapshot, SamplerError> {
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);

        // Only our own process is refreshed; a zero count means it was not found.
        if system.refresh_processes(ProcessesToUpdate::Some(&[self.pid]), true) == 0 {
            return Err(SamplerError::ProcessNotFound(self.pid));
        }
        let process = system
            .process(self.pid)
            .ok_or(SamplerError::ProcessNotFound(self.pid))?;

        Ok(Snapshot {
            cpu_time: Duration::from_millis(process.accumulated_cpu_time()),
            memory_bytes: process.memory(),
        })
    }
}

/// CPU time consumed between two snapshots as a percentage of `elapsed`.
///
/// Returns `0.0` when `elapsed` is zero. A counter that appears to go
/// backwards is treated as no consumption.
pub fn cpu_delta(before: &Snapshot, after: &Snapshot, elapsed: Duration) -> f64 {
    let elapsed_secs = elapsed.as_secs_f64();
    if elapsed_secs <= 0.0 {
        return 0.0;
    }
    let consumed = after.cpu_time.saturating_sub(before.cpu_time);
    consumed.as_secs_f64() / elapsed_secs * 100.0
}

/// Change in resident memory between two snapshots, in MB. Negative when
/// memory was released.
pub fn memory_delta_mb(before: &Snapshot, after: &Snapshot) -> f64 {
    (after.memory_bytes as f64 - before.memory_bytes as f64) / BYTES_PER_MB
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(cpu_ms: u64, memory_bytes: u64) -> Snapshot {
        Snapshot {
            cpu_time: Duration::from_millis(cpu_ms),
            memory_bytes,
        }
    }

    #[test]
    fn test_cpu_delta_zero_elapsed_is_zero() {
        let before = snapshot(100, 0);
        let after = snapshot(250, 0);
        assert_eq!(cpu_delta(&before, &after, Duration::ZERO), 0.0);
    }

    #[test]
    fn test_cpu_delta_percentage() {
        let before = snapshot(1_000, 0);
        let after = snapshot(1_050, 0);
        let delta = cpu_delta(&before, &after, Duration::from_millis(100));
        assert!((delta - 50.0).abs() < 1e-9, "expected 50%, got {}", delta);
    }

    #[test]
    fn test_cpu_delta_can_exceed_one_core() {
        let before = snapshot(0, 0);
        let after = snapshot(400, 0);
        let delta = cpu_delta(&before, &after, Duration::from_millis(200));
        assert!((delta - 200.0).abs() < 1e-9);
    }

    #[test]
    fn test_cpu_delta_counter_going_backwards_is_zero() {
        let before = snapshot(500, 0);
        let after = snapshot(400, 0);
        assert_eq!(cpu_delta(&before, &after, Duration::from_secs(1)), 0.0);
    }

    #[test]
    fn test_memory_delta_in_megabytes() {
        let before = snapshot(0, 10 * 1024 * 1024);
        let after = snapshot(0, 12 * 1024 * 1024 + 512 * 1024);
        assert_eq!(memory_delta_mb(&before, &after), 2.5);
        assert_eq!(memory_delta_mb(&after, &before), -2.5);
    }

    #[test]
    fn test_sysinfo_probe_reads_current_process() {
        let probe = SysinfoProbe::new().expect("current pid should be available");
        let first = probe.snapshot().expect("own process should be visible");
        assert!(first.memory_bytes > 0);

        // Burn CPU on this thread for a while; the counter has tick granularity.
        let burn = std::time::Instant::now();
        let mut acc = 0u64;
        while burn.elapsed() < Duration::from_millis(200) {
            acc = std::hint::black_box(acc.wrapping_add(1));
        }

        let second = probe.snapshot().unwrap();
        assert!(
            second.cpu_time > first.cpu_time,
            "cpu time did not advance: {:?} -> {:?}",
            first.cpu_time,
            second.cpu_time
        );
    }
}
