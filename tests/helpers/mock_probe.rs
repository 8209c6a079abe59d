use request_tracker::core::{ProcessProbe, Snapshot};
use request_tracker::sampler::SamplerError;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// A probe whose CPU counter advances by `cpu_step` and whose memory grows by
/// `memory_step` bytes on every snapshot.
#[derive(Debug)]
pub struct SteppingProbe {
    calls: AtomicU64,
    cpu_step: Duration,
    memory_step: u64,
}

impl SteppingProbe {
    pub fn new(cpu_step: Duration, memory_step: u64) -> Self {
        Self {
            calls: AtomicU64::new(0),
            cpu_step,
            memory_step,
        }
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ProcessProbe for SteppingProbe {
    fn snapshot(&self) -> Result<Snapshot, SamplerError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Snapshot {
            cpu_time: self.cpu_step * n as u32,
            memory_bytes: 100 * 1024 * 1024 + self.memory_step * n,
        })
    }
}

/// A probe that always fails, as if the OS refused the query.
#[derive(Debug, Default)]
pub struct FailingProbe {
    pub calls: AtomicUsize,
}

impl ProcessProbe for FailingProbe {
    fn snapshot(&self) -> Result<Snapshot, SamplerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(SamplerError::Pid("permission denied".to_string()))
    }
}

/// A probe that blocks for `delay` on every snapshot, like a slow OS query.
#[derive(Debug)]
pub struct SlowProbe {
    pub delay: Duration,
}

impl ProcessProbe for SlowProbe {
    fn snapshot(&self) -> Result<Snapshot, SamplerError> {
        std::thread::sleep(self.delay);
        Ok(Snapshot::default())
    }
}
