//! A bounded free list of `RequestRecord`s.
//!
//! Every in-flight request borrows one record from the pool. The record comes
//! back automatically when its `PooledRecord` guard is dropped, so acquire and
//! release stay paired on every path, including early returns and panics.

use crate::core::RequestRecord;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Default number of idle records kept for reuse.
pub const DEFAULT_MAX_IDLE: usize = 256;

/// A point-in-time view of the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Records waiting on the free list
    pub idle: usize,
    /// Records currently held by requests
    pub in_use: usize,
    /// Records alive in total (idle + in use)
    pub allocated: usize,
}

/// A concurrent-safe pool of request records.
#[derive(Clone, Debug)]
pub struct RecordPool {
    inner: Arc<PoolInner>,
}

#[derive(Debug)]
struct PoolInner {
    free: Mutex<Vec<Box<RequestRecord>>>,
    max_idle: usize,
    in_use: AtomicUsize,
    allocated: AtomicUsize,
}

impl RecordPool {
    /// Creates an empty pool that keeps at most `max_idle` records for reuse.
    pub fn new(max_idle: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                free: Mutex::new(Vec::with_capacity(max_idle)),
                max_idle,
                in_use: AtomicUsize::new(0),
                allocated: AtomicUsize::new(0),
            }),
        }
    }

    /// Hands out a record from the free list, or a fresh zero-valued one.
    ///
    /// The record's previous contents are unspecified; callers overwrite it
    /// with [`RequestRecord::populate`] before reading.
    pub fn acquire(&self) -> PooledRecord {
        let recycled = self.inner.lock_free().pop();
        let record = match recycled {
            Some(record) => record,
            None => {
                self.inner.allocated.fetch_add(1, Ordering::Relaxed);
                Box::default()
            }
        };
        self.inner.in_use.fetch_add(1, Ordering::Relaxed);
        PooledRecord {
            record: Some(record),
            pool: self.inner.clone(),
        }
    }

    pub fn stats(&self) -> PoolStats {
        let idle = self.inner.lock_free().len();
        PoolStats {
            idle,
            in_use: self.inner.in_use.load(Ordering::Relaxed),
            allocated: self.inner.allocated.load(Ordering::Relaxed),
        }
    }
}

impl Default for RecordPool {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_IDLE)
    }
}

impl PoolInner {
    fn lock_free(&self) -> std::sync::MutexGuard<'_, Vec<Box<RequestRecord>>> {
        self.free.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release(&self, record: Box<RequestRecord>) {
        self.in_use.fetch_sub(1, Ordering::Relaxed);
        let mut free = self.lock_free();
        if free.len() < self.max_idle {
            free.push(record);
        } else {
            drop(free);
            self.allocated.fetch_sub(1, Ordering::Relaxed);
        }
    }
}

/// Exclusive access to a pooled record. Returns it to the pool on drop.
#[derive(Debug)]
pub struct PooledRecord {
    record: Option<Box<RequestRecord>>,
    pool: Arc<PoolInner>,
}

impl PooledRecord {
    /// Returns the record to the pool. Equivalent to dropping the guard.
    pub fn release(self) {}
}

impl Deref for PooledRecord {
    type Target = RequestRecord;

    fn deref(&self) -> &RequestRecord {
        // Only `Drop` takes the record out.
        self.record.as_deref().unwrap_or_else(|| unreachable!())
    }
}

impl DerefMut for PooledRecord {
    fn deref_mut(&mut self) -> &mut RequestRecord {
        self.record.as_deref_mut().unwrap_or_else(|| unreachable!())
    }
}

impl Drop for PooledRecord {
    fn drop(&mut self) {
        if let Some(record) = self.record.take() {
            self.pool.release(record);
        }
    }
}
