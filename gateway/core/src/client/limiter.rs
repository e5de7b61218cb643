//! Concurrency limiter
//!
//! One semaphore per Client caps in-flight calls at `max_concurrent_calls`.
//! A [`CallPermit`] is an RAII guard: the slot is returned when it drops,
//! whichever way the call ends.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Why a permit was not granted
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LimiterError {
    /// No slot freed up in time
    Timeout,
    /// The limiter was closed
    Closed,
}

/// Snapshot of a Client's call counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ClientStats {
    /// Calls currently holding a permit
    pub in_flight: usize,
    /// Highest `in_flight` ever observed
    pub peak_in_flight: usize,
    /// Callers waiting for a permit
    pub waiting: usize,
    /// Calls that returned a response or completed a stream
    pub completed: u64,
    /// Calls that ended in an error
    pub failed: u64,
    /// Retries performed (attempts beyond the first)
    pub retries: u64,
    /// Permit requests that timed out
    pub capacity_rejections: u64,
    /// Accumulated permit wait time
    pub total_wait_ms: u64,
}

#[derive(Debug, Default)]
pub(crate) struct StatsAtomic {
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    waiting: AtomicUsize,
    completed: AtomicU64,
    failed: AtomicU64,
    retries: AtomicU64,
    capacity_rejections: AtomicU64,
    total_wait_ms: AtomicU64,
}

impl StatsAtomic {
    pub(crate) fn snapshot(&self) -> ClientStats {
        ClientStats {
            in_flight: self.in_flight.load(Ordering::Relaxed),
            peak_in_flight: self.peak_in_flight.load(Ordering::Relaxed),
            waiting: self.waiting.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            capacity_rejections: self.capacity_rejections.load(Ordering::Relaxed),
            total_wait_ms: self.total_wait_ms.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn record_success(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }
}

/// Caps concurrent calls on one Client
#[derive(Debug)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    stats: Arc<StatsAtomic>,
}

impl ConcurrencyLimiter {
    /// Limiter with `capacity` slots (at least one)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            stats: Arc::new(StatsAtomic::default()),
        }
    }

    /// Configured slot count
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently free
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub(crate) fn stats(&self) -> &Arc<StatsAtomic> {
        &self.stats
    }

    /// Counter snapshot
    pub fn snapshot(&self) -> ClientStats {
        self.stats.snapshot()
    }

    /// Wait up to `timeout` for a slot
    pub async fn acquire(&self, timeout: Duration) -> Result<CallPermit, LimiterError> {
        let waiting = WaitingGuard::enter(&self.stats.waiting);
        let wait_start = Instant::now();

        let acquired =
            tokio::time::timeout(timeout, Arc::clone(&self.semaphore).acquire_owned()).await;
        drop(waiting);

        let permit = match acquired {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(LimiterError::Closed),
            Err(_) => {
                self.stats
                    .capacity_rejections
                    .fetch_add(1, Ordering::Relaxed);
                return Err(LimiterError::Timeout);
            }
        };

        let waited = u64::try_from(wait_start.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.stats.total_wait_ms.fetch_add(waited, Ordering::Relaxed);

        let now = self.stats.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.stats.peak_in_flight.fetch_max(now, Ordering::AcqRel);

        Ok(CallPermit {
            _permit: permit,
            stats: Arc::clone(&self.stats),
        })
    }

    /// Refuse new permits; waiting callers fail with [`LimiterError::Closed`]
    pub fn close(&self) {
        self.semaphore.close();
    }

    /// Whether [`close`](Self::close) was called
    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }
}

/// Counts one caller in `waiting` until dropped, including when the
/// acquiring future is dropped mid-wait
struct WaitingGuard<'a>(&'a AtomicUsize);

impl<'a> WaitingGuard<'a> {
    fn enter(waiting: &'a AtomicUsize) -> Self {
        waiting.fetch_add(1, Ordering::Relaxed);
        Self(waiting)
    }
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// A held concurrency slot (RAII guard)
#[derive(Debug)]
pub struct CallPermit {
    _permit: OwnedSemaphorePermit,
    stats: Arc<StatsAtomic>,
}

impl Drop for CallPermit {
    fn drop(&mut self) {
        self.stats.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}
